//! AVERAGE, MIN, MAX and LAST consolidation.
//!
//! Archives with more than one step per row accumulate step rates in
//! [`BasicCdp::value`] until the row is complete. Single-step archives just
//! copy the step rate into the output slots.

use crate::format::defs::CfName;
use crate::format::state::BasicCdp;

fn if_nan(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value
    }
}

/// Position of the current sample relative to an archive's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowProgress {
    /// Primary steps per row.
    pub pdp_count: u64,
    /// Steps elapsed by the current sample.
    pub elapsed: u64,
    /// Steps needed to complete the current row.
    pub start_offset: u64,
}

impl RowProgress {
    /// Steps of the new row that are already covered after completing rows.
    fn carried_steps(&self) -> u64 {
        (self.elapsed - self.start_offset) % self.pdp_count
    }
}

/// Completes at least one row.
///
/// Sets the primary output for the completed row, the secondary output for
/// any further complete rows, and starts the next row with the steps carried
/// past the last boundary.
pub fn complete_rows(cdp: &mut BasicCdp, cf: CfName, xff: f64, rate: f64, progress: RowProgress) {
    let carried = progress.carried_steps();

    if rate.is_nan() {
        cdp.unknown_pdp_count += progress.start_offset;
        cdp.out.secondary = f64::NAN;
    } else {
        // Every full row after the first consists of this one rate.
        cdp.out.secondary = rate;
    }

    let average_carry = if rate.is_nan() {
        f64::NAN
    } else {
        rate * carried as f64
    };

    if cdp.unknown_pdp_count as f64 > progress.pdp_count as f64 * xff {
        cdp.out.primary = f64::NAN;
        cdp.value = match cf {
            CfName::Average => average_carry,
            _ => rate,
        };
    } else {
        match cf {
            CfName::Average => {
                let cum = if_nan(cdp.value, 0.0);
                let cur = if_nan(rate, 0.0);
                cdp.out.primary = (cum + cur * progress.start_offset as f64)
                    / (progress.pdp_count - cdp.unknown_pdp_count) as f64;
                cdp.value = average_carry;
            }
            CfName::Maximum => {
                let cum = if_nan(cdp.value, f64::NEG_INFINITY);
                let cur = if_nan(rate, f64::NEG_INFINITY);
                cdp.out.primary = if cur > cum { cur } else { cum };
                cdp.value = rate;
            }
            CfName::Minimum => {
                let cum = if_nan(cdp.value, f64::INFINITY);
                let cur = if_nan(rate, f64::INFINITY);
                cdp.out.primary = if cur < cum { cur } else { cum };
                cdp.value = rate;
            }
            _ => {
                cdp.out.primary = rate;
                cdp.value = rate;
            }
        }
    }

    // Must follow the primary computation, which reads the old count.
    cdp.unknown_pdp_count = if rate.is_nan() { carried } else { 0 };
}

/// Folds `elapsed` steps of `rate` into a row that is not yet complete.
pub fn accumulate(cdp: &mut BasicCdp, cf: CfName, rate: f64, elapsed: u64) {
    if rate.is_nan() {
        cdp.unknown_pdp_count += elapsed;
    } else if cdp.value.is_nan() {
        cdp.value = match cf {
            CfName::Average => rate * elapsed as f64,
            _ => rate,
        };
    } else {
        match cf {
            CfName::Average => cdp.value += rate * elapsed as f64,
            CfName::Minimum => {
                if rate < cdp.value {
                    cdp.value = rate;
                }
            }
            CfName::Maximum => {
                if rate > cdp.value {
                    cdp.value = rate;
                }
            }
            _ => cdp.value = rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::state::CdpOutput;

    fn fresh() -> BasicCdp {
        BasicCdp {
            value: f64::NAN,
            unknown_pdp_count: 0,
            out: CdpOutput::default(),
        }
    }

    fn progress(pdp_count: u64, elapsed: u64, start_offset: u64) -> RowProgress {
        RowProgress {
            pdp_count,
            elapsed,
            start_offset,
        }
    }

    #[test]
    fn test_average_over_row() {
        let mut cdp = fresh();
        accumulate(&mut cdp, CfName::Average, 10.0, 1);
        accumulate(&mut cdp, CfName::Average, 20.0, 1);
        complete_rows(&mut cdp, CfName::Average, 0.5, 30.0, progress(3, 1, 1));
        assert_eq!(cdp.out.primary, 20.0);
        assert_eq!(cdp.value, 0.0);
        assert_eq!(cdp.unknown_pdp_count, 0);
    }

    #[test]
    fn test_average_with_unknown_within_xff() {
        let mut cdp = fresh();
        accumulate(&mut cdp, CfName::Average, f64::NAN, 1);
        accumulate(&mut cdp, CfName::Average, 20.0, 1);
        complete_rows(&mut cdp, CfName::Average, 0.5, 40.0, progress(3, 1, 1));
        // One unknown step out of three: mean of the known ones.
        assert_eq!(cdp.out.primary, 30.0);
    }

    #[test]
    fn test_xff_exceeded_is_unknown() {
        let mut cdp = fresh();
        accumulate(&mut cdp, CfName::Average, f64::NAN, 2);
        complete_rows(&mut cdp, CfName::Average, 0.5, 40.0, progress(3, 1, 1));
        assert!(cdp.out.primary.is_nan());
        assert_eq!(cdp.unknown_pdp_count, 0);
    }

    #[test]
    fn test_carry_over_into_next_row() {
        let mut cdp = fresh();
        accumulate(&mut cdp, CfName::Average, 10.0, 2);
        // Five steps: one completes the row, three fill a whole row, one is
        // carried into the next row.
        complete_rows(&mut cdp, CfName::Average, 0.5, 4.0, progress(3, 5, 1));
        assert_eq!(cdp.out.primary, 8.0);
        assert_eq!(cdp.out.secondary, 4.0);
        assert_eq!(cdp.value, 4.0);
    }

    #[test]
    fn test_min_max_last() {
        let mut max = fresh();
        accumulate(&mut max, CfName::Maximum, 5.0, 1);
        complete_rows(&mut max, CfName::Maximum, 0.5, 3.0, progress(2, 1, 1));
        assert_eq!(max.out.primary, 5.0);
        assert_eq!(max.value, 3.0);

        let mut min = fresh();
        accumulate(&mut min, CfName::Minimum, 5.0, 1);
        complete_rows(&mut min, CfName::Minimum, 0.5, 3.0, progress(2, 1, 1));
        assert_eq!(min.out.primary, 3.0);

        let mut last = fresh();
        accumulate(&mut last, CfName::Last, 5.0, 1);
        complete_rows(&mut last, CfName::Last, 0.5, 3.0, progress(2, 1, 1));
        assert_eq!(last.out.primary, 3.0);
    }

    #[test]
    fn test_unknown_rate_counts_carried_steps() {
        let mut cdp = fresh();
        accumulate(&mut cdp, CfName::Average, 10.0, 1);
        complete_rows(&mut cdp, CfName::Average, 0.9, f64::NAN, progress(4, 5, 3));
        assert!(cdp.out.secondary.is_nan());
        assert_eq!(cdp.unknown_pdp_count, 2);
        assert!(cdp.value.is_nan());
    }
}
