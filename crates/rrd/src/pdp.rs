//! Primary data point accumulation.
//!
//! Each sample contributes `rate x seconds` to the running primary data point
//! (PDP) of every data source. When the sample crosses one or more step
//! boundaries the accumulated PDP is closed into a per-step rate, which the
//! consolidation engine then folds into every archive.
//!
//! # Example
//!
//! ```rust,ignore
//! let interval = Interval::new((900, 0), (1210, 0), 300);
//! let pdp_new = ingest(&ds, &mut prep, "42", interval.seconds)?;
//! let rate = close_step(&ds, &mut prep, pdp_new, &interval);
//! ```

use crate::error::{Result, RrdError};
use crate::format::defs::{CdefProgram, DataSourceDef, DataSourceKind};
use crate::format::state::{PdpPrep, LAST_DS_LEN};
use crate::time::step_boundary;

/// 2^32, added once to a negative COUNTER delta.
const COUNTER_WRAP_32: f64 = 4_294_967_296.0;

/// 2^64 - 2^32, added when the delta is still negative after the 32-bit fix.
const COUNTER_WRAP_64: f64 = 18_446_744_069_414_584_320.0;

/// Evaluates compiled COMPUTE expressions.
///
/// `rates` holds the closed step rates of every data source with a lower
/// index than the one being computed.
pub trait ComputeEvaluator {
    /// Evaluates `program`, returning the computed rate or a failure message.
    fn evaluate(&self, program: &CdefProgram, rates: &[f64]) -> std::result::Result<f64, String>;
}

impl<F> ComputeEvaluator for F
where
    F: Fn(&CdefProgram, &[f64]) -> std::result::Result<f64, String>,
{
    fn evaluate(&self, program: &CdefProgram, rates: &[f64]) -> std::result::Result<f64, String> {
        self(program, rates)
    }
}

/// Evaluator used when none is configured; every COMPUTE source fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompute;

impl ComputeEvaluator for NoCompute {
    fn evaluate(&self, _program: &CdefProgram, _rates: &[f64]) -> std::result::Result<f64, String> {
        Err("no expression evaluator configured".to_string())
    }
}

/// Timing of one sample relative to the previous update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    /// Seconds since the previous update, including microseconds.
    pub seconds: f64,
    /// Part of `seconds` before the latest step boundary.
    pub pre: f64,
    /// Part of `seconds` after the latest step boundary.
    pub post: f64,
    /// Step boundary at or before the previous update.
    pub prev_boundary: i64,
    /// Step boundary at or before the new update.
    pub boundary: i64,
}

impl Interval {
    /// Splits the span between `last` and `now`, each `(seconds, usec)`.
    pub fn new(last: (i64, i64), now: (i64, i64), step: u64) -> Self {
        let step = step as i64;
        let prev_boundary = step_boundary(last.0, step);
        let boundary = step_boundary(now.0, step);
        let seconds = (now.0 - last.0) as f64 + (now.1 - last.1) as f64 / 1_000_000.0;
        let (pre, post) = if boundary > prev_boundary {
            (
                (boundary - last.0) as f64 - last.1 as f64 / 1_000_000.0,
                (now.0 - boundary) as f64 + now.1 as f64 / 1_000_000.0,
            )
        } else {
            (seconds, 0.0)
        };
        Self {
            seconds,
            pre,
            post,
            prev_boundary,
            boundary,
        }
    }

    /// Returns true if at least one step boundary was crossed.
    pub fn crosses_boundary(&self) -> bool {
        self.boundary > self.prev_boundary
    }

    /// Number of step boundaries crossed.
    pub fn elapsed_steps(&self, step: u64) -> u64 {
        ((self.boundary - self.prev_boundary) / step as i64) as u64
    }

    /// Seconds between the two step boundaries.
    fn boundary_span(&self) -> u64 {
        (self.boundary - self.prev_boundary) as u64
    }
}

/// Exact difference `a - b` of two decimal integer strings.
///
/// Leading non-digit characters are skipped (a `-` among them marks the
/// number negative) and parsing stops at the first non-digit. Returns NaN if
/// either side has no digits, the signs differ, or a number is longer than
/// the `last_ds` field can hold.
pub fn rrd_diff(a: &str, b: &str) -> f64 {
    fn digits(s: &str) -> Option<(bool, &str)> {
        let start = s.find(|c: char| c.is_ascii_digit())?;
        let negative = s[..start].contains('-');
        let rest = &s[start..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        Some((negative, &rest[..end]))
    }

    let (Some((a_neg, a)), Some((b_neg, b))) = (digits(a), digits(b)) else {
        return f64::NAN;
    };
    if a_neg != b_neg || a.len().max(b.len()) > LAST_DS_LEN {
        return f64::NAN;
    }
    // At most 30 digits, well inside u128.
    let (Ok(a), Ok(b)) = (a.parse::<u128>(), b.parse::<u128>()) else {
        return f64::NAN;
    };
    let diff = if a >= b {
        (a - b) as f64
    } else {
        -((b - a) as f64)
    };
    if a_neg {
        -diff
    } else {
        diff
    }
}

fn is_simple_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_float(ds: &DataSourceDef, raw: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|_| RrdError::InvalidReading {
        ds: ds.name.clone(),
        value: raw.to_string(),
        reason: "not a number".to_string(),
    })
}

/// Returns true if `raw` marks an unknown reading.
pub fn is_unknown(raw: &str) -> bool {
    raw.starts_with('U')
}

/// Interprets one reading for one data source.
///
/// Returns `pdp_new`, the reading's `rate x seconds` contribution over
/// `interval` seconds, or NaN when the contribution is unknown. Updates
/// `last_ds` in `prep`.
///
/// # Errors
///
/// Returns `RrdError::InvalidReading` if the text is not valid for the data
/// source type.
pub fn ingest(ds: &DataSourceDef, prep: &mut PdpPrep, raw: &str, interval: f64) -> Result<f64> {
    let heartbeat = ds.heartbeat as f64;

    // Never build a difference against a reading older than the heartbeat.
    if heartbeat < interval {
        prep.set_last_ds("U");
    }

    let mut pdp_new = f64::NAN;
    let computed = matches!(ds.kind, DataSourceKind::Compute(_));
    if !is_unknown(raw) && !computed && heartbeat >= interval {
        let rate;
        match ds.kind {
            DataSourceKind::Counter | DataSourceKind::Derive => {
                if !is_simple_integer(raw) {
                    return Err(RrdError::InvalidReading {
                        ds: ds.name.clone(),
                        value: raw.to_string(),
                        reason: "not a simple integer".to_string(),
                    });
                }
                if prep.last_is_unknown() {
                    pdp_new = f64::NAN;
                } else {
                    pdp_new = rrd_diff(raw, &prep.last_ds);
                    if ds.kind == DataSourceKind::Counter {
                        if pdp_new < 0.0 {
                            pdp_new += COUNTER_WRAP_32;
                        }
                        if pdp_new < 0.0 {
                            pdp_new += COUNTER_WRAP_64;
                        }
                    }
                }
                rate = pdp_new / interval;
            }
            DataSourceKind::DCounter | DataSourceKind::DDerive => {
                let value = parse_float(ds, raw)?;
                pdp_new = if prep.last_is_unknown() {
                    f64::NAN
                } else {
                    match prep.last_ds.trim().parse::<f64>() {
                        Ok(last) => value - last,
                        Err(_) => f64::NAN,
                    }
                };
                if ds.kind == DataSourceKind::DCounter && pdp_new < 0.0 {
                    pdp_new = f64::NAN;
                }
                rate = pdp_new / interval;
            }
            DataSourceKind::Absolute => {
                pdp_new = parse_float(ds, raw)?;
                rate = pdp_new / interval;
            }
            DataSourceKind::Gauge => {
                pdp_new = parse_float(ds, raw)? * interval;
                rate = pdp_new / interval;
            }
            DataSourceKind::Compute(_) => rate = f64::NAN,
        }
        if !rate.is_nan() && ds.out_of_bounds(rate) {
            pdp_new = f64::NAN;
        }
    }

    prep.set_last_ds(raw);
    Ok(pdp_new)
}

/// Adds a sample that did not cross a step boundary.
pub fn accumulate(prep: &mut PdpPrep, pdp_new: f64, interval: &Interval) {
    if pdp_new.is_nan() {
        prep.unknown_seconds += interval.seconds.floor() as u64;
    } else if prep.value.is_nan() {
        prep.value = pdp_new;
    } else {
        prep.value += pdp_new;
    }
}

/// Closes the step ending at `interval.boundary` and returns its rate.
///
/// The rate is NaN when the sample interval exceeds the heartbeat or the
/// unknown seconds cover the whole span since the previous boundary. The
/// accumulator is left holding the part of the sample after the boundary,
/// see [`carry_over`].
pub fn close_step(ds: &DataSourceDef, prep: &mut PdpPrep, pdp_new: f64, interval: &Interval) -> f64 {
    let mut pre_unknown = 0.0;
    if pdp_new.is_nan() {
        pre_unknown = interval.pre;
    } else {
        let part = pdp_new / interval.seconds * interval.pre;
        if prep.value.is_nan() {
            prep.value = part;
        } else {
            prep.value += part;
        }
    }

    let span = interval.boundary_span();
    if interval.seconds > ds.heartbeat as f64 || span <= prep.unknown_seconds {
        f64::NAN
    } else {
        prep.value / ((span - prep.unknown_seconds) as f64 - pre_unknown)
    }
}

/// Resets the accumulator to the part of the sample after the boundary.
pub fn carry_over(prep: &mut PdpPrep, pdp_new: f64, interval: &Interval) {
    if pdp_new.is_nan() {
        prep.unknown_seconds = interval.post.floor() as u64;
        prep.value = f64::NAN;
    } else {
        prep.unknown_seconds = 0;
        prep.value = pdp_new / interval.seconds * interval.post;
    }
}

/// Evaluates a COMPUTE source over the already closed rates.
///
/// # Errors
///
/// Returns `RrdError::ComputeFailed` if the evaluator reports a failure.
pub fn compute_rate(
    ds: &DataSourceDef,
    program: &CdefProgram,
    rates: &[f64],
    evaluator: &dyn ComputeEvaluator,
) -> Result<f64> {
    evaluator
        .evaluate(program, rates)
        .map_err(|reason| RrdError::ComputeFailed {
            ds: ds.name.clone(),
            reason,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prep() -> PdpPrep {
        PdpPrep::initial(0, 300)
    }

    #[test]
    fn test_rrd_diff() {
        assert_eq!(rrd_diff("1000", "400"), 600.0);
        assert_eq!(rrd_diff("400", "1000"), -600.0);
        assert_eq!(rrd_diff("-10", "-4"), -6.0);
        assert!(rrd_diff("-10", "4").is_nan());
        assert!(rrd_diff("U", "4").is_nan());
        assert_eq!(
            rrd_diff("18446744073709551616000", "18446744073709551615000"),
            1000.0
        );
        assert!(rrd_diff(&"9".repeat(31), "1").is_nan());
        // Trailing garbage is ignored.
        assert_eq!(rrd_diff("12abc", "2"), 10.0);
    }

    #[test]
    fn test_interval_split() {
        let iv = Interval::new((890, 0), (910, 0), 300);
        assert!(iv.crosses_boundary());
        assert_eq!(iv.seconds, 20.0);
        assert_eq!(iv.pre, 10.0);
        assert_eq!(iv.post, 10.0);
        assert_eq!(iv.elapsed_steps(300), 1);

        let iv = Interval::new((901, 500_000), (950, 0), 300);
        assert!(!iv.crosses_boundary());
        assert_eq!(iv.pre, 48.5);
        assert_eq!(iv.post, 0.0);
    }

    #[test]
    fn test_gauge_contribution() {
        let ds = DataSourceDef::gauge("g", 600).unwrap();
        let mut p = prep();
        let v = ingest(&ds, &mut p, "10", 300.0).unwrap();
        assert_eq!(v, 3000.0);
        assert_eq!(p.last_ds, "10");
    }

    #[test]
    fn test_heartbeat_exceeded_is_unknown() {
        let ds = DataSourceDef::gauge("g", 100).unwrap();
        let mut p = prep();
        assert!(ingest(&ds, &mut p, "10", 300.0).unwrap().is_nan());
    }

    #[test]
    fn test_counter_wrap() {
        let ds = DataSourceDef::counter("c", 600).unwrap();
        let mut p = prep();
        p.set_last_ds("4294967290");
        let v = ingest(&ds, &mut p, "4", 300.0).unwrap();
        assert_eq!(v, 10.0);
    }

    #[test]
    fn test_counter_first_reading_unknown() {
        let ds = DataSourceDef::counter("c", 600).unwrap();
        let mut p = prep();
        assert!(ingest(&ds, &mut p, "100", 300.0).unwrap().is_nan());
        assert_eq!(p.last_ds, "100");
    }

    #[test]
    fn test_counter_rejects_non_integer() {
        let ds = DataSourceDef::counter("c", 600).unwrap();
        let mut p = prep();
        let err = ingest(&ds, &mut p, "12.5", 300.0).unwrap_err();
        assert!(matches!(err, RrdError::InvalidReading { .. }));
    }

    #[test]
    fn test_derive_may_decrease() {
        let ds = DataSourceDef::new("d", DataSourceKind::Derive, 600, f64::NAN, f64::NAN).unwrap();
        let mut p = prep();
        p.set_last_ds("100");
        assert_eq!(ingest(&ds, &mut p, "40", 300.0).unwrap(), -60.0);
    }

    #[test]
    fn test_dcounter_decrease_is_unknown() {
        let ds =
            DataSourceDef::new("d", DataSourceKind::DCounter, 600, f64::NAN, f64::NAN).unwrap();
        let mut p = prep();
        p.set_last_ds("10.5");
        assert_eq!(ingest(&ds, &mut p, "12.0", 300.0).unwrap(), 1.5);
        assert!(ingest(&ds, &mut p, "11.0", 300.0).unwrap().is_nan());
    }

    #[test]
    fn test_out_of_bounds_rate() {
        let ds = DataSourceDef::new("g", DataSourceKind::Gauge, 600, 0.0, 100.0).unwrap();
        let mut p = prep();
        assert!(ingest(&ds, &mut p, "101", 300.0).unwrap().is_nan());
        assert!(ingest(&ds, &mut p, "-1", 300.0).unwrap().is_nan());
        assert!(!ingest(&ds, &mut p, "50", 300.0).unwrap().is_nan());
    }

    #[test]
    fn test_close_step_full_step() {
        let ds = DataSourceDef::gauge("g", 600).unwrap();
        let mut p = PdpPrep::initial(900, 300);
        let iv = Interval::new((900, 0), (1200, 0), 300);
        let pdp_new = ingest(&ds, &mut p, "10", iv.seconds).unwrap();
        assert_eq!(close_step(&ds, &mut p, pdp_new, &iv), 10.0);
        carry_over(&mut p, pdp_new, &iv);
        assert_eq!(p.value, 0.0);
        assert_eq!(p.unknown_seconds, 0);
    }

    #[test]
    fn test_close_step_unknown_covers_step() {
        let ds = DataSourceDef::gauge("g", 600).unwrap();
        let mut p = PdpPrep::initial(900, 300);
        let iv = Interval::new((900, 0), (1200, 0), 300);
        let pdp_new = ingest(&ds, &mut p, "U", iv.seconds).unwrap();
        p.unknown_seconds = 300;
        assert!(close_step(&ds, &mut p, pdp_new, &iv).is_nan());
        carry_over(&mut p, pdp_new, &iv);
        assert!(p.value.is_nan());
    }

    #[test]
    fn test_closure_evaluator() {
        let ds = DataSourceDef::new(
            "sum",
            DataSourceKind::Compute(CdefProgram([0; 72])),
            0,
            f64::NAN,
            f64::NAN,
        )
        .unwrap();
        let eval = |_: &CdefProgram, rates: &[f64]| Ok::<f64, String>(rates.iter().sum());
        let rate = compute_rate(&ds, &CdefProgram([0; 72]), &[1.0, 2.0], &eval).unwrap();
        assert_eq!(rate, 3.0);
        let err = compute_rate(&ds, &CdefProgram([0; 72]), &[], &NoCompute).unwrap_err();
        assert!(matches!(err, RrdError::ComputeFailed { .. }));
    }
}
