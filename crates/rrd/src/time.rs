//! Time alignment utilities.
//!
//! All times are whole seconds since the epoch. A step boundary is any
//! multiple of the step; a row of an archive covers the half-open interval
//! `(end - row_span, end]` ending on a row boundary.

use crate::format::defs::ArchiveDef;

/// Latest step boundary at or before `t`.
pub fn step_boundary(t: i64, step: i64) -> i64 {
    t - t.rem_euclid(step)
}

/// Number of step boundaries in `(prev, new]`.
pub fn elapsed_steps(prev: i64, new: i64, step: i64) -> u64 {
    (new.div_euclid(step) - prev.div_euclid(step)).max(0) as u64
}

/// Maps between times and rows of one archive's ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveClock {
    /// Seconds covered by one row.
    pub row_span: i64,
    /// Ring capacity.
    pub row_count: usize,
    /// Most recently written row.
    pub current_row: usize,
    /// End time of the current row.
    pub end_time: i64,
}

impl ArchiveClock {
    /// Builds the clock of `archive` as of `last_update`.
    pub fn new(archive: &ArchiveDef, pdp_step: u64, current_row: usize, last_update: i64) -> Self {
        let row_span = archive.row_span(pdp_step);
        Self {
            row_span,
            row_count: archive.row_count,
            current_row,
            end_time: step_boundary(last_update, row_span),
        }
    }

    /// Rows between `row` and the current row, counting backwards.
    fn age(&self, row: usize) -> usize {
        (self.current_row + self.row_count - row % self.row_count) % self.row_count
    }

    /// Row whose interval contains `t`, or `None` if `t` lies after the
    /// current row or before the oldest retained row.
    pub fn row_for_time(&self, t: i64) -> Option<usize> {
        if t > self.end_time {
            return None;
        }
        let age = (self.end_time - t).div_euclid(self.row_span);
        let age = usize::try_from(age).ok()?;
        if age >= self.row_count {
            return None;
        }
        Some((self.current_row + self.row_count - age) % self.row_count)
    }

    /// Last second covered by `row`.
    pub fn end_time_for_row(&self, row: usize) -> i64 {
        self.end_time - self.age(row) as i64 * self.row_span
    }

    /// End time of the oldest retained row.
    pub fn first_time(&self) -> i64 {
        self.end_time - (self.row_count as i64 - 1) * self.row_span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::defs::CfName;
    use proptest::prelude::*;

    fn clock(pdp: usize, rows: usize, cur: usize, last: i64) -> ArchiveClock {
        let def = ArchiveDef::basic(CfName::Average, 0.5, pdp, rows).unwrap();
        ArchiveClock::new(&def, 300, cur, last)
    }

    #[test]
    fn test_step_boundary() {
        assert_eq!(step_boundary(1000, 300), 900);
        assert_eq!(step_boundary(900, 300), 900);
        assert_eq!(step_boundary(-1, 300), -300);
    }

    #[test]
    fn test_elapsed_steps() {
        assert_eq!(elapsed_steps(899, 900, 300), 1);
        assert_eq!(elapsed_steps(900, 1199, 300), 0);
        assert_eq!(elapsed_steps(900, 1200, 300), 1);
        assert_eq!(elapsed_steps(901, 2100, 300), 4);
        assert_eq!(elapsed_steps(1000, 900, 300), 0);
        assert_eq!(elapsed_steps(-1, 0, 300), 1);
        assert_eq!(elapsed_steps(-301, -1, 300), 1);
    }

    #[test]
    fn test_row_for_time() {
        let c = clock(1, 10, 3, 3000 + 17);
        assert_eq!(c.end_time, 3000);
        assert_eq!(c.row_for_time(3000), Some(3));
        assert_eq!(c.row_for_time(2701), Some(3));
        assert_eq!(c.row_for_time(2700), Some(2));
        assert_eq!(c.row_for_time(3001), None);
        // Nine rows back wraps to row 4; ten rows back is gone.
        assert_eq!(c.row_for_time(3000 - 9 * 300), Some(4));
        assert_eq!(c.row_for_time(3000 - 10 * 300), None);
        assert_eq!(c.first_time(), 3000 - 9 * 300);
    }

    #[test]
    fn test_multi_step_rows() {
        let c = clock(6, 4, 0, 7200 + 100);
        assert_eq!(c.row_span, 1800);
        assert_eq!(c.end_time, 7200);
        assert_eq!(c.end_time_for_row(0), 7200);
        assert_eq!(c.end_time_for_row(3), 5400);
        assert_eq!(c.end_time_for_row(1), 7200 - 3 * 1800);
    }

    proptest! {
        #[test]
        fn prop_row_time_roundtrip(
            rows in 1usize..500,
            cur_seed in 0usize..500,
            pdp in 1usize..12,
            last in 0i64..2_000_000_000,
            row_seed in 0usize..500,
        ) {
            let cur = cur_seed % rows;
            let row = row_seed % rows;
            let c = clock(pdp, rows, cur, last);
            let end = c.end_time_for_row(row);
            prop_assert_eq!(c.row_for_time(end), Some(row));
            prop_assert_eq!(c.row_for_time(end - c.row_span + 1), Some(row));
        }

        #[test]
        fn prop_boundary_is_aligned(t in -1_000_000i64..1_000_000, step in 1i64..10_000) {
            let b = step_boundary(t, step);
            prop_assert!(b <= t);
            prop_assert!(t - b < step);
            prop_assert_eq!(b.rem_euclid(step), 0);
        }
    }
}
