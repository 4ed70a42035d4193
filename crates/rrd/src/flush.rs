//! CDP-to-RRA flush engine.
//!
//! Runs once per sample that crosses at least one step boundary. For every
//! archive it works out how many rows complete, feeds the closed step rates
//! through the archive's consolidation function and writes the finished rows
//! into the value area, advancing the archive's current row.
//!
//! Single-step archives are updated step by step for the first two elapsed
//! steps (primary then secondary output). Longer gaps are bulk updates:
//! basic archives fill every row with the same rate while the Holt-Winters
//! family stops learning until the next regular sample.

use crate::consolidate::basic::{self, RowProgress};
use crate::consolidate::graph::ArchiveGraph;
use crate::consolidate::holt_winters::lookup_seasonal;
use crate::consolidate::update_step;
use crate::format::defs::Consolidation;
use crate::format::state::{CdpState, OutputSlot, BURNIN_CYCLES};
use crate::format::Rrd;
use tracing::debug;

/// A row written to an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenRow {
    /// Archive index.
    pub archive: usize,
    /// Physical row index.
    pub row: usize,
    /// Last second covered by the row.
    pub time: i64,
    /// One value per data source.
    pub values: Vec<f64>,
}

/// Steps completing rows in each archive.
fn row_step_counts(rrd: &Rrd, prev_boundary: i64, elapsed: u64) -> Vec<(u64, u64)> {
    let step = rrd.step() as i64;
    rrd.archives
        .iter()
        .map(|archive| {
            let pdp_count = archive.pdp_count as u64;
            let start_offset = pdp_count - (prev_boundary.div_euclid(step) as u64) % pdp_count;
            let step_count = if start_offset <= elapsed {
                (elapsed - start_offset) / pdp_count + 1
            } else {
                0
            };
            (start_offset, step_count)
        })
        .collect()
}

/// Advances the smoothing schedule of a seasonal archive.
///
/// The first cycles through the season always smooth; afterwards the
/// smoother runs whenever the archive passes its smoothing index.
fn schedule_smoothing(rrd: &mut Rrd, archive: usize, smooth_index: usize, elapsed: u64) -> bool {
    let rows = rrd.archives[archive].row_count as u64;
    let current = rrd.current_rows[archive] as u64;
    let smooth_index = smooth_index as u64;
    let reached = current + elapsed;

    let burn_in = match rrd.cdp_mut(archive, 0) {
        CdpState::Seasonal(s) => &mut s.burn_in_cycles,
        _ => return false,
    };
    if *burn_in <= BURNIN_CYCLES {
        if reached > rows - 1 {
            *burn_in += 1;
            return true;
        }
        false
    } else if smooth_index > current {
        reached >= smooth_index
    } else {
        reached >= rows && reached - rows >= smooth_index
    }
}

/// Applies the bulk rules to a single-step archive after more than two
/// elapsed steps.
fn bulk_single_step(
    rrd: &mut Rrd,
    archive: usize,
    rates: &[f64],
    elapsed: u64,
    seasonal_lookup: Option<&(Vec<f64>, Vec<f64>)>,
) {
    for (ds, &rate) in rates.iter().enumerate() {
        match rrd.cdp_mut(archive, ds) {
            CdpState::Basic(cdp) => {
                cdp.out.primary = rate;
                cdp.out.secondary = rate;
            }
            CdpState::Seasonal(cdp) => {
                if let Some((last, next)) = seasonal_lookup {
                    cdp.last_coefficient = last[ds];
                    cdp.coefficient = next[ds];
                }
            }
            CdpState::Predictor(cdp) => {
                // Not learning from bulk updates, but the trend moves on.
                cdp.null_count += elapsed;
                cdp.last_null_count += elapsed - 1;
                cdp.out.primary = f64::NAN;
                cdp.out.secondary = f64::NAN;
            }
            CdpState::DevPredict(out) => {
                out.primary = f64::NAN;
                out.secondary = f64::NAN;
            }
            CdpState::Failures(cdp) => {
                // Missed steps never count as failures.
                cdp.out.primary = 0.0;
                cdp.out.secondary = 0.0;
                cdp.erase();
            }
        }
    }
}

/// Folds `elapsed` closed steps of `rates` into every archive and writes
/// completed rows.
///
/// `prev_boundary` is the step boundary at or before the previous update and
/// `boundary` the one at or before the new update. Written rows are appended
/// to `written`. Returns true if a seasonal smoothing pass is due.
pub(crate) fn flush(
    rrd: &mut Rrd,
    graph: &ArchiveGraph,
    rates: &[f64],
    prev_boundary: i64,
    boundary: i64,
    elapsed: u64,
    written: &mut Vec<WrittenRow>,
) -> bool {
    let mut counts = row_step_counts(rrd, prev_boundary, elapsed);
    let mut schedule_smooth = false;

    for archive in 0..rrd.archives.len() {
        let def = rrd.archives[archive];
        let (start_offset, step_count) = counts[archive];
        let mut seasonal_lookup = None;

        if let Consolidation::Seasonal(params) | Consolidation::DevSeasonal(params) = def.cf {
            if step_count > 2 {
                // Bulk update: skip ahead so the coefficients line up with
                // the next regular sample.
                counts[archive].1 = 0;
                seasonal_lookup = Some((
                    lookup_seasonal(rrd, archive, elapsed),
                    lookup_seasonal(rrd, archive, elapsed + 1),
                ));
            }
            if schedule_smoothing(rrd, archive, params.smooth_index, elapsed) {
                debug!(archive, "smoothing scheduled");
                schedule_smooth = true;
            }
        }

        if def.pdp_count > 1 {
            let (cf, xff) = match def.cf.basic() {
                Some(params) => (def.cf.cf_name(), params.xff),
                None => continue,
            };
            let progress = RowProgress {
                pdp_count: def.pdp_count as u64,
                elapsed,
                start_offset,
            };
            for (ds, &rate) in rates.iter().enumerate() {
                if let CdpState::Basic(cdp) = rrd.cdp_mut(archive, ds) {
                    if step_count > 0 {
                        basic::complete_rows(cdp, cf, xff, rate, progress);
                    } else {
                        basic::accumulate(cdp, cf, rate, elapsed);
                    }
                }
            }
        } else if elapsed > 2 {
            bulk_single_step(rrd, archive, rates, elapsed, seasonal_lookup.as_ref());
        }
    }

    // At most two steps: run every single-step archive step by step, in
    // index order so dependencies see consistent freshness.
    if elapsed <= 2 {
        for j in 0..elapsed {
            let slot = if j == 0 {
                OutputSlot::Primary
            } else {
                OutputSlot::Secondary
            };
            for archive in 0..rrd.archives.len() {
                if rrd.archives[archive].pdp_count > 1 {
                    continue;
                }
                let next = match rrd.archives[archive].cf {
                    Consolidation::Seasonal(_) | Consolidation::DevSeasonal(_) => {
                        Some(lookup_seasonal(rrd, archive, elapsed + 1 + j))
                    }
                    _ => None,
                };
                for (ds, &rate) in rates.iter().enumerate() {
                    let next_coefficient = next.as_ref().map_or(f64::NAN, |n| n[ds]);
                    update_step(rrd, graph, archive, ds, slot, rate, next_coefficient);
                }
            }
        }
    }

    for (archive, &(_, step_count)) in counts.iter().enumerate() {
        if step_count > 0 {
            write_rows(rrd, archive, step_count, boundary, written);
        }
    }
    schedule_smooth
}

/// Writes `step_count` rows to `archive`: the primary output first, then the
/// secondary output for every further row.
fn write_rows(
    rrd: &mut Rrd,
    archive: usize,
    step_count: u64,
    boundary: i64,
    written: &mut Vec<WrittenRow>,
) {
    let ds_count = rrd.ds_count();
    let rows = rrd.archives[archive].row_count as u64;
    let span = rrd.archives[archive].row_span(rrd.step());
    let row_boundary = boundary - boundary.rem_euclid(span);
    let current = rrd.current_rows[archive] as u64;

    // Earlier rows of a gap longer than the archive would be overwritten.
    let first = step_count.saturating_sub(rows);
    for k in first..step_count {
        let row = ((current + 1 + k % rows) % rows) as usize;
        let slot = if k == 0 {
            OutputSlot::Primary
        } else {
            OutputSlot::Secondary
        };
        let values: Vec<f64> = (0..ds_count)
            .map(|ds| rrd.cdp(archive, ds).out().get(slot))
            .collect();
        rrd.values.archive_mut(archive).row_mut(row).copy_from_slice(&values);
        written.push(WrittenRow {
            archive,
            row,
            time: row_boundary - (step_count - 1 - k) as i64 * span,
            values,
        });
    }
    rrd.current_rows[archive] = ((current + step_count % rows) % rows) as usize;
    debug!(archive, step_count, current_row = rrd.current_rows[archive], "rows written");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::defs::{ArchiveDef, CfName, DataSourceDef};
    use crate::format::state::PdpPrep;
    use crate::format::{LiveHeader, StaticHeader, DEFAULT_VERSION};
    use crate::values::ValueArea;

    fn rrd(archives: Vec<ArchiveDef>) -> Rrd {
        let row_counts: Vec<usize> = archives.iter().map(|a| a.row_count).collect();
        Rrd {
            header: StaticHeader {
                version: DEFAULT_VERSION,
                ds_count: 1,
                rra_count: archives.len(),
                pdp_step: 300,
            },
            data_sources: vec![DataSourceDef::gauge("x", 600).unwrap()],
            live: LiveHeader::default(),
            pdp: vec![PdpPrep::initial(0, 300)],
            cdp: archives
                .iter()
                .map(|a| CdpState::initial(&a.cf, a.pdp_count, 0, 300))
                .collect(),
            current_rows: row_counts.iter().map(|r| r - 1).collect(),
            values: ValueArea::new(&row_counts, 1).unwrap(),
            archives,
        }
    }

    #[test]
    fn test_single_step_writes_one_row() {
        let mut rrd = rrd(vec![ArchiveDef::basic(CfName::Average, 0.5, 1, 4).unwrap()]);
        let graph = ArchiveGraph::resolve(&rrd.archives).unwrap();
        let mut written = Vec::new();
        flush(&mut rrd, &graph, &[5.0], 0, 300, 1, &mut written);
        assert_eq!(rrd.current_rows[0], 0);
        assert_eq!(rrd.values.archive(0).get(0, 0), 5.0);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].time, 300);
    }

    #[test]
    fn test_bulk_fill_and_times() {
        let mut rrd = rrd(vec![ArchiveDef::basic(CfName::Average, 0.5, 1, 10).unwrap()]);
        let graph = ArchiveGraph::resolve(&rrd.archives).unwrap();
        let mut written = Vec::new();
        flush(&mut rrd, &graph, &[2.0], 0, 1500, 5, &mut written);
        assert_eq!(written.len(), 5);
        let times: Vec<i64> = written.iter().map(|w| w.time).collect();
        assert_eq!(times, vec![300, 600, 900, 1200, 1500]);
        assert!(written.iter().all(|w| w.values == vec![2.0]));
        assert_eq!(rrd.current_rows[0], 4);
    }

    #[test]
    fn test_gap_longer_than_archive_caps_writes() {
        let mut rrd = rrd(vec![ArchiveDef::basic(CfName::Last, 0.5, 1, 3).unwrap()]);
        let graph = ArchiveGraph::resolve(&rrd.archives).unwrap();
        let mut written = Vec::new();
        flush(&mut rrd, &graph, &[1.0], 0, 3000, 10, &mut written);
        assert_eq!(written.len(), 3);
        assert_eq!(written.last().unwrap().time, 3000);
        // Ten rows written from row 2: the pointer lands on (2 + 10) % 3.
        assert_eq!(rrd.current_rows[0], 0);
        assert_eq!(written.last().unwrap().row, 0);
    }

    #[test]
    fn test_multi_step_archive_waits_for_row() {
        let mut rrd = rrd(vec![ArchiveDef::basic(CfName::Average, 0.5, 2, 4).unwrap()]);
        let graph = ArchiveGraph::resolve(&rrd.archives).unwrap();
        let mut written = Vec::new();
        // From 0 the row ends at 600: one step leaves it open.
        flush(&mut rrd, &graph, &[4.0], 0, 300, 1, &mut written);
        assert!(written.is_empty());
        flush(&mut rrd, &graph, &[8.0], 300, 600, 1, &mut written);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].values, vec![6.0]);
        assert_eq!(written[0].time, 600);
    }
}
