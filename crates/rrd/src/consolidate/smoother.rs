//! Periodic smoothing of seasonal coefficients.
//!
//! Replaces every column of a SEASONAL or DEVSEASONAL archive by its centred
//! circular moving average. For SEASONAL archives the mean of the smoothed
//! season is then moved out of the coefficients and into the predictor's
//! intercept, keeping predictions unchanged while the coefficients stay
//! centred on the identity.

use crate::consolidate::graph::{ArchiveGraph, ArchiveRole};
use crate::consolidate::holt_winters::HwMath;
use crate::format::defs::Consolidation;
use crate::format::state::CdpState;
use crate::format::Rrd;
use tracing::{debug, warn};

/// Half-width of the moving average window for a season of `rows` rows.
pub fn half_width(smoothing_window: f64, rows: usize) -> usize {
    (smoothing_window / 2.0 * rows as f64).floor() as usize
}

/// Centred circular moving average of one column.
fn smooth_column(column: &[f64], half: usize) -> Vec<f64> {
    let rows = column.len();
    let width = 2 * half + 1;
    let mut sum: f64 = (0..width)
        .map(|k| column[(k + rows - half % rows) % rows])
        .sum();
    let mut out = Vec::with_capacity(rows);
    for centre in 0..rows {
        out.push(sum / width as f64);
        let leaving = (centre + rows - half % rows) % rows;
        let entering = (centre + half + 1) % rows;
        sum += column[entering] - column[leaving];
    }
    out
}

/// Smooths the SEASONAL or DEVSEASONAL `archive`.
///
/// Returns false without changing anything if the window is narrower than
/// one row on each side or any coefficient is still unknown.
pub fn apply_smoother(rrd: &mut Rrd, graph: &ArchiveGraph, archive: usize) -> bool {
    let params = match rrd.archives[archive].cf {
        Consolidation::Seasonal(p) | Consolidation::DevSeasonal(p) => p,
        _ => return false,
    };
    let ds_count = rrd.ds_count();
    let rows = rrd.archives[archive].row_count;
    let half = half_width(params.smoothing_window, rows);
    if half == 0 {
        return false;
    }
    if rrd
        .values
        .archive(archive)
        .as_slice()
        .iter()
        .any(|v| v.is_nan())
    {
        warn!(archive, "smoothing skipped, season not fully initialized");
        return false;
    }

    let baseline_target = match graph.role(archive) {
        ArchiveRole::Seasonal { predictor } => Some((
            predictor.index,
            HwMath::of(&rrd.archives[predictor.index].cf),
        )),
        _ => None,
    };

    for ds in 0..ds_count {
        let column: Vec<f64> = {
            let block = rrd.values.archive(archive);
            (0..rows).map(|row| block.get(row, ds)).collect()
        };
        let mut smoothed = smooth_column(&column, half);

        if let Some((predictor, math)) = baseline_target {
            let baseline = smoothed.iter().sum::<f64>() / rows as f64;
            for value in smoothed.iter_mut() {
                *value = math.remove(*value, baseline);
            }
            if let CdpState::Predictor(p) = rrd.cdp_mut(predictor, ds) {
                p.intercept = math.combine(p.intercept, baseline);
            }
        }

        let mut block = rrd.values.archive_mut(archive);
        for (row, value) in smoothed.into_iter().enumerate() {
            block.set(row, ds, value);
        }
    }
    debug!(archive, half, "applied seasonal smoother");
    true
}
