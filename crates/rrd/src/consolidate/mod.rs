//! Consolidation function engine.
//!
//! Turns closed primary data points into row values. Basic functions
//! (AVERAGE, MIN, MAX, LAST) live in [`basic`]; the Holt-Winters family in
//! [`holt_winters`], wired together by the [`graph`] of archive dependencies.
//! [`smoother`] periodically re-centres seasonal coefficients.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_rrd::consolidate::graph::ArchiveGraph;
//!
//! let graph = ArchiveGraph::resolve(&rrd.archives)?;
//! for archive in 0..graph.len() {
//!     println!("{:?}", graph.role(archive));
//! }
//! ```

pub mod basic;
pub mod graph;
pub mod holt_winters;
pub mod smoother;

use crate::format::defs::Consolidation;
use crate::format::state::{CdpState, OutputSlot, PredictorCdp, SeasonalCdp};
use crate::format::Rrd;
use graph::{ArchiveGraph, ArchiveRole};
use holt_winters::{
    current_coefficient, prediction, update_devpredict, update_devseasonal, update_failures,
    update_predictor, update_seasonal, HwMath,
};

fn predictor_state(rrd: &Rrd, archive: usize, ds: usize) -> (PredictorCdp, HwMath) {
    let cdp = match rrd.cdp(archive, ds) {
        CdpState::Predictor(p) => *p,
        _ => PredictorCdp::initial(),
    };
    (cdp, HwMath::of(&rrd.archives[archive].cf))
}

fn seasonal_state(rrd: &Rrd, archive: usize, ds: usize) -> SeasonalCdp {
    match rrd.cdp(archive, ds) {
        CdpState::Seasonal(s) => *s,
        _ => SeasonalCdp::initial(),
    }
}

/// Runs one step of a single-step archive for one data source.
///
/// The output slot is first set to the observation, which is all a basic
/// archive needs; Holt-Winters archives then overwrite it. `next` is the
/// stored coefficient that seasonal archives load for the following step.
pub(crate) fn update_step(
    rrd: &mut Rrd,
    graph: &ArchiveGraph,
    archive: usize,
    ds: usize,
    slot: OutputSlot,
    observed: f64,
    next: f64,
) {
    rrd.cdp_mut(archive, ds).out_mut().set(slot, observed);
    let cf = rrd.archives[archive].cf;

    match (graph.role(archive), cf) {
        (ArchiveRole::Predictor { seasonal }, Consolidation::HwPredict(params))
        | (ArchiveRole::Predictor { seasonal }, Consolidation::MhwPredict(params)) => {
            let coefficient =
                current_coefficient(&seasonal_state(rrd, seasonal.index, ds), seasonal.freshness);
            let math = HwMath::of(&cf);
            if let CdpState::Predictor(p) = rrd.cdp_mut(archive, ds) {
                update_predictor(p, &params, math, coefficient, slot, observed);
            }
        }
        (ArchiveRole::Seasonal { predictor }, Consolidation::Seasonal(params)) => {
            let (p, math) = predictor_state(rrd, predictor.index, ds);
            let predict_params = match rrd.archives[predictor.index].cf {
                Consolidation::HwPredict(pp) | Consolidation::MhwPredict(pp) => pp,
                _ => return,
            };
            if let CdpState::Seasonal(s) = rrd.cdp_mut(archive, ds) {
                update_seasonal(
                    s,
                    &params,
                    &p,
                    &predict_params,
                    predictor.freshness,
                    math,
                    next,
                    slot,
                    observed,
                );
            }
        }
        (ArchiveRole::DevSeasonal { predictor, seasonal }, Consolidation::DevSeasonal(params)) => {
            let (p, math) = predictor_state(rrd, predictor.index, ds);
            let coefficient =
                current_coefficient(&seasonal_state(rrd, seasonal.index, ds), seasonal.freshness);
            if let CdpState::Seasonal(s) = rrd.cdp_mut(archive, ds) {
                update_devseasonal(
                    s,
                    &params,
                    &p,
                    predictor.freshness,
                    coefficient,
                    math,
                    next,
                    slot,
                    observed,
                );
            }
        }
        (ArchiveRole::DevPredict { devseasonal }, _) => {
            let deviation = seasonal_state(rrd, devseasonal.index, ds);
            if let CdpState::DevPredict(out) = rrd.cdp_mut(archive, ds) {
                update_devpredict(out, &deviation, devseasonal.freshness, slot);
            }
        }
        (
            ArchiveRole::Failures {
                devseasonal,
                predictor,
                seasonal,
            },
            Consolidation::Failures(params),
        ) => {
            let deviation = current_coefficient(
                &seasonal_state(rrd, devseasonal.index, ds),
                devseasonal.freshness,
            );
            let coefficient =
                current_coefficient(&seasonal_state(rrd, seasonal.index, ds), seasonal.freshness);
            let (p, math) = predictor_state(rrd, predictor.index, ds);
            let predicted = prediction(&p, predictor.freshness, coefficient, math);
            if let CdpState::Failures(f) = rrd.cdp_mut(archive, ds) {
                update_failures(f, &params, deviation, predicted, slot, observed);
            }
        }
        _ => {}
    }
}
