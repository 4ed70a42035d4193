//! Holt-Winters forecasting and aberrant behavior detection.
//!
//! A predictor archive (HWPREDICT or MHWPREDICT) keeps intercept and slope,
//! its SEASONAL archive keeps one coefficient per position in the season.
//! DEVSEASONAL tracks the smoothed absolute prediction error per position,
//! DEVPREDICT copies it into a longer history, and FAILURES flags windows
//! where too many observations fall outside the confidence band.
//!
//! Every function here updates one (archive, data source) pair for one step.
//! The observation arrives as the step rate and the output slot receives the
//! value to be written to the archive row.

use crate::consolidate::graph::Freshness;
use crate::format::defs::{Consolidation, FailuresParams, PredictParams, SeasonalParams};
use crate::format::state::{
    CdpOutput, CdpState, FailuresCdp, OutputSlot, PredictorCdp, SeasonalCdp,
};
use crate::format::Rrd;
use tracing::debug;

/// How the seasonal coefficient combines with the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwMath {
    /// `prediction = intercept + slope * n + seasonal`
    Additive,
    /// `prediction = (intercept + slope * n) * seasonal`
    Multiplicative,
}

impl HwMath {
    /// Model variant of a predictor archive, additive for anything else.
    pub fn of(cf: &Consolidation) -> Self {
        match cf {
            Consolidation::MhwPredict(_) => HwMath::Multiplicative,
            _ => HwMath::Additive,
        }
    }

    /// Neutral seasonal coefficient.
    pub fn identity(self) -> f64 {
        match self {
            HwMath::Additive => 0.0,
            HwMath::Multiplicative => 1.0,
        }
    }

    /// Combines a baseline and a seasonal coefficient.
    pub fn combine(self, baseline: f64, seasonal: f64) -> f64 {
        match self {
            HwMath::Additive => baseline + seasonal,
            HwMath::Multiplicative => baseline * seasonal,
        }
    }

    /// Removes `part` from `value`: the seasonal effect from an observation
    /// or the baseline from an observation.
    pub fn remove(self, value: f64, part: f64) -> f64 {
        match self {
            HwMath::Additive => value - part,
            HwMath::Multiplicative => value / part,
        }
    }
}

/// Learning phase of a predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwPhase {
    /// No intercept yet; the next known observation initializes it.
    Uninitialized,
    /// Intercept known, but slope or seasonal coefficient still unknown.
    Bootstrapping,
    /// All coefficients known; predictions are produced.
    Steady,
}

impl HwPhase {
    /// Phase of `predictor` given the seasonal coefficient for this step.
    pub fn of(predictor: &PredictorCdp, seasonal: f64) -> Self {
        if predictor.intercept.is_nan() {
            HwPhase::Uninitialized
        } else if predictor.slope.is_nan() || seasonal.is_nan() {
            HwPhase::Bootstrapping
        } else {
            HwPhase::Steady
        }
    }
}

/// Seasonal coefficient that applies to the current step.
pub fn current_coefficient(seasonal: &SeasonalCdp, freshness: Freshness) -> f64 {
    match freshness {
        Freshness::AlreadyUpdated => seasonal.last_coefficient,
        Freshness::Pending => seasonal.coefficient,
    }
}

/// Prediction for the current step, or NaN if any coefficient is unknown.
pub fn prediction(
    predictor: &PredictorCdp,
    freshness: Freshness,
    seasonal: f64,
    math: HwMath,
) -> f64 {
    let (intercept, slope, nulls) = match freshness {
        Freshness::AlreadyUpdated => (
            predictor.last_intercept,
            predictor.last_slope,
            predictor.last_null_count,
        ),
        Freshness::Pending => (predictor.intercept, predictor.slope, predictor.null_count),
    };
    if intercept.is_nan() || slope.is_nan() || seasonal.is_nan() {
        return f64::NAN;
    }
    math.combine(intercept + slope * nulls as f64, seasonal)
}

/// Updates a predictor with one observation.
pub fn update_predictor(
    cdp: &mut PredictorCdp,
    params: &PredictParams,
    math: HwMath,
    seasonal: f64,
    slot: OutputSlot,
    observed: f64,
) {
    cdp.last_intercept = cdp.intercept;
    cdp.last_slope = cdp.slope;
    cdp.last_null_count = cdp.null_count;

    let mut predicted = f64::NAN;
    match HwPhase::of(cdp, seasonal) {
        HwPhase::Uninitialized => {
            if !observed.is_nan() {
                debug!(intercept = observed, "initializing predictor");
                cdp.intercept = observed;
                cdp.last_intercept = observed;
                cdp.slope = 0.0;
                cdp.last_slope = 0.0;
                cdp.null_count = 1;
                cdp.last_null_count = 1;
            }
        }
        HwPhase::Bootstrapping => {}
        HwPhase::Steady => {
            let trend = cdp.intercept + cdp.slope * cdp.null_count as f64;
            predicted = math.combine(trend, seasonal);
            if observed.is_nan() {
                cdp.null_count += 1;
            } else {
                cdp.intercept = params.alpha * math.remove(observed, seasonal)
                    + (1.0 - params.alpha) * trend;
                cdp.slope = params.beta * (cdp.intercept - cdp.last_intercept)
                    + (1.0 - params.beta) * cdp.slope;
                cdp.null_count = 1;
            }
        }
    }
    cdp.out.set(slot, predicted);
}

/// Updates a SEASONAL coefficient with one observation.
///
/// `next` is the stored coefficient for the following step, read from the
/// archive row ahead of the write position.
#[allow(clippy::too_many_arguments)]
pub fn update_seasonal(
    cdp: &mut SeasonalCdp,
    params: &SeasonalParams,
    predictor: &PredictorCdp,
    predictor_params: &PredictParams,
    predictor_freshness: Freshness,
    math: HwMath,
    next: f64,
    slot: OutputSlot,
    observed: f64,
) {
    let seasonal = cdp.coefficient;
    cdp.last_coefficient = seasonal;
    cdp.coefficient = next;

    let gamma = params.gamma;
    let value = if observed.is_nan() {
        seasonal
    } else {
        match predictor_freshness {
            Freshness::AlreadyUpdated => {
                if predictor.last_intercept.is_nan() || predictor.last_slope.is_nan() {
                    f64::NAN
                } else if seasonal.is_nan() {
                    math.remove(observed, predictor.last_intercept)
                } else {
                    gamma * math.remove(observed, predictor.intercept) + (1.0 - gamma) * seasonal
                }
            }
            Freshness::Pending => {
                if predictor.intercept.is_nan() || predictor.slope.is_nan() {
                    // The predictor initializes from this observation.
                    math.identity()
                } else if seasonal.is_nan() {
                    math.remove(observed, predictor.intercept)
                } else {
                    let alpha = predictor_params.alpha;
                    let intercept = alpha * math.remove(observed, seasonal)
                        + (1.0 - alpha)
                            * (predictor.intercept
                                + predictor.slope * predictor.null_count as f64);
                    gamma * math.remove(observed, intercept) + (1.0 - gamma) * seasonal
                }
            }
        }
    };
    cdp.out.set(slot, value);
}

/// Updates a DEVSEASONAL deviation with one observation.
#[allow(clippy::too_many_arguments)]
pub fn update_devseasonal(
    cdp: &mut SeasonalCdp,
    params: &SeasonalParams,
    predictor: &PredictorCdp,
    predictor_freshness: Freshness,
    seasonal: f64,
    math: HwMath,
    next: f64,
    slot: OutputSlot,
    observed: f64,
) {
    cdp.last_coefficient = cdp.coefficient;
    cdp.coefficient = next;

    let predicted = prediction(predictor, predictor_freshness, seasonal, math);
    let value = if predicted.is_nan() {
        f64::NAN
    } else if observed.is_nan() {
        cdp.last_coefficient
    } else if cdp.last_coefficient.is_nan() {
        (predicted - observed).abs()
    } else {
        params.gamma * (predicted - observed).abs() + (1.0 - params.gamma) * cdp.last_coefficient
    };
    cdp.out.set(slot, value);
}

/// Copies the deviation for the current step.
pub fn update_devpredict(
    out: &mut CdpOutput,
    devseasonal: &SeasonalCdp,
    freshness: Freshness,
    slot: OutputSlot,
) {
    out.set(slot, current_coefficient(devseasonal, freshness));
}

/// Records whether the observation violates the confidence band and flags a
/// failure when the window holds at least `threshold` violations.
///
/// Observations are only judged once a deviation is known; an unknown
/// observation then counts as a violation.
pub fn update_failures(
    cdp: &mut FailuresCdp,
    params: &FailuresParams,
    deviation: f64,
    predicted: f64,
    slot: OutputSlot,
    observed: f64,
) {
    let violation = !deviation.is_nan()
        && (observed.is_nan()
            || observed > predicted + params.delta_pos * deviation
            || observed < predicted - params.delta_neg * deviation);

    let window = params.window_len.clamp(1, cdp.violations.len());
    cdp.violations.copy_within(0..window - 1, 1);
    cdp.violations[0] = violation;
    let count = cdp.violations[..window].iter().filter(|v| **v).count();

    cdp.out
        .set(slot, if count >= params.threshold { 1.0 } else { 0.0 });
}

/// Stored coefficients of the SEASONAL or DEVSEASONAL `archive` in the row
/// `offset` rows after its current row, one per data source.
pub fn lookup_seasonal(rrd: &Rrd, archive: usize, offset: u64) -> Vec<f64> {
    let rows = rrd.values.archive(archive);
    let row = rows.wrap(rrd.current_rows[archive], (offset % rows.rows() as u64) as usize);
    rows.row(row).to_vec()
}

impl Rrd {
    /// Forgets the Holt-Winters model of one data source.
    ///
    /// Predictors are re-initialized, seasonal coefficients and their
    /// archive rows become unknown, and failure histories are erased. The
    /// smoothing burn-in counters are kept so all data sources stay on the
    /// same smoothing schedule.
    ///
    /// # Panics
    ///
    /// Panics if `ds` is out of range.
    pub fn reset_aberrant_coefficients(&mut self, ds: usize) {
        assert!(ds < self.ds_count(), "data source {} out of range", ds);
        for archive in 0..self.archives.len() {
            let idx = self.cdp_index(archive, ds);
            match &mut self.cdp[idx] {
                CdpState::Predictor(p) => {
                    let out = p.out;
                    *p = PredictorCdp::initial();
                    p.out = out;
                }
                CdpState::Seasonal(s) => {
                    s.coefficient = f64::NAN;
                    s.last_coefficient = f64::NAN;
                    let mut rows = self.values.archive_mut(archive);
                    for row in 0..rows.rows() {
                        rows.set(row, ds, f64::NAN);
                    }
                }
                CdpState::Failures(f) => f.erase(),
                CdpState::Basic(_) | CdpState::DevPredict(_) => {}
            }
        }
        debug!(ds, "reset aberrant behavior coefficients");
    }
}
