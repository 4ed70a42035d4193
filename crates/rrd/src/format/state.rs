//! Live accumulator state: PDP and CDP preparation areas.
//!
//! Both areas are stored on disk as ten 8-byte scratch words whose meaning
//! depends on the owning data source or archive. Words holding counts are
//! unsigned integers, the rest are native doubles.

use crate::format::defs::{Consolidation, MAX_FAILURES_WINDOW_LEN};

/// Number of scratch words per PDP or CDP preparation block.
pub const SCRATCH_WORDS: usize = 10;

/// Raw scratch words of one preparation block.
pub type Scratch = [u64; SCRATCH_WORDS];

/// Length of the `last_ds` field, including its NUL terminator.
pub const LAST_DS_LEN: usize = 30;

/// Season wraps during which the smoother runs on every wrap, before it
/// switches to running once per season at the smoothing index.
pub const BURNIN_CYCLES: u64 = 3;

// PDP slots
const PDP_UNKN_SEC_CNT: usize = 0;
const PDP_VAL: usize = 1;

// CDP slots
const CDP_VAL: usize = 0;
const CDP_UNKN_PDP_CNT: usize = 1;
const CDP_HW_INTERCEPT: usize = 2;
const CDP_HW_LAST_INTERCEPT: usize = 3;
const CDP_HW_SLOPE: usize = 4;
const CDP_HW_LAST_SLOPE: usize = 5;
const CDP_NULL_COUNT: usize = 6;
const CDP_LAST_NULL_COUNT: usize = 7;
const CDP_PRIMARY_VAL: usize = 8;
const CDP_SECONDARY_VAL: usize = 9;

fn f(raw: &Scratch, slot: usize) -> f64 {
    f64::from_bits(raw[slot])
}

/// Per data source accumulator between step boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct PdpPrep {
    /// Raw text of the previous reading, `"U"` when unknown.
    pub last_ds: String,
    /// Seconds of the current step with no known rate.
    pub unknown_seconds: u64,
    /// Accumulated rate x seconds for the current step.
    pub value: f64,
}

impl PdpPrep {
    /// Initial state for a file whose last update is `start`.
    pub fn initial(start: i64, step: u64) -> Self {
        Self {
            last_ds: "UNKN".to_string(),
            unknown_seconds: start.rem_euclid(step as i64) as u64,
            value: 0.0,
        }
    }

    /// Replaces `last_ds`, truncating to the on-disk capacity.
    pub fn set_last_ds(&mut self, raw: &str) {
        let mut end = raw.len().min(LAST_DS_LEN - 1);
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        self.last_ds.clear();
        self.last_ds.push_str(&raw[..end]);
    }

    /// Returns true when the previous reading is unknown.
    pub fn last_is_unknown(&self) -> bool {
        self.last_ds.starts_with('U')
    }

    pub(crate) fn from_raw(last_ds: String, raw: &Scratch) -> Self {
        Self {
            last_ds,
            unknown_seconds: raw[PDP_UNKN_SEC_CNT],
            value: f(raw, PDP_VAL),
        }
    }

    pub(crate) fn to_raw(&self) -> Scratch {
        let mut raw = [0u64; SCRATCH_WORDS];
        raw[PDP_UNKN_SEC_CNT] = self.unknown_seconds;
        raw[PDP_VAL] = self.value.to_bits();
        raw
    }
}

/// Which output slot of a CDP an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
    /// First row written by the current update.
    Primary,
    /// Fill value for any further rows.
    Secondary,
}

/// Row outputs shared by every CDP kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdpOutput {
    /// Value of the first row to write.
    pub primary: f64,
    /// Value of any additional rows.
    pub secondary: f64,
}

impl CdpOutput {
    /// Returns the value of `slot`.
    pub fn get(&self, slot: OutputSlot) -> f64 {
        match slot {
            OutputSlot::Primary => self.primary,
            OutputSlot::Secondary => self.secondary,
        }
    }

    /// Sets the value of `slot`.
    pub fn set(&mut self, slot: OutputSlot, value: f64) {
        match slot {
            OutputSlot::Primary => self.primary = value,
            OutputSlot::Secondary => self.secondary = value,
        }
    }

    fn from_raw(raw: &Scratch) -> Self {
        Self {
            primary: f(raw, CDP_PRIMARY_VAL),
            secondary: f(raw, CDP_SECONDARY_VAL),
        }
    }

    fn write_raw(&self, raw: &mut Scratch) {
        raw[CDP_PRIMARY_VAL] = self.primary.to_bits();
        raw[CDP_SECONDARY_VAL] = self.secondary.to_bits();
    }
}

impl Default for CdpOutput {
    fn default() -> Self {
        Self {
            primary: 0.0,
            secondary: 0.0,
        }
    }
}

/// Accumulator of AVERAGE, MIN, MAX and LAST archives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicCdp {
    /// Running sum, minimum, maximum or last value.
    pub value: f64,
    /// Unknown primary steps in the current row.
    pub unknown_pdp_count: u64,
    /// Row outputs.
    pub out: CdpOutput,
}

/// Holt-Winters predictor coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorCdp {
    /// Baseline.
    pub intercept: f64,
    /// Baseline before the latest update.
    pub last_intercept: f64,
    /// Trend.
    pub slope: f64,
    /// Trend before the latest update.
    pub last_slope: f64,
    /// Steps since the last known observation.
    pub null_count: u64,
    /// `null_count` before the latest update.
    pub last_null_count: u64,
    /// Row outputs.
    pub out: CdpOutput,
}

impl PredictorCdp {
    /// Uninitialized model.
    pub fn initial() -> Self {
        Self {
            intercept: f64::NAN,
            last_intercept: f64::NAN,
            slope: f64::NAN,
            last_slope: f64::NAN,
            null_count: 1,
            last_null_count: 1,
            out: CdpOutput::default(),
        }
    }
}

/// SEASONAL or DEVSEASONAL coefficients for the current season position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalCdp {
    /// Coefficient for the upcoming step.
    pub coefficient: f64,
    /// Coefficient before the latest update.
    pub last_coefficient: f64,
    /// Burn-in cycle counter, meaningful for the first data source only.
    pub burn_in_cycles: u64,
    /// Row outputs.
    pub out: CdpOutput,
}

impl SeasonalCdp {
    /// Uninitialized coefficients with a fresh burn-in counter.
    pub fn initial() -> Self {
        Self {
            coefficient: f64::NAN,
            last_coefficient: f64::NAN,
            burn_in_cycles: 1,
            out: CdpOutput::default(),
        }
    }
}

/// FAILURES violation history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailuresCdp {
    /// Most recent first.
    pub violations: [bool; MAX_FAILURES_WINDOW_LEN],
    /// Row outputs.
    pub out: CdpOutput,
}

impl FailuresCdp {
    /// Empty history.
    pub fn initial() -> Self {
        Self {
            violations: [false; MAX_FAILURES_WINDOW_LEN],
            out: CdpOutput::default(),
        }
    }

    /// Forgets all recorded violations.
    pub fn erase(&mut self) {
        self.violations = [false; MAX_FAILURES_WINDOW_LEN];
    }
}

/// Accumulator of one (archive, data source) pair, typed by archive kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CdpState {
    /// AVERAGE, MIN, MAX, LAST.
    Basic(BasicCdp),
    /// HWPREDICT, MHWPREDICT.
    Predictor(PredictorCdp),
    /// SEASONAL, DEVSEASONAL.
    Seasonal(SeasonalCdp),
    /// DEVPREDICT.
    DevPredict(CdpOutput),
    /// FAILURES.
    Failures(FailuresCdp),
}

impl CdpState {
    /// Initial state of a freshly created archive.
    ///
    /// `start` is the file's creation time; basic archives count the steps of
    /// their first row that lie before it as unknown.
    pub fn initial(cf: &Consolidation, pdp_count: usize, start: i64, step: u64) -> Self {
        match cf {
            Consolidation::HwPredict(_) | Consolidation::MhwPredict(_) => {
                CdpState::Predictor(PredictorCdp::initial())
            }
            Consolidation::Seasonal(_) | Consolidation::DevSeasonal(_) => {
                CdpState::Seasonal(SeasonalCdp::initial())
            }
            Consolidation::DevPredict(_) => CdpState::DevPredict(CdpOutput::default()),
            Consolidation::Failures(_) => CdpState::Failures(FailuresCdp::initial()),
            _ => {
                let step = step as i64;
                let unknown_seconds = start.rem_euclid(step);
                let row_span = step * pdp_count as i64;
                CdpState::Basic(BasicCdp {
                    value: f64::NAN,
                    unknown_pdp_count: ((start - unknown_seconds).rem_euclid(row_span) / step)
                        as u64,
                    out: CdpOutput::default(),
                })
            }
        }
    }

    /// Returns the row outputs.
    pub fn out(&self) -> &CdpOutput {
        match self {
            CdpState::Basic(s) => &s.out,
            CdpState::Predictor(s) => &s.out,
            CdpState::Seasonal(s) => &s.out,
            CdpState::DevPredict(out) => out,
            CdpState::Failures(s) => &s.out,
        }
    }

    /// Returns the row outputs mutably.
    pub fn out_mut(&mut self) -> &mut CdpOutput {
        match self {
            CdpState::Basic(s) => &mut s.out,
            CdpState::Predictor(s) => &mut s.out,
            CdpState::Seasonal(s) => &mut s.out,
            CdpState::DevPredict(out) => out,
            CdpState::Failures(s) => &mut s.out,
        }
    }

    /// Returns the basic accumulator, if this is one.
    pub fn as_basic(&self) -> Option<&BasicCdp> {
        match self {
            CdpState::Basic(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the predictor coefficients, if this is one.
    pub fn as_predictor(&self) -> Option<&PredictorCdp> {
        match self {
            CdpState::Predictor(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the seasonal coefficients, if this is one.
    pub fn as_seasonal(&self) -> Option<&SeasonalCdp> {
        match self {
            CdpState::Seasonal(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn from_raw(cf: &Consolidation, raw: &Scratch) -> Self {
        let out = CdpOutput::from_raw(raw);
        match cf {
            Consolidation::HwPredict(_) | Consolidation::MhwPredict(_) => {
                CdpState::Predictor(PredictorCdp {
                    intercept: f(raw, CDP_HW_INTERCEPT),
                    last_intercept: f(raw, CDP_HW_LAST_INTERCEPT),
                    slope: f(raw, CDP_HW_SLOPE),
                    last_slope: f(raw, CDP_HW_LAST_SLOPE),
                    null_count: raw[CDP_NULL_COUNT],
                    last_null_count: raw[CDP_LAST_NULL_COUNT],
                    out,
                })
            }
            Consolidation::Seasonal(_) | Consolidation::DevSeasonal(_) => {
                CdpState::Seasonal(SeasonalCdp {
                    coefficient: f(raw, CDP_HW_INTERCEPT),
                    last_coefficient: f(raw, CDP_HW_LAST_INTERCEPT),
                    burn_in_cycles: raw[CDP_NULL_COUNT],
                    out,
                })
            }
            Consolidation::DevPredict(_) => CdpState::DevPredict(out),
            Consolidation::Failures(_) => {
                // Violation flags overlay the first scratch words as bytes.
                let mut violations = [false; MAX_FAILURES_WINDOW_LEN];
                for (i, flag) in violations.iter_mut().enumerate() {
                    *flag = raw[i / 8].to_ne_bytes()[i % 8] != 0;
                }
                CdpState::Failures(FailuresCdp { violations, out })
            }
            _ => CdpState::Basic(BasicCdp {
                value: f(raw, CDP_VAL),
                unknown_pdp_count: raw[CDP_UNKN_PDP_CNT],
                out,
            }),
        }
    }

    pub(crate) fn to_raw(&self) -> Scratch {
        let mut raw = [0u64; SCRATCH_WORDS];
        match self {
            CdpState::Basic(s) => {
                raw[CDP_VAL] = s.value.to_bits();
                raw[CDP_UNKN_PDP_CNT] = s.unknown_pdp_count;
            }
            CdpState::Predictor(s) => {
                raw[CDP_HW_INTERCEPT] = s.intercept.to_bits();
                raw[CDP_HW_LAST_INTERCEPT] = s.last_intercept.to_bits();
                raw[CDP_HW_SLOPE] = s.slope.to_bits();
                raw[CDP_HW_LAST_SLOPE] = s.last_slope.to_bits();
                raw[CDP_NULL_COUNT] = s.null_count;
                raw[CDP_LAST_NULL_COUNT] = s.last_null_count;
            }
            CdpState::Seasonal(s) => {
                raw[CDP_HW_INTERCEPT] = s.coefficient.to_bits();
                raw[CDP_HW_LAST_INTERCEPT] = s.last_coefficient.to_bits();
                raw[CDP_NULL_COUNT] = s.burn_in_cycles;
            }
            CdpState::DevPredict(_) => {}
            CdpState::Failures(s) => {
                let mut bytes = [0u8; 32];
                for (byte, flag) in bytes.iter_mut().zip(s.violations.iter()) {
                    *byte = u8::from(*flag);
                }
                for (word, chunk) in raw.iter_mut().zip(bytes.chunks_exact(8)) {
                    *word = u64::from_ne_bytes(chunk.try_into().unwrap());
                }
            }
        }
        self.out().write_raw(&mut raw);
        raw
    }
}
