//! Typed data source and archive definitions.
//!
//! On disk every definition is a fixed-size block whose parameter slots are
//! reused with different meanings depending on the type name. In memory each
//! kind carries its own parameter struct.

use crate::error::{Result, RrdError};
use std::fmt;
use std::str::FromStr;

/// Maximum data source name length in bytes (excluding the NUL terminator).
pub const DS_NAME_MAX: usize = 19;

/// Size of the opaque compiled expression carried by a COMPUTE data source.
pub const CDEF_PROGRAM_SIZE: usize = 72;

/// Longest violation window a FAILURES archive can track.
pub const MAX_FAILURES_WINDOW_LEN: usize = 28;

/// Default smoothing window for SEASONAL and DEVSEASONAL archives, as a
/// fraction of the season length.
pub const DEFAULT_SMOOTHING_WINDOW: f64 = 0.05;

/// Opaque compiled expression of a COMPUTE data source.
///
/// The bytes are produced by an external expression compiler and handed
/// unchanged to a [`ComputeEvaluator`](crate::pdp::ComputeEvaluator).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CdefProgram(pub [u8; CDEF_PROGRAM_SIZE]);

impl fmt::Debug for CdefProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.0.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
        write!(f, "CdefProgram({} bytes)", used)
    }
}

/// Acquisition type of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    /// Reading is the rate itself.
    Gauge,
    /// Monotonic integer counter with 32/64-bit wrap correction.
    Counter,
    /// Integer counter that may decrease.
    Derive,
    /// Reading is a count since the last reading.
    Absolute,
    /// Floating point counter; decreases are unknown.
    DCounter,
    /// Floating point counter that may decrease.
    DDerive,
    /// Rate computed from other data sources.
    Compute(CdefProgram),
}

impl DataSourceKind {
    /// Returns the on-disk type name.
    pub fn name(&self) -> &'static str {
        match self {
            DataSourceKind::Gauge => "GAUGE",
            DataSourceKind::Counter => "COUNTER",
            DataSourceKind::Derive => "DERIVE",
            DataSourceKind::Absolute => "ABSOLUTE",
            DataSourceKind::DCounter => "DCOUNTER",
            DataSourceKind::DDerive => "DDERIVE",
            DataSourceKind::Compute(_) => "COMPUTE",
        }
    }

    /// Returns true for kinds whose readings are integer counter values.
    pub fn is_integer_counter(&self) -> bool {
        matches!(self, DataSourceKind::Counter | DataSourceKind::Derive)
    }

    /// Returns true for kinds introduced with format version 5.
    pub fn needs_v5(&self) -> bool {
        matches!(self, DataSourceKind::DCounter | DataSourceKind::DDerive)
    }
}

/// One data source definition.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceDef {
    /// Unique name.
    pub name: String,
    /// Acquisition type.
    pub kind: DataSourceKind,
    /// Maximum seconds between readings before the source is unknown.
    pub heartbeat: u64,
    /// Minimum acceptable rate (NaN = unconstrained).
    pub min: f64,
    /// Maximum acceptable rate (NaN = unconstrained).
    pub max: f64,
}

impl DataSourceDef {
    /// Creates a definition, validating the name and bounds.
    pub fn new(
        name: impl Into<String>,
        kind: DataSourceKind,
        heartbeat: u64,
        min: f64,
        max: f64,
    ) -> Result<Self> {
        let name = name.into();
        validate_ds_name(&name)?;
        if heartbeat == 0 && !matches!(kind, DataSourceKind::Compute(_)) {
            return Err(RrdError::InvalidParameter(format!(
                "heartbeat of {} must be positive",
                name
            )));
        }
        if !min.is_nan() && !max.is_nan() && min >= max {
            return Err(RrdError::InvalidParameter(format!(
                "min must be less than max in DS definition {}",
                name
            )));
        }
        Ok(Self {
            name,
            kind,
            heartbeat,
            min,
            max,
        })
    }

    /// Shorthand for an unbounded GAUGE.
    pub fn gauge(name: impl Into<String>, heartbeat: u64) -> Result<Self> {
        Self::new(name, DataSourceKind::Gauge, heartbeat, f64::NAN, f64::NAN)
    }

    /// Shorthand for an unbounded COUNTER.
    pub fn counter(name: impl Into<String>, heartbeat: u64) -> Result<Self> {
        Self::new(name, DataSourceKind::Counter, heartbeat, f64::NAN, f64::NAN)
    }

    /// Returns true if `rate` violates the declared bounds.
    pub fn out_of_bounds(&self, rate: f64) -> bool {
        (!self.max.is_nan() && rate > self.max) || (!self.min.is_nan() && rate < self.min)
    }
}

/// Parses `DS:name:TYPE:heartbeat:min:max`.
impl FromStr for DataSourceDef {
    type Err = RrdError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || RrdError::InvalidParameter(format!("can't parse data source '{}'", s));
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 3 || parts[0] != "DS" {
            return Err(bad());
        }
        let name = parts[1];
        match parts[2] {
            "COMPUTE" => Err(RrdError::InvalidParameter(format!(
                "data source {}: COMPUTE definitions need a compiled program, \
                 use DataSourceDef::new with DataSourceKind::Compute",
                name
            ))),
            type_name => {
                if parts.len() != 6 {
                    return Err(bad());
                }
                let kind = parse_dst(type_name)?;
                let heartbeat = parts[3].parse::<u64>().map_err(|_| bad())?;
                let min = parse_bound(parts[4]).ok_or_else(bad)?;
                let max = parse_bound(parts[5]).ok_or_else(bad)?;
                Self::new(name, kind, heartbeat, min, max)
            }
        }
    }
}

/// Resolves a non-COMPUTE type name.
pub(crate) fn parse_dst(name: &str) -> Result<DataSourceKind> {
    match name {
        "GAUGE" => Ok(DataSourceKind::Gauge),
        "COUNTER" => Ok(DataSourceKind::Counter),
        "DERIVE" => Ok(DataSourceKind::Derive),
        "ABSOLUTE" => Ok(DataSourceKind::Absolute),
        "DCOUNTER" => Ok(DataSourceKind::DCounter),
        "DDERIVE" => Ok(DataSourceKind::DDerive),
        other => Err(RrdError::UnknownDataSourceType(other.to_string())),
    }
}

fn parse_bound(s: &str) -> Option<f64> {
    if s == "U" {
        Some(f64::NAN)
    } else {
        s.parse::<f64>().ok()
    }
}

pub(crate) fn validate_ds_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= DS_NAME_MAX
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(RrdError::InvalidParameter(format!(
            "invalid data source name '{}'",
            name
        )))
    }
}

/// Parameters of AVERAGE, MIN, MAX and LAST archives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicParams {
    /// Largest fraction of unknown steps still yielding a known row.
    pub xff: f64,
}

/// Parameters of HWPREDICT and MHWPREDICT archives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictParams {
    /// Intercept smoothing constant.
    pub alpha: f64,
    /// Slope smoothing constant.
    pub beta: f64,
    /// Index of the SEASONAL archive.
    pub seasonal: usize,
}

/// Parameters of SEASONAL and DEVSEASONAL archives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalParams {
    /// Seasonal smoothing constant.
    pub gamma: f64,
    /// Moving-average smoother width as a fraction of the season.
    pub smoothing_window: f64,
    /// Row at which the periodic smoother runs.
    pub smooth_index: usize,
    /// Index of the HWPREDICT or MHWPREDICT archive.
    pub predictor: usize,
}

/// Parameters of DEVPREDICT archives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevPredictParams {
    /// Index of the DEVSEASONAL archive.
    pub devseasonal: usize,
}

/// Parameters of FAILURES archives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailuresParams {
    /// Upper band width in deviations.
    pub delta_pos: f64,
    /// Lower band width in deviations.
    pub delta_neg: f64,
    /// Number of most recent steps inspected.
    pub window_len: usize,
    /// Violations within the window that declare a failure.
    pub threshold: usize,
    /// Index of the DEVSEASONAL archive.
    pub devseasonal: usize,
}

/// Consolidation function of an archive, with its typed parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Consolidation {
    /// Mean of the steps.
    Average(BasicParams),
    /// Smallest step.
    Minimum(BasicParams),
    /// Largest step.
    Maximum(BasicParams),
    /// Last step.
    Last(BasicParams),
    /// Additive Holt-Winters prediction.
    HwPredict(PredictParams),
    /// Multiplicative Holt-Winters prediction.
    MhwPredict(PredictParams),
    /// Seasonal coefficients.
    Seasonal(SeasonalParams),
    /// Seasonal deviations.
    DevSeasonal(SeasonalParams),
    /// Deviation predictions.
    DevPredict(DevPredictParams),
    /// Aberrant behavior flags.
    Failures(FailuresParams),
}

/// Consolidation function names without parameters, used for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfName {
    /// AVERAGE
    Average,
    /// MIN
    Minimum,
    /// MAX
    Maximum,
    /// LAST
    Last,
    /// HWPREDICT
    HwPredict,
    /// MHWPREDICT
    MhwPredict,
    /// SEASONAL
    Seasonal,
    /// DEVSEASONAL
    DevSeasonal,
    /// DEVPREDICT
    DevPredict,
    /// FAILURES
    Failures,
}

impl CfName {
    /// Returns the on-disk name.
    pub fn as_str(self) -> &'static str {
        match self {
            CfName::Average => "AVERAGE",
            CfName::Minimum => "MIN",
            CfName::Maximum => "MAX",
            CfName::Last => "LAST",
            CfName::HwPredict => "HWPREDICT",
            CfName::MhwPredict => "MHWPREDICT",
            CfName::Seasonal => "SEASONAL",
            CfName::DevSeasonal => "DEVSEASONAL",
            CfName::DevPredict => "DEVPREDICT",
            CfName::Failures => "FAILURES",
        }
    }
}

impl fmt::Display for CfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CfName {
    type Err = RrdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AVERAGE" => Ok(CfName::Average),
            "MIN" => Ok(CfName::Minimum),
            "MAX" => Ok(CfName::Maximum),
            "LAST" => Ok(CfName::Last),
            "HWPREDICT" => Ok(CfName::HwPredict),
            "MHWPREDICT" => Ok(CfName::MhwPredict),
            "SEASONAL" => Ok(CfName::Seasonal),
            "DEVSEASONAL" => Ok(CfName::DevSeasonal),
            "DEVPREDICT" => Ok(CfName::DevPredict),
            "FAILURES" => Ok(CfName::Failures),
            other => Err(RrdError::UnknownConsolidationFunction(other.to_string())),
        }
    }
}

impl Consolidation {
    /// Returns the parameterless name.
    pub fn cf_name(&self) -> CfName {
        match self {
            Consolidation::Average(_) => CfName::Average,
            Consolidation::Minimum(_) => CfName::Minimum,
            Consolidation::Maximum(_) => CfName::Maximum,
            Consolidation::Last(_) => CfName::Last,
            Consolidation::HwPredict(_) => CfName::HwPredict,
            Consolidation::MhwPredict(_) => CfName::MhwPredict,
            Consolidation::Seasonal(_) => CfName::Seasonal,
            Consolidation::DevSeasonal(_) => CfName::DevSeasonal,
            Consolidation::DevPredict(_) => CfName::DevPredict,
            Consolidation::Failures(_) => CfName::Failures,
        }
    }

    /// Returns the basic parameters for AVERAGE/MIN/MAX/LAST.
    pub fn basic(&self) -> Option<&BasicParams> {
        match self {
            Consolidation::Average(p)
            | Consolidation::Minimum(p)
            | Consolidation::Maximum(p)
            | Consolidation::Last(p) => Some(p),
            _ => None,
        }
    }

    /// Returns true for the Holt-Winters family.
    pub fn is_holt_winters(&self) -> bool {
        self.basic().is_none()
    }

    /// Returns the index of the archive this one depends on.
    pub fn dependency(&self) -> Option<usize> {
        match self {
            Consolidation::HwPredict(p) | Consolidation::MhwPredict(p) => Some(p.seasonal),
            Consolidation::Seasonal(p) | Consolidation::DevSeasonal(p) => Some(p.predictor),
            Consolidation::DevPredict(p) => Some(p.devseasonal),
            Consolidation::Failures(p) => Some(p.devseasonal),
            _ => None,
        }
    }
}

/// One archive definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveDef {
    /// Consolidation function and parameters.
    pub cf: Consolidation,
    /// Primary steps per row.
    pub pdp_count: usize,
    /// Ring buffer capacity.
    pub row_count: usize,
}

impl ArchiveDef {
    /// Creates a basic archive, validating `xff`.
    pub fn basic(cf: CfName, xff: f64, pdp_count: usize, row_count: usize) -> Result<Self> {
        if !(0.0..1.0).contains(&xff) {
            return Err(RrdError::InvalidParameter(format!(
                "xff {} must be in [0, 1)",
                xff
            )));
        }
        let params = BasicParams { xff };
        let cf = match cf {
            CfName::Average => Consolidation::Average(params),
            CfName::Minimum => Consolidation::Minimum(params),
            CfName::Maximum => Consolidation::Maximum(params),
            CfName::Last => Consolidation::Last(params),
            other => {
                return Err(RrdError::InvalidParameter(format!(
                    "{} is not a basic consolidation function",
                    other
                )))
            }
        };
        let def = Self {
            cf,
            pdp_count,
            row_count,
        };
        def.validate_shape()?;
        Ok(def)
    }

    /// Seconds covered by one row.
    pub fn row_span(&self, pdp_step: u64) -> i64 {
        (self.pdp_count as u64 * pdp_step) as i64
    }

    pub(crate) fn validate_shape(&self) -> Result<()> {
        if self.row_count == 0 || self.pdp_count == 0 {
            return Err(RrdError::InvalidParameter(format!(
                "{} archive needs positive rows and steps",
                self.cf.cf_name()
            )));
        }
        if self.cf.is_holt_winters() && self.pdp_count != 1 {
            return Err(RrdError::InvalidLayout(format!(
                "{} archive must consolidate exactly one step per row",
                self.cf.cf_name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_source() {
        let ds: DataSourceDef = "DS:ifInOctets:COUNTER:600:0:U".parse().unwrap();
        assert_eq!(ds.name, "ifInOctets");
        assert_eq!(ds.kind, DataSourceKind::Counter);
        assert_eq!(ds.heartbeat, 600);
        assert_eq!(ds.min, 0.0);
        assert!(ds.max.is_nan());
    }

    #[test]
    fn test_data_source_rejects_bad_input() {
        assert!("DS:bad.name:GAUGE:600:U:U".parse::<DataSourceDef>().is_err());
        assert!("DS:x:GAUGE:600:10:1".parse::<DataSourceDef>().is_err());
        assert!("DS:x:WIBBLE:600:U:U".parse::<DataSourceDef>().is_err());
        assert!("DS:x:COMPUTE:a,b,+".parse::<DataSourceDef>().is_err());
        assert!("DS:abcdefghijklmnopqrst:GAUGE:600:U:U"
            .parse::<DataSourceDef>()
            .is_err());
    }

    #[test]
    fn test_bounds() {
        let ds = DataSourceDef::new("temp", DataSourceKind::Gauge, 600, -10.0, 50.0).unwrap();
        assert!(ds.out_of_bounds(51.0));
        assert!(ds.out_of_bounds(-11.0));
        assert!(!ds.out_of_bounds(20.0));
    }

    #[test]
    fn test_cf_names_round_trip() {
        for name in [
            "AVERAGE",
            "MIN",
            "MAX",
            "LAST",
            "HWPREDICT",
            "MHWPREDICT",
            "SEASONAL",
            "DEVSEASONAL",
            "DEVPREDICT",
            "FAILURES",
        ] {
            let cf: CfName = name.parse().unwrap();
            assert_eq!(cf.as_str(), name);
        }
        assert!("MEDIAN".parse::<CfName>().is_err());
    }

    #[test]
    fn test_basic_archive_xff_domain() {
        assert!(ArchiveDef::basic(CfName::Average, 0.5, 1, 10).is_ok());
        assert!(ArchiveDef::basic(CfName::Average, 1.0, 1, 10).is_err());
        assert!(ArchiveDef::basic(CfName::Average, -0.1, 1, 10).is_err());
        assert!(ArchiveDef::basic(CfName::Seasonal, 0.5, 1, 10).is_err());
        assert!(ArchiveDef::basic(CfName::Maximum, 0.5, 0, 10).is_err());
    }
}
