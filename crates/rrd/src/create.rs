//! File creation.
//!
//! A [`Creator`] collects data source and archive definitions, either typed
//! or as `DS:`/`RRA:` definition strings, checks them and writes a new file
//! whose archives are all unknown.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_rrd::create::Creator;
//!
//! Creator::new(300)
//!     .start(1_000_000_000)
//!     .definition("DS:load:GAUGE:600:0:U")?
//!     .definition("RRA:AVERAGE:0.5:1:288")?
//!     .definition("RRA:HWPREDICT:1440:0.1:0.0035:288")?
//!     .create("/var/lib/rrd/load.rrd")?;
//! ```

use crate::config::CreateConfig;
use crate::error::{Result, RrdError};
use crate::format::defs::{
    ArchiveDef, CfName, Consolidation, DataSourceDef, DevPredictParams, FailuresParams,
    PredictParams, SeasonalParams, DEFAULT_SMOOTHING_WINDOW, MAX_FAILURES_WINDOW_LEN,
};
use crate::format::state::{CdpState, PdpPrep};
use crate::format::{LiveHeader, Rrd, StaticHeader, DEFAULT_VERSION};
use crate::values::ValueArea;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

/// Confidence band width, in deviations, of auto-created FAILURES archives.
pub const DEFAULT_DELTA: f64 = 2.0;

/// Violations that declare a failure in auto-created FAILURES archives.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 7;

/// Window length of auto-created FAILURES archives.
pub const DEFAULT_FAILURE_WINDOW: usize = 9;

/// Builder for new files.
#[derive(Debug, Clone)]
pub struct Creator {
    step: u64,
    start: Option<i64>,
    data_sources: Vec<DataSourceDef>,
    archives: Vec<ArchiveDef>,
    config: CreateConfig,
}

impl Creator {
    /// Starts a definition with `step` seconds per primary data point.
    pub fn new(step: u64) -> Self {
        Self {
            step,
            start: None,
            data_sources: Vec::new(),
            archives: Vec::new(),
            config: CreateConfig::default(),
        }
    }

    /// Sets the initial last update time. Defaults to ten seconds ago.
    pub fn start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Sets the creation configuration.
    pub fn config(mut self, config: CreateConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a data source.
    pub fn data_source(mut self, ds: DataSourceDef) -> Self {
        self.data_sources.push(ds);
        self
    }

    /// Adds an archive.
    pub fn archive(mut self, archive: ArchiveDef) -> Self {
        self.archives.push(archive);
        self
    }

    /// Adds a `DS:` or `RRA:` definition string.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::InvalidParameter` if the string cannot be parsed or
    /// a parameter is out of range.
    pub fn definition(mut self, text: &str) -> Result<Self> {
        if text.starts_with("DS:") {
            self.data_sources.push(text.parse()?);
        } else if text.starts_with("RRA:") {
            let archives = parse_archive(text, self.archives.len())?;
            self.archives.extend(archives);
        } else {
            return Err(RrdError::InvalidParameter(format!(
                "can't parse argument '{}'",
                text
            )));
        }
        Ok(self)
    }

    /// Builds the initial in-memory file.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions are incomplete or inconsistent.
    pub fn build(&self) -> Result<Rrd> {
        if self.step == 0 {
            return Err(RrdError::InvalidParameter(
                "step size should be no less than one second".into(),
            ));
        }
        if self.data_sources.is_empty() {
            return Err(RrdError::InvalidParameter(
                "you must define at least one data source".into(),
            ));
        }
        if self.archives.is_empty() {
            return Err(RrdError::InvalidParameter(
                "you must define at least one round robin archive".into(),
            ));
        }
        for (i, ds) in self.data_sources.iter().enumerate() {
            if self.data_sources[..i].iter().any(|d| d.name == ds.name) {
                return Err(RrdError::InvalidParameter(format!(
                    "duplicate data source name: {}",
                    ds.name
                )));
            }
        }
        for archive in &self.archives {
            check_params(archive)?;
        }

        let start = self.start.unwrap_or_else(default_start);
        let smooth_hash = xxh64(
            self.data_sources
                .iter()
                .map(|ds| ds.name.as_str())
                .collect::<Vec<_>>()
                .join(":")
                .as_bytes(),
            0,
        );
        let archives: Vec<ArchiveDef> = self
            .archives
            .iter()
            .map(|archive| {
                let mut archive = *archive;
                if let Consolidation::Seasonal(p) | Consolidation::DevSeasonal(p) = &mut archive.cf
                {
                    p.smooth_index = (smooth_hash % archive.row_count as u64) as usize;
                }
                archive
            })
            .collect();

        let ds_count = self.data_sources.len();
        let row_counts: Vec<usize> = archives.iter().map(|a| a.row_count).collect();
        let mut cdp = Vec::with_capacity(ds_count * archives.len());
        for archive in &archives {
            let state = CdpState::initial(&archive.cf, archive.pdp_count, start, self.step);
            cdp.extend(std::iter::repeat(state).take(ds_count));
        }

        let rrd = Rrd {
            header: StaticHeader {
                version: select_version(&self.data_sources, &archives),
                ds_count,
                rra_count: archives.len(),
                pdp_step: self.step,
            },
            data_sources: self.data_sources.clone(),
            live: LiveHeader {
                last_update: start,
                last_update_usec: 0,
            },
            pdp: vec![PdpPrep::initial(start, self.step); ds_count],
            cdp,
            current_rows: row_counts.iter().map(|rows| rows - 1).collect(),
            values: ValueArea::new(&row_counts, ds_count)?,
            archives,
        };
        rrd.validate()?;
        Ok(rrd)
    }

    /// Builds the file and writes it to `path`.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::AlreadyExists` if the file exists and overwriting
    /// is not enabled, or any error from [`Creator::build`].
    pub fn create(&self, path: impl AsRef<Path>) -> Result<Rrd> {
        let path = path.as_ref();
        let rrd = self.build()?;

        let mut options = OpenOptions::new();
        options.write(true);
        if self.config.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(path).map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                RrdError::AlreadyExists(path.to_path_buf())
            } else {
                RrdError::IoError(err)
            }
        })?;

        let mut writer = BufWriter::new(&file);
        rrd.write_to(&mut writer)?;
        writer.flush()?;
        drop(writer);
        self.config.sync_mode.sync(&file)?;

        debug!(
            "Created {} (version {}, {} data sources, {} archives)",
            path.display(),
            rrd.header.version_string(),
            rrd.ds_count(),
            rrd.archives.len()
        );
        Ok(rrd)
    }
}

/// Creates a file from definition strings.
///
/// # Errors
///
/// See [`Creator::definition`] and [`Creator::create`].
pub fn create(path: impl AsRef<Path>, step: u64, start: i64, definitions: &[&str]) -> Result<Rrd> {
    let mut creator = Creator::new(step).start(start);
    for definition in definitions {
        creator = creator.definition(definition)?;
    }
    creator.create(path)
}

fn default_start() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    now - 10
}

/// Lowest format version able to hold the definitions.
fn select_version(data_sources: &[DataSourceDef], archives: &[ArchiveDef]) -> u8 {
    if data_sources.iter().any(|ds| ds.kind.needs_v5()) {
        5
    } else if archives.iter().any(|a| match &a.cf {
        Consolidation::MhwPredict(_) => true,
        // Version 3 files have no slot for the window.
        Consolidation::Seasonal(p) | Consolidation::DevSeasonal(p) => {
            p.smoothing_window != DEFAULT_SMOOTHING_WINDOW
        }
        _ => false,
    }) {
        4
    } else {
        DEFAULT_VERSION
    }
}

fn invalid(message: String) -> RrdError {
    RrdError::InvalidParameter(message)
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be between 0 and 1, got {}", name, value)))
    }
}

/// Range checks of the consolidation parameters.
fn check_params(archive: &ArchiveDef) -> Result<()> {
    archive.validate_shape()?;
    match &archive.cf {
        Consolidation::Average(p)
        | Consolidation::Minimum(p)
        | Consolidation::Maximum(p)
        | Consolidation::Last(p) => {
            if !(0.0..1.0).contains(&p.xff) {
                return Err(invalid("the xff must always be >= 0 and < 1".into()));
            }
        }
        Consolidation::HwPredict(p) | Consolidation::MhwPredict(p) => {
            check_unit("alpha", p.alpha)?;
            check_unit("beta", p.beta)?;
        }
        Consolidation::Seasonal(p) | Consolidation::DevSeasonal(p) => {
            check_unit("gamma", p.gamma)?;
            check_unit("smoothing window", p.smoothing_window)?;
        }
        Consolidation::DevPredict(_) => {}
        Consolidation::Failures(p) => {
            if p.window_len == 0 || p.window_len > MAX_FAILURES_WINDOW_LEN {
                return Err(invalid(format!(
                    "failure window length must be between 1 and {}",
                    MAX_FAILURES_WINDOW_LEN
                )));
            }
            if p.threshold == 0 || p.threshold > p.window_len {
                return Err(invalid(
                    "failure threshold must be between 1 and the window length".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Parses one `RRA:` definition into one or more archives.
///
/// `existing` is the number of archives already defined; a predictor without
/// an explicit seasonal archive appends its companions after itself.
pub fn parse_archive(text: &str, existing: usize) -> Result<Vec<ArchiveDef>> {
    let bad = || invalid(format!("can't parse argument '{}'", text));
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() < 2 || parts[0] != "RRA" {
        return Err(bad());
    }
    let cf: CfName = parts[1].parse()?;
    let args = &parts[2..];

    let number = |s: &str| s.parse::<usize>().map_err(|_| bad());
    let real = |s: &str| s.parse::<f64>().map_err(|_| bad());
    // Archive references are 1-based in definitions.
    let reference = |s: &str| match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(bad()),
    };
    let hw = |cf: Consolidation, rows: usize| ArchiveDef {
        cf,
        pdp_count: 1,
        row_count: rows,
    };

    let archives = match cf {
        CfName::Average | CfName::Minimum | CfName::Maximum | CfName::Last => {
            if args.len() != 3 {
                return Err(bad());
            }
            vec![ArchiveDef::basic(
                cf,
                real(args[0])?,
                number(args[1])?,
                number(args[2])?,
            )?]
        }
        CfName::HwPredict | CfName::MhwPredict => {
            if args.len() != 4 && args.len() != 5 {
                return Err(bad());
            }
            let rows = number(args[0])?;
            let alpha = real(args[1])?;
            let beta = real(args[2])?;
            let period = number(args[3])?;
            let wrap = |p: PredictParams| {
                if cf == CfName::MhwPredict {
                    Consolidation::MhwPredict(p)
                } else {
                    Consolidation::HwPredict(p)
                }
            };
            if let Some(seasonal) = args.get(4) {
                vec![hw(
                    wrap(PredictParams {
                        alpha,
                        beta,
                        seasonal: reference(seasonal)?,
                    }),
                    rows,
                )]
            } else {
                let predictor = existing;
                let seasonal = SeasonalParams {
                    gamma: alpha,
                    smoothing_window: DEFAULT_SMOOTHING_WINDOW,
                    smooth_index: 0,
                    predictor,
                };
                vec![
                    hw(
                        wrap(PredictParams {
                            alpha,
                            beta,
                            seasonal: predictor + 1,
                        }),
                        rows,
                    ),
                    hw(Consolidation::Seasonal(seasonal), period),
                    hw(Consolidation::DevSeasonal(seasonal), period),
                    hw(
                        Consolidation::DevPredict(DevPredictParams {
                            devseasonal: predictor + 2,
                        }),
                        rows,
                    ),
                    hw(
                        Consolidation::Failures(FailuresParams {
                            delta_pos: DEFAULT_DELTA,
                            delta_neg: DEFAULT_DELTA,
                            window_len: DEFAULT_FAILURE_WINDOW,
                            threshold: DEFAULT_FAILURE_THRESHOLD,
                            devseasonal: predictor + 2,
                        }),
                        period,
                    ),
                ]
            }
        }
        CfName::Seasonal | CfName::DevSeasonal => {
            if args.len() != 3 && args.len() != 4 {
                return Err(bad());
            }
            let smoothing_window = match args.get(3) {
                Some(option) => match option.split_once('=') {
                    Some(("smoothing-window", value)) => real(value)?,
                    _ => return Err(bad()),
                },
                None => DEFAULT_SMOOTHING_WINDOW,
            };
            let params = SeasonalParams {
                gamma: real(args[1])?,
                smoothing_window,
                smooth_index: 0,
                predictor: reference(args[2])?,
            };
            let cf = if cf == CfName::Seasonal {
                Consolidation::Seasonal(params)
            } else {
                Consolidation::DevSeasonal(params)
            };
            vec![hw(cf, number(args[0])?)]
        }
        CfName::DevPredict => {
            if args.len() != 2 {
                return Err(bad());
            }
            vec![hw(
                Consolidation::DevPredict(DevPredictParams {
                    devseasonal: reference(args[1])?,
                }),
                number(args[0])?,
            )]
        }
        CfName::Failures => {
            if args.len() != 4 {
                return Err(bad());
            }
            vec![hw(
                Consolidation::Failures(FailuresParams {
                    delta_pos: DEFAULT_DELTA,
                    delta_neg: DEFAULT_DELTA,
                    window_len: number(args[2])?,
                    threshold: number(args[1])?,
                    devseasonal: reference(args[3])?,
                }),
                number(args[0])?,
            )]
        }
    };
    for archive in &archives {
        check_params(archive)?;
    }
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::defs::DataSourceKind;

    #[test]
    fn test_parse_basic_archive() {
        let archives = parse_archive("RRA:MAX:0.5:6:700", 0).unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].cf.cf_name(), CfName::Maximum);
        assert_eq!(archives[0].pdp_count, 6);
        assert_eq!(archives[0].row_count, 700);
    }

    #[test]
    fn test_bad_xff() {
        assert!(parse_archive("RRA:AVERAGE:1.0:1:10", 0).is_err());
        assert!(parse_archive("RRA:AVERAGE:-0.1:1:10", 0).is_err());
    }

    #[test]
    fn test_hwpredict_auto_chain() {
        let archives = parse_archive("RRA:HWPREDICT:100:0.1:0.01:24", 1).unwrap();
        let names: Vec<CfName> = archives.iter().map(|a| a.cf.cf_name()).collect();
        assert_eq!(
            names,
            vec![
                CfName::HwPredict,
                CfName::Seasonal,
                CfName::DevSeasonal,
                CfName::DevPredict,
                CfName::Failures
            ]
        );
        assert_eq!(archives[0].cf.dependency(), Some(2));
        assert_eq!(archives[1].cf.dependency(), Some(1));
        assert_eq!(archives[1].row_count, 24);
        assert_eq!(archives[3].cf.dependency(), Some(3));
        assert_eq!(archives[4].cf.dependency(), Some(3));
        assert_eq!(archives[3].row_count, 100);
    }

    #[test]
    fn test_explicit_references_are_one_based() {
        let archives = parse_archive("RRA:SEASONAL:24:0.1:2:smoothing-window=0.1", 0).unwrap();
        match archives[0].cf {
            Consolidation::Seasonal(p) => {
                assert_eq!(p.predictor, 1);
                assert_eq!(p.smoothing_window, 0.1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_archive("RRA:DEVPREDICT:10:0", 0).is_err());
    }

    #[test]
    fn test_failures_validation() {
        assert!(parse_archive("RRA:FAILURES:10:7:9:3", 0).is_ok());
        assert!(parse_archive("RRA:FAILURES:10:10:9:3", 0).is_err());
        assert!(parse_archive("RRA:FAILURES:10:1:29:3", 0).is_err());
    }

    #[test]
    fn test_hw_param_range() {
        assert!(parse_archive("RRA:HWPREDICT:100:1.5:0.01:24", 0).is_err());
        assert!(parse_archive("RRA:SEASONAL:24:0:2", 0).is_err());
    }

    #[test]
    fn test_build_initial_state() {
        let rrd = Creator::new(300)
            .start(1000)
            .definition("DS:x:GAUGE:600:U:U")
            .unwrap()
            .definition("RRA:AVERAGE:0.5:3:10")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(rrd.header.version, DEFAULT_VERSION);
        assert_eq!(rrd.live.last_update, 1000);
        assert_eq!(rrd.current_rows, vec![9]);
        assert_eq!(rrd.pdp[0].last_ds, "UNKN");
        assert_eq!(rrd.pdp[0].unknown_seconds, 100);
        // The first full step starts at 900, exactly on a row boundary.
        let basic = rrd.cdp(0, 0).as_basic().unwrap();
        assert_eq!(basic.unknown_pdp_count, 0);
        assert!(basic.value.is_nan());
        assert!(rrd.values.as_slice().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_version_selection() {
        let rrd = Creator::new(60)
            .start(0)
            .data_source(
                DataSourceDef::new("d", DataSourceKind::DCounter, 120, f64::NAN, f64::NAN)
                    .unwrap(),
            )
            .archive(ArchiveDef::basic(CfName::Last, 0.0, 1, 5).unwrap())
            .build()
            .unwrap();
        assert_eq!(rrd.header.version, 5);

        let rrd = Creator::new(60)
            .start(0)
            .definition("DS:x:GAUGE:120:U:U")
            .unwrap()
            .definition("RRA:MHWPREDICT:100:0.1:0.01:10")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(rrd.header.version, 4);

        let rrd = Creator::new(60)
            .start(0)
            .definition("DS:x:GAUGE:120:U:U")
            .unwrap()
            .definition("RRA:HWPREDICT:100:0.1:0.01:10:2")
            .unwrap()
            .definition("RRA:SEASONAL:10:0.1:1:smoothing-window=0.3")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(rrd.header.version, 4);
    }

    #[test]
    fn test_smooth_index_within_season() {
        let rrd = Creator::new(60)
            .start(0)
            .definition("DS:x:GAUGE:120:U:U")
            .unwrap()
            .definition("RRA:HWPREDICT:100:0.1:0.01:10")
            .unwrap()
            .build()
            .unwrap();
        for archive in &rrd.archives {
            if let Consolidation::Seasonal(p) | Consolidation::DevSeasonal(p) = archive.cf {
                assert!(p.smooth_index < 10);
            }
        }
    }

    #[test]
    fn test_missing_definitions() {
        assert!(Creator::new(300).build().is_err());
        assert!(Creator::new(0)
            .definition("DS:x:GAUGE:600:U:U")
            .unwrap()
            .definition("RRA:AVERAGE:0.5:1:10")
            .unwrap()
            .build()
            .is_err());
    }
}
