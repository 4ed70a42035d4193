//! Update transaction driver.
//!
//! One call opens and locks the file, decodes it, applies every sample to the
//! in-memory copy and, only if all of them succeed, writes the mutable tail
//! back and syncs. A failing sample leaves the file byte-for-byte unchanged.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_rrd::update::{update, Sample};
//!
//! let samples = vec![Sample::at(1_000_300, ["42"]), "1000600:43".parse()?];
//! let report = update("/var/lib/rrd/load.rrd", None, &samples)?;
//! println!("{} rows written", report.rows.len());
//! ```

use crate::config::{LockMode, UpdateConfig};
use crate::consolidate::graph::ArchiveGraph;
use crate::consolidate::smoother::apply_smoother;
use crate::error::{ErrorContext, Result, RrdError};
use crate::flush::{flush, WrittenRow};
use crate::format::defs::{CfName, DataSourceKind};
use crate::format::{LiveHeader, Rrd};
use crate::pdp::{self, ComputeEvaluator, Interval, NoCompute};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One timestamped set of readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Seconds since the epoch.
    pub time: i64,
    /// Microseconds within `time`, ignored by files older than version 3.
    pub usec: i64,
    /// Raw readings in template order; `"U"` marks an unknown reading.
    pub values: Vec<String>,
}

impl Sample {
    /// Creates a sample at a whole second.
    pub fn at<I, V>(time: i64, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self {
            time,
            usec: 0,
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Creates a sample at the current wall-clock time.
    pub fn now<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let (time, usec) = wall_clock();
        Self {
            time,
            usec,
            ..Self::at(0, values)
        }
    }

    /// Sets the microsecond part of the timestamp.
    ///
    /// Values outside `0..1_000_000` are rejected when the sample is applied.
    pub fn with_usec(mut self, usec: i64) -> Self {
        self.usec = usec;
        self
    }
}

fn wall_clock() -> (i64, i64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() as i64, i64::from(now.subsec_micros()))
}

fn parse_time(text: &str) -> Result<(i64, i64)> {
    if text == "N" {
        return Ok(wall_clock());
    }
    if let Ok(secs) = text.parse::<i64>() {
        return Ok((secs, 0));
    }
    match text.parse::<f64>() {
        Ok(t) if t.is_finite() && text.contains('.') => {
            let secs = t.floor();
            Ok((secs as i64, ((t - secs) * 1_000_000.0) as i64))
        }
        _ => Err(RrdError::InvalidSample(format!(
            "invalid timestamp '{}'",
            text
        ))),
    }
}

impl FromStr for Sample {
    type Err = RrdError;

    /// Parses `time:value[:value...]`, where time is `N`, whole seconds or
    /// seconds with a decimal fraction.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let time = parts.next().unwrap_or_default();
        let (time, usec) = parse_time(time)?;
        let values: Vec<String> = parts.map(str::to_string).collect();
        if values.is_empty() {
            return Err(RrdError::InvalidSample(format!("no readings in '{}'", s)));
        }
        Ok(Self { time, usec, values })
    }
}

/// Maps sample positions to data source indices.
///
/// Without a template the readings are positional over every data source
/// except COMPUTE ones, whose rate is always derived.
///
/// # Errors
///
/// Returns `RrdError::UnknownDataSource` if a name is not defined.
pub fn parse_template(rrd: &Rrd, template: Option<&str>) -> Result<Vec<usize>> {
    match template {
        None => Ok(rrd
            .data_sources
            .iter()
            .enumerate()
            .filter(|(_, ds)| !matches!(ds.kind, DataSourceKind::Compute(_)))
            .map(|(i, _)| i)
            .collect()),
        Some(template) => template
            .split(':')
            .map(|name| {
                rrd.ds_index(name)
                    .ok_or_else(|| RrdError::UnknownDataSource(name.to_string()))
            })
            .collect(),
    }
}

/// Outcome of a successful update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateReport {
    /// Samples applied.
    pub samples: usize,
    /// New last update time.
    pub last_update: LiveHeader,
    /// Every archive row written, in write order.
    pub rows: Vec<WrittenRow>,
    /// Archives re-centred by the seasonal smoother.
    pub smoothed: Vec<usize>,
}

/// Exclusive advisory lock held for the lifetime of the guard.
struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    fn acquire(file: &'a File, path: &Path, mode: LockMode) -> Result<Self> {
        let locked = match mode {
            LockMode::Try => file.try_lock_exclusive(),
            LockMode::Wait => file.lock_exclusive(),
        };
        locked.map_err(|err| {
            if is_contended(&err) {
                RrdError::Locked(path.to_path_buf())
            } else {
                RrdError::IoError(err)
            }
        })?;
        Ok(Self { file })
    }
}

impl<'a> Drop for FileLock<'a> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || (err.raw_os_error().is_some()
            && err.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

/// Configurable update driver.
pub struct Updater {
    config: UpdateConfig,
    evaluator: Box<dyn ComputeEvaluator>,
}

impl Default for Updater {
    fn default() -> Self {
        Self::new(UpdateConfig::default())
    }
}

impl Updater {
    /// Creates an updater without a COMPUTE evaluator.
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            config,
            evaluator: Box::new(NoCompute),
        }
    }

    /// Sets the evaluator used for COMPUTE data sources.
    pub fn evaluator(mut self, evaluator: impl ComputeEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Applies `samples` to the file at `path` as one transaction.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; the file is then unchanged.
    pub fn run(
        &self,
        path: impl AsRef<Path>,
        template: Option<&str>,
        samples: &[Sample],
    ) -> Result<UpdateReport> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let _lock = FileLock::acquire(&file, path, self.config.lock_mode)?;

        let mut rrd = Rrd::read_from(&mut BufReader::new(&file))?;
        let report = self.apply_in_place(&mut rrd, template, samples)?;

        self.write_back(&file, &rrd)?;

        debug!(
            "Updated {} with {} samples, {} rows written",
            path.display(),
            report.samples,
            report.rows.len()
        );
        Ok(report)
    }

    /// Applies `samples` to a decoded file.
    ///
    /// `rrd` is only modified if every sample succeeds.
    pub fn apply(
        &self,
        rrd: &mut Rrd,
        template: Option<&str>,
        samples: &[Sample],
    ) -> Result<UpdateReport> {
        let mut scratch = rrd.clone();
        let report = self.apply_in_place(&mut scratch, template, samples)?;
        *rrd = scratch;
        Ok(report)
    }

    fn apply_in_place(
        &self,
        rrd: &mut Rrd,
        template: Option<&str>,
        samples: &[Sample],
    ) -> Result<UpdateReport> {
        if samples.is_empty() {
            return Err(RrdError::InvalidSample("no samples given".to_string()));
        }
        let positions = parse_template(rrd, template)?;
        let graph = ArchiveGraph::resolve(&rrd.archives)?;

        let mut report = UpdateReport::default();
        let mut schedule_smooth = false;
        for sample in samples {
            if sample.values.len() != positions.len() {
                return Err(RrdError::ValueCountMismatch {
                    expected: positions.len(),
                    actual: sample.values.len(),
                });
            }
            let mut readings = vec!["U"; rrd.ds_count()];
            for (&ds, value) in positions.iter().zip(&sample.values) {
                readings[ds] = value.as_str();
            }
            schedule_smooth |= self.apply_sample(rrd, &graph, sample, &readings, &mut report.rows)?;
            report.samples += 1;
        }

        if schedule_smooth {
            for archive in 0..rrd.archives.len() {
                let cf = rrd.archives[archive].cf.cf_name();
                if (cf == CfName::Seasonal || cf == CfName::DevSeasonal)
                    && apply_smoother(rrd, &graph, archive)
                {
                    report.smoothed.push(archive);
                }
            }
        }
        report.last_update = rrd.live;
        Ok(report)
    }

    fn apply_sample(
        &self,
        rrd: &mut Rrd,
        graph: &ArchiveGraph,
        sample: &Sample,
        readings: &[&str],
        written: &mut Vec<WrittenRow>,
    ) -> Result<bool> {
        if !(0..1_000_000).contains(&sample.usec) {
            return Err(RrdError::InvalidSample(format!(
                "microseconds {} outside 0..1000000",
                sample.usec
            )));
        }
        let usec = if rrd.header.has_usec() { sample.usec } else { 0 };
        let last = rrd.live;
        if sample.time < last.last_update
            || (sample.time == last.last_update && usec <= last.last_update_usec)
        {
            return Err(RrdError::TimestampNotMonotonic {
                time: sample.time,
                usec,
                last: last.last_update,
                last_usec: last.last_update_usec,
            });
        }

        let step = rrd.step();
        let interval = Interval::new(
            (last.last_update, last.last_update_usec),
            (sample.time, usec),
            step,
        );

        let mut contributions = Vec::with_capacity(rrd.ds_count());
        for (ds, raw) in readings.iter().enumerate() {
            let value = pdp::ingest(&rrd.data_sources[ds], &mut rrd.pdp[ds], raw, interval.seconds)?;
            contributions.push(value);
        }

        let mut schedule_smooth = false;
        if interval.crosses_boundary() {
            let mut rates = vec![f64::NAN; rrd.ds_count()];
            for (ds, &pdp_new) in contributions.iter().enumerate() {
                let def = &rrd.data_sources[ds];
                let prep = &mut rrd.pdp[ds];
                rates[ds] = pdp::close_step(def, prep, pdp_new, &interval);
                if let DataSourceKind::Compute(program) = &def.kind {
                    rates[ds] =
                        pdp::compute_rate(def, program, &rates[..ds], self.evaluator.as_ref())?;
                }
                pdp::carry_over(prep, pdp_new, &interval);
            }
            let elapsed = interval.elapsed_steps(step);
            debug!(time = sample.time, elapsed, "step boundary crossed");
            schedule_smooth = flush(
                rrd,
                graph,
                &rates,
                interval.prev_boundary,
                interval.boundary,
                elapsed,
                written,
            );
        } else {
            for (ds, &pdp_new) in contributions.iter().enumerate() {
                pdp::accumulate(&mut rrd.pdp[ds], pdp_new, &interval);
            }
        }

        rrd.live = LiveHeader {
            last_update: sample.time,
            last_update_usec: usec,
        };
        Ok(schedule_smooth)
    }

    /// Rewrites the mutable tail of the file and syncs it.
    fn write_back(&self, file: &File, rrd: &Rrd) -> Result<()> {
        let layout = rrd.layout()?;
        let mut handle = file;
        handle.seek(SeekFrom::Start(layout.live_head))?;
        let mut writer = BufWriter::new(handle);
        rrd.write_state_to(&mut writer)?;
        writer.flush()?;
        drop(writer);
        self.config.sync_mode.sync(file)?;
        Ok(())
    }

    /// Forgets the Holt-Winters model of the data source `ds_name` and
    /// writes the result back.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::UnknownDataSource` if no such data source exists.
    pub fn reset_aberrant(&self, path: impl AsRef<Path>, ds_name: &str) -> Result<()> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let _lock = FileLock::acquire(&file, path, self.config.lock_mode)?;

        let mut rrd = Rrd::read_from(&mut BufReader::new(&file))?;
        let ds = rrd
            .ds_index(ds_name)
            .ok_or_else(|| RrdError::UnknownDataSource(ds_name.to_string()))?;
        rrd.reset_aberrant_coefficients(ds);

        self.write_back(&file, &rrd)?;
        Ok(())
    }
}

/// Applies `samples` to the file at `path` with the default configuration.
///
/// # Errors
///
/// Returns the first error encountered; the file is then unchanged.
pub fn update(
    path: impl AsRef<Path>,
    template: Option<&str>,
    samples: &[Sample],
) -> Result<UpdateReport> {
    Updater::default().run(path, template, samples)
}

/// Like [`update`], recording a failure message in `context`.
///
/// The context is cleared first so a stale message never survives a
/// successful call.
pub fn update_with_context(
    context: &mut ErrorContext,
    path: impl AsRef<Path>,
    template: Option<&str>,
    samples: &[Sample],
) -> Result<UpdateReport> {
    context.clear();
    context.record(update(path, template, samples))
}

/// Resets the Holt-Winters model of one data source with the default
/// configuration.
pub fn reset_aberrant(path: impl AsRef<Path>, ds_name: &str) -> Result<()> {
    Updater::default().reset_aberrant(path, ds_name)
}
