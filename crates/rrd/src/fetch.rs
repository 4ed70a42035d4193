//! Read-side interfaces.
//!
//! Opening a file for reading never takes the update lock; readers see the
//! state of the last completed write-back.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_rrd::fetch::fetch;
//! use alopex_rrd::CfName;
//!
//! let result = fetch("load.rrd", CfName::Average, start, end, 300)?;
//! for (i, row) in result.rows.iter().enumerate() {
//!     println!("{} {:?}", result.time_of(i), row);
//! }
//! ```

use crate::error::{Result, RrdError};
use crate::format::defs::{ArchiveDef, CfName, DataSourceDef};
use crate::format::{LiveHeader, Rrd};
use crate::time::ArchiveClock;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Decodes the file at `path`.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read, or a format error.
pub fn open_for_read(path: impl AsRef<Path>) -> Result<Rrd> {
    let file = File::open(path.as_ref())?;
    Rrd::read_from(&mut BufReader::new(file))
}

/// Summary of a file's definitions and live state.
#[derive(Debug, Clone, PartialEq)]
pub struct RrdInfo {
    /// On-disk format version, e.g. `"0003"`.
    pub version: String,
    /// Seconds per primary step.
    pub step: u64,
    /// Last update time.
    pub last_update: LiveHeader,
    /// Data source definitions.
    pub data_sources: Vec<DataSourceDef>,
    /// Archive definitions.
    pub archives: Vec<ArchiveDef>,
    /// Most recently written row of each archive.
    pub current_rows: Vec<usize>,
}

/// Rows of one archive over a time range.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    /// Aligned start; the first row ends at `start + step`.
    pub start: i64,
    /// Aligned end; the last row ends here.
    pub end: i64,
    /// Seconds per row.
    pub step: u64,
    /// Data source names, in column order.
    pub ds_names: Vec<String>,
    /// One row per step, NaN outside the retained window.
    pub rows: Vec<Vec<f64>>,
}

impl FetchResult {
    /// End time of row `index`.
    pub fn time_of(&self, index: usize) -> i64 {
        self.start + (index as i64 + 1) * self.step as i64
    }
}

/// Last update time and raw readings.
#[derive(Debug, Clone, PartialEq)]
pub struct LastUpdate {
    /// Last update time.
    pub time: LiveHeader,
    /// `(name, last raw reading)` per data source.
    pub readings: Vec<(String, String)>,
}

impl Rrd {
    /// Summarizes definitions and live state.
    pub fn info(&self) -> RrdInfo {
        RrdInfo {
            version: self.header.version_string(),
            step: self.step(),
            last_update: self.live,
            data_sources: self.data_sources.clone(),
            archives: self.archives.clone(),
            current_rows: self.current_rows.clone(),
        }
    }

    /// Clock of archive `archive` as of the last update.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::UnknownArchive` if `archive` is out of range.
    pub fn clock(&self, archive: usize) -> Result<ArchiveClock> {
        let def = self
            .archives
            .get(archive)
            .ok_or(RrdError::UnknownArchive(archive))?;
        Ok(ArchiveClock::new(
            def,
            self.step(),
            self.current_rows[archive],
            self.live.last_update,
        ))
    }

    /// Picks the archive of function `cf` best matching the range.
    ///
    /// An archive covering the whole range wins over partial coverage; among
    /// equals the row span closest to `resolution` wins.
    fn select_archive(&self, cf: CfName, start: i64, end: i64, resolution: u64) -> Result<usize> {
        let wanted = end - start;
        let mut best_full: Option<(usize, u64)> = None;
        let mut best_partial: Option<(usize, i64, u64)> = None;

        for (index, archive) in self.archives.iter().enumerate() {
            if archive.cf.cf_name() != cf {
                continue;
            }
            let clock = ArchiveClock::new(
                archive,
                self.step(),
                self.current_rows[index],
                self.live.last_update,
            );
            let covered_start = clock.end_time - archive.row_count as i64 * clock.row_span;
            let step_diff = resolution.abs_diff(clock.row_span as u64);

            let mut coverage = wanted;
            if covered_start > start {
                coverage -= covered_start - start;
            }
            if clock.end_time < end {
                coverage -= end - clock.end_time;
            }

            if coverage == wanted {
                if best_full.map_or(true, |(_, diff)| step_diff < diff) {
                    best_full = Some((index, step_diff));
                }
            } else if best_partial.map_or(true, |(_, cov, diff)| {
                coverage > cov || (coverage == cov && step_diff < diff)
            }) {
                best_partial = Some((index, coverage, step_diff));
            }
        }

        best_full
            .map(|(index, _)| index)
            .or(best_partial.map(|(index, _, _)| index))
            .ok_or_else(|| RrdError::NoMatchingArchive(cf.to_string()))
    }

    /// Reads the rows of function `cf` between `start` and `end`.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::InvalidParameter` if `start > end` and
    /// `RrdError::NoMatchingArchive` if no archive uses `cf`.
    pub fn fetch(&self, cf: CfName, start: i64, end: i64, resolution: u64) -> Result<FetchResult> {
        if start > end {
            return Err(RrdError::InvalidParameter(format!(
                "start ({}) should be less than end ({})",
                start, end
            )));
        }
        let archive = self.select_archive(cf, start, end, resolution)?;
        let clock = self.clock(archive)?;
        let span = clock.row_span;

        let start = start - start.rem_euclid(span);
        let end = match end.rem_euclid(span) {
            0 => end,
            rem => end + span - rem,
        };

        let block = self.values.archive(archive);
        let count = ((end - start) / span) as usize;
        let mut rows = Vec::with_capacity(count);
        for k in 1..=count {
            let t = start + k as i64 * span;
            let row = match clock.row_for_time(t) {
                Some(row) => block.row(row).to_vec(),
                None => vec![f64::NAN; self.ds_count()],
            };
            rows.push(row);
        }
        debug!(archive, start, end, rows = rows.len(), "fetched");

        Ok(FetchResult {
            start,
            end,
            step: span as u64,
            ds_names: self.data_sources.iter().map(|ds| ds.name.clone()).collect(),
            rows,
        })
    }

    /// End time of the oldest retained row of `archive`.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::UnknownArchive` if `archive` is out of range.
    pub fn first(&self, archive: usize) -> Result<i64> {
        Ok(self.clock(archive)?.first_time())
    }

    /// Last update time and the raw readings it stored.
    pub fn last_update(&self) -> LastUpdate {
        LastUpdate {
            time: self.live,
            readings: self
                .data_sources
                .iter()
                .zip(&self.pdp)
                .map(|(ds, pdp)| (ds.name.clone(), pdp.last_ds.clone()))
                .collect(),
        }
    }
}

/// Returns the summary of the file at `path`.
pub fn info(path: impl AsRef<Path>) -> Result<RrdInfo> {
    Ok(open_for_read(path)?.info())
}

/// Reads the rows of function `cf` between `start` and `end` from the file
/// at `path`, at the archive resolution closest to `resolution` seconds.
pub fn fetch(
    path: impl AsRef<Path>,
    cf: CfName,
    start: i64,
    end: i64,
    resolution: u64,
) -> Result<FetchResult> {
    open_for_read(path)?.fetch(cf, start, end, resolution)
}

/// End time of the oldest retained row of `archive` in the file at `path`.
pub fn first(path: impl AsRef<Path>, archive: usize) -> Result<i64> {
    open_for_read(path)?.first(archive)
}

/// Last update time, in seconds, of the file at `path`.
pub fn last(path: impl AsRef<Path>) -> Result<i64> {
    Ok(open_for_read(path)?.live.last_update)
}

/// Last update time and raw readings of the file at `path`.
pub fn last_update(path: impl AsRef<Path>) -> Result<LastUpdate> {
    Ok(open_for_read(path)?.last_update())
}
