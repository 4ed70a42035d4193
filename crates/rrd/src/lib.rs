//! Alopex RRD - Round Robin Time Series Archives
//!
//! This crate implements the update and consolidation engine of a round robin
//! database: fixed-size files holding data sources sampled on a regular step
//! and consolidated into circular archives.
//!
//! # Components
//!
//! - [`Creator`]: Builds new files from `DS:` and `RRA:` definitions
//! - [`Updater`]: Applies timestamped samples as one locked transaction
//! - [`consolidate`]: AVERAGE/MIN/MAX/LAST and the Holt-Winters family
//! - [`fetch`](mod@fetch): Reads rows back over a time range
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_rrd::{create, update, Sample};
//!
//! create(
//!     "load.rrd",
//!     300,
//!     start,
//!     &["DS:load:GAUGE:600:0:U", "RRA:AVERAGE:0.5:1:288"],
//! )?;
//!
//! let report = update("load.rrd", None, &[Sample::at(start + 300, ["0.75"])])?;
//! assert_eq!(report.samples, 1);
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod consolidate;
pub mod create;
pub mod error;
pub mod fetch;
pub mod flush;
pub mod format;
pub mod pdp;
pub mod time;
pub mod update;
pub mod values;

pub use config::{CreateConfig, LockMode, SyncMode, UpdateConfig};
pub use create::{create, Creator};
pub use error::{ErrorContext, ErrorKind, Result, RrdError};
pub use fetch::{fetch, first, info, last, last_update, FetchResult, LastUpdate, RrdInfo};
pub use flush::WrittenRow;
pub use format::defs::{ArchiveDef, CfName, Consolidation, DataSourceDef, DataSourceKind};
pub use format::Rrd;
pub use pdp::ComputeEvaluator;
pub use update::{reset_aberrant, update, update_with_context, Sample, UpdateReport, Updater};
