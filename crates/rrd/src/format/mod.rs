//! Binary layout codec.
//!
//! A file is a fixed sequence of C-struct blocks in host byte order with
//! LP64 layout. All sizes follow from the header counts; there are no length
//! prefixes.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Static Header (128 bytes)                                   │
//! │  - Cookie: "RRD\0" (4 bytes)                                 │
//! │  - Version: "0003" (5 bytes) + padding (7 bytes)             │
//! │  - Float cookie: 8.642135E130 (8 bytes)                      │
//! │  - DS count, RRA count, PDP step (8 bytes each)              │
//! │  - Unused parameters (80 bytes)                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DS definitions (120 bytes each)                             │
//! │  RRA definitions (120 bytes each)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Live header (16 bytes, 8 before version 3)                  │
//! │  PDP prep (112 bytes per DS)                                 │
//! │  CDP prep (80 bytes per RRA x DS)                            │
//! │  RRA pointers (8 bytes per RRA)                              │
//! │  Values (8 bytes per RRA row x DS)                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Definitions are immutable after creation. Updates rewrite only the tail
//! starting at the live header, see [`Rrd::write_state_to`].

pub mod defs;
pub mod state;

use crate::error::{Result, RrdError};
use crate::values::ValueArea;
use defs::{
    parse_dst, ArchiveDef, BasicParams, CdefProgram, CfName, Consolidation, DataSourceDef,
    DataSourceKind, DevPredictParams, FailuresParams, PredictParams, SeasonalParams,
    CDEF_PROGRAM_SIZE, DEFAULT_SMOOTHING_WINDOW,
};
use state::{CdpState, PdpPrep, Scratch, LAST_DS_LEN, SCRATCH_WORDS};
use std::io::{Read, Write};

/// Cookie bytes at offset 0.
pub const RRD_COOKIE: [u8; 4] = *b"RRD\0";

/// Float sanity marker stored at offset 16.
pub const FLOAT_COOKIE: f64 = 8.642135E130;

/// Oldest readable format version.
pub const MIN_VERSION: u8 = 1;

/// Newest readable and writable format version.
pub const MAX_VERSION: u8 = 5;

/// Version written unless a newer feature is used.
pub const DEFAULT_VERSION: u8 = 3;

/// Static header size in bytes.
pub const STAT_HEAD_SIZE: usize = 128;

/// Data source definition size in bytes.
pub const DS_DEF_SIZE: usize = 120;

/// Archive definition size in bytes.
pub const RRA_DEF_SIZE: usize = 120;

/// PDP prep block size in bytes.
pub const PDP_PREP_SIZE: usize = 112;

/// CDP prep block size in bytes.
pub const CDP_PREP_SIZE: usize = 80;

/// Archive pointer size in bytes.
pub const RRA_PTR_SIZE: usize = 8;

const NAME_FIELD: usize = 20;
const PAR_WORDS: usize = 10;

// DS parameter slots
const DS_MRHB_CNT: usize = 0;
const DS_MIN_VAL: usize = 1;
const DS_MAX_VAL: usize = 2;
const DS_CDEF_OFFSET: usize = 40 + 8;

// RRA parameter slots
const RRA_CDP_XFF_VAL: usize = 0;
const RRA_HW_ALPHA: usize = 1;
const RRA_HW_BETA: usize = 2;
const RRA_DEPENDENT_RRA_IDX: usize = 3;
const RRA_SEASONAL_GAMMA: usize = 1;
const RRA_SEASONAL_SMOOTHING_WINDOW: usize = 2;
const RRA_SEASONAL_SMOOTH_IDX: usize = 4;
const RRA_DELTA_POS: usize = 1;
const RRA_DELTA_NEG: usize = 2;
const RRA_WINDOW_LEN: usize = 4;
const RRA_FAILURE_THRESHOLD: usize = 5;

/// File-level identification and counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticHeader {
    /// Format version number (1 through 5).
    pub version: u8,
    /// Number of data sources.
    pub ds_count: usize,
    /// Number of archives.
    pub rra_count: usize,
    /// Seconds per primary step.
    pub pdp_step: u64,
}

impl StaticHeader {
    /// Returns the five-byte version string, e.g. `"0003"`.
    pub fn version_string(&self) -> String {
        format!("{:04}", self.version)
    }

    /// Returns true if the live header records microseconds.
    pub fn has_usec(&self) -> bool {
        self.version >= 3
    }

    /// Live header size for this version.
    pub fn live_head_size(&self) -> usize {
        if self.has_usec() {
            16
        } else {
            8
        }
    }

    /// Writes the header.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; STAT_HEAD_SIZE];
        // Cookie (4 bytes)
        buf[0..4].copy_from_slice(&RRD_COOKIE);
        // Version (5 bytes, NUL terminated)
        buf[4..8].copy_from_slice(self.version_string().as_bytes());
        // Float cookie (8 bytes, after alignment padding)
        buf[16..24].copy_from_slice(&FLOAT_COOKIE.to_ne_bytes());
        // Counts and step (8 bytes each)
        buf[24..32].copy_from_slice(&(self.ds_count as u64).to_ne_bytes());
        buf[32..40].copy_from_slice(&(self.rra_count as u64).to_ne_bytes());
        buf[40..48].copy_from_slice(&self.pdp_step.to_ne_bytes());
        // Parameters (80 bytes) - unused
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Reads and validates the header.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::InvalidCookie`, `RrdError::UnsupportedVersion` or
    /// `RrdError::FloatCookieMismatch` when the file is not readable here.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; STAT_HEAD_SIZE];
        reader.read_exact(&mut buf)?;

        let cookie: [u8; 4] = buf[0..4].try_into().unwrap();
        if cookie != RRD_COOKIE {
            return Err(RrdError::InvalidCookie(cookie));
        }

        let version_text = c_string(&buf[4..9]);
        let version = version_text
            .parse::<u8>()
            .ok()
            .filter(|v| (MIN_VERSION..=MAX_VERSION).contains(v))
            .ok_or_else(|| RrdError::UnsupportedVersion(version_text.clone()))?;

        let float_cookie = f64::from_ne_bytes(buf[16..24].try_into().unwrap());
        if float_cookie != FLOAT_COOKIE {
            return Err(RrdError::FloatCookieMismatch(float_cookie));
        }

        let ds_count = u64::from_ne_bytes(buf[24..32].try_into().unwrap());
        let rra_count = u64::from_ne_bytes(buf[32..40].try_into().unwrap());
        let pdp_step = u64::from_ne_bytes(buf[40..48].try_into().unwrap());
        if ds_count == 0 || rra_count == 0 || pdp_step == 0 {
            return Err(RrdError::InvalidLayout(format!(
                "ds_cnt {}, rra_cnt {}, pdp_step {} must all be positive",
                ds_count, rra_count, pdp_step
            )));
        }

        Ok(Self {
            version,
            ds_count: usize::try_from(ds_count)
                .map_err(|_| RrdError::InvalidLayout("ds_cnt too large".into()))?,
            rra_count: usize::try_from(rra_count)
                .map_err(|_| RrdError::InvalidLayout("rra_cnt too large".into()))?,
            pdp_step,
        })
    }
}

/// Last update time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveHeader {
    /// Seconds since the epoch.
    pub last_update: i64,
    /// Microseconds, zero for files older than version 3.
    pub last_update_usec: i64,
}

/// Byte offsets of every block, derived from header counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Offset of the live header.
    pub live_head: u64,
    /// Offset of the first PDP prep block.
    pub pdp_prep: u64,
    /// Offset of the first CDP prep block.
    pub cdp_prep: u64,
    /// Offset of the first archive pointer.
    pub rra_ptr: u64,
    /// Offset of the first value.
    pub values: u64,
    /// Total file length.
    pub total: u64,
}

impl Layout {
    /// Computes the layout for `header` and the given archive row counts.
    pub fn new(header: &StaticHeader, row_counts: &[usize]) -> Result<Self> {
        let overflow = || RrdError::InvalidLayout("file size overflows".into());
        let ds = header.ds_count as u64;
        let rra = header.rra_count as u64;
        let mul = |a: u64, b: u64| a.checked_mul(b).ok_or_else(overflow);
        let add = |a: u64, b: u64| a.checked_add(b).ok_or_else(overflow);

        let live_head = add(
            STAT_HEAD_SIZE as u64,
            add(mul(ds, DS_DEF_SIZE as u64)?, mul(rra, RRA_DEF_SIZE as u64)?)?,
        )?;
        let pdp_prep = add(live_head, header.live_head_size() as u64)?;
        let cdp_prep = add(pdp_prep, mul(ds, PDP_PREP_SIZE as u64)?)?;
        let rra_ptr = add(cdp_prep, mul(mul(ds, rra)?, CDP_PREP_SIZE as u64)?)?;
        let values = add(rra_ptr, mul(rra, RRA_PTR_SIZE as u64)?)?;
        let mut slots = 0u64;
        for &rows in row_counts {
            slots = add(slots, mul(rows as u64, ds)?)?;
        }
        let total = add(values, mul(slots, 8)?)?;
        Ok(Self {
            live_head,
            pdp_prep,
            cdp_prep,
            rra_ptr,
            values,
            total,
        })
    }
}

/// A fully decoded file.
#[derive(Debug, Clone, PartialEq)]
pub struct Rrd {
    /// Static header.
    pub header: StaticHeader,
    /// Data source definitions.
    pub data_sources: Vec<DataSourceDef>,
    /// Archive definitions.
    pub archives: Vec<ArchiveDef>,
    /// Last update time.
    pub live: LiveHeader,
    /// PDP accumulators, one per data source.
    pub pdp: Vec<PdpPrep>,
    /// CDP accumulators, archive-major (`archive * ds_count + ds`).
    pub cdp: Vec<CdpState>,
    /// Most recently written row of each archive.
    pub current_rows: Vec<usize>,
    /// Archive rows.
    pub values: ValueArea,
}

impl Rrd {
    /// Number of data sources.
    pub fn ds_count(&self) -> usize {
        self.data_sources.len()
    }

    /// Seconds per primary step.
    pub fn step(&self) -> u64 {
        self.header.pdp_step
    }

    /// Index of the data source called `name`.
    pub fn ds_index(&self, name: &str) -> Option<usize> {
        self.data_sources.iter().position(|ds| ds.name == name)
    }

    /// Index into [`Rrd::cdp`] for an (archive, data source) pair.
    pub fn cdp_index(&self, archive: usize, ds: usize) -> usize {
        archive * self.ds_count() + ds
    }

    /// CDP state of an (archive, data source) pair.
    pub fn cdp(&self, archive: usize, ds: usize) -> &CdpState {
        &self.cdp[self.cdp_index(archive, ds)]
    }

    /// Mutable CDP state of an (archive, data source) pair.
    pub fn cdp_mut(&mut self, archive: usize, ds: usize) -> &mut CdpState {
        let idx = self.cdp_index(archive, ds);
        &mut self.cdp[idx]
    }

    /// Row counts of every archive, in order.
    pub fn row_counts(&self) -> Vec<usize> {
        self.archives.iter().map(|a| a.row_count).collect()
    }

    /// Computes the block layout.
    pub fn layout(&self) -> Result<Layout> {
        Layout::new(&self.header, &self.row_counts())
    }

    /// Checks counts, shapes and archive dependencies.
    ///
    /// # Errors
    ///
    /// Returns a format error describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        let ds_count = self.ds_count();
        let rra_count = self.archives.len();
        if ds_count != self.header.ds_count || rra_count != self.header.rra_count {
            return Err(RrdError::InvalidLayout(
                "definition counts disagree with the header".into(),
            ));
        }
        if self.pdp.len() != ds_count
            || self.cdp.len() != ds_count * rra_count
            || self.current_rows.len() != rra_count
            || self.values.ds_count() != ds_count
            || self.values.archive_count() != rra_count
        {
            return Err(RrdError::InvalidLayout(
                "state block counts disagree with the header".into(),
            ));
        }
        for (i, ds) in self.data_sources.iter().enumerate() {
            if self.data_sources[..i].iter().any(|d| d.name == ds.name) {
                return Err(RrdError::InvalidLayout(format!(
                    "duplicate data source name {}",
                    ds.name
                )));
            }
        }
        for (i, archive) in self.archives.iter().enumerate() {
            archive.validate_shape()?;
            if self.current_rows[i] >= archive.row_count {
                return Err(RrdError::InvalidLayout(format!(
                    "archive {} current row {} beyond {} rows",
                    i, self.current_rows[i], archive.row_count
                )));
            }
        }
        crate::consolidate::graph::ArchiveGraph::resolve(&self.archives)?;
        Ok(())
    }

    /// Decodes a whole file.
    ///
    /// # Errors
    ///
    /// Returns a format error if the header checks fail, a definition names
    /// an unknown type, the byte length does not match the header counts, or
    /// the archive dependencies are inconsistent.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let header = StaticHeader::read_from(reader)?;

        let overflow = || RrdError::InvalidLayout("definition counts overflow".into());
        let ds_len = header
            .ds_count
            .checked_mul(DS_DEF_SIZE)
            .ok_or_else(overflow)?;
        let defs_len = header
            .rra_count
            .checked_mul(RRA_DEF_SIZE)
            .and_then(|rra_len| rra_len.checked_add(ds_len))
            .ok_or_else(overflow)?;
        let mut defs = try_alloc_bytes(defs_len)?;
        read_exact_or_size(reader, &mut defs, STAT_HEAD_SIZE as u64)?;

        let (ds_bytes, rra_bytes) = defs.split_at(ds_len);
        let data_sources = ds_bytes
            .chunks_exact(DS_DEF_SIZE)
            .map(decode_ds_def)
            .collect::<Result<Vec<_>>>()?;
        let archives = rra_bytes
            .chunks_exact(RRA_DEF_SIZE)
            .map(|chunk| decode_rra_def(chunk, header.version))
            .collect::<Result<Vec<_>>>()?;

        let row_counts: Vec<usize> = archives.iter().map(|a| a.row_count).collect();
        let layout = Layout::new(&header, &row_counts)?;
        let tail_len = usize::try_from(layout.total - layout.live_head)
            .map_err(|_| RrdError::InvalidLayout("file too large".into()))?;
        let mut tail = try_alloc_bytes(tail_len)?;
        read_exact_or_size(reader, &mut tail, layout.live_head)?;
        let mut extra = [0u8; 1];
        if reader.read(&mut extra)? != 0 {
            return Err(RrdError::SizeMismatch {
                expected: layout.total,
                actual: layout.total + 1,
            });
        }

        let mut pos = 0usize;
        let live = LiveHeader {
            last_update: i64::from_ne_bytes(tail[0..8].try_into().unwrap()),
            last_update_usec: if header.has_usec() {
                i64::from_ne_bytes(tail[8..16].try_into().unwrap())
            } else {
                0
            },
        };
        pos += header.live_head_size();

        let mut pdp = Vec::with_capacity(header.ds_count);
        for _ in 0..header.ds_count {
            let block = &tail[pos..pos + PDP_PREP_SIZE];
            let last_ds = c_string(&block[0..LAST_DS_LEN]);
            let raw = words(&block[32..PDP_PREP_SIZE]);
            pdp.push(PdpPrep::from_raw(last_ds, &raw));
            pos += PDP_PREP_SIZE;
        }

        let mut cdp = Vec::with_capacity(header.ds_count * header.rra_count);
        for archive in &archives {
            for _ in 0..header.ds_count {
                let raw = words(&tail[pos..pos + CDP_PREP_SIZE]);
                cdp.push(CdpState::from_raw(&archive.cf, &raw));
                pos += CDP_PREP_SIZE;
            }
        }

        let mut current_rows = Vec::with_capacity(header.rra_count);
        for _ in 0..header.rra_count {
            let row = u64::from_ne_bytes(tail[pos..pos + 8].try_into().unwrap());
            current_rows.push(row as usize);
            pos += RRA_PTR_SIZE;
        }

        let value_bytes = &tail[pos..];
        let mut values = Vec::new();
        values
            .try_reserve_exact(value_bytes.len() / 8)
            .map_err(|_| RrdError::ResourceExhausted("value area".into()))?;
        values.extend(
            value_bytes
                .chunks_exact(8)
                .map(|c| f64::from_ne_bytes(c.try_into().unwrap())),
        );
        let values = ValueArea::from_values(values, &row_counts, header.ds_count)?;

        let rrd = Self {
            header,
            data_sources,
            archives,
            live,
            pdp,
            cdp,
            current_rows,
            values,
        };
        rrd.validate()?;
        Ok(rrd)
    }

    /// Encodes the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.header.write_to(writer)?;

        let mut buf = Vec::with_capacity(
            self.data_sources.len() * DS_DEF_SIZE + self.archives.len() * RRA_DEF_SIZE,
        );
        for ds in &self.data_sources {
            encode_ds_def(ds, &mut buf);
        }
        for archive in &self.archives {
            encode_rra_def(archive, &mut buf);
        }
        writer.write_all(&buf)?;

        self.write_state_to(writer)
    }

    /// Encodes the mutable tail: live header, PDP and CDP prep, archive
    /// pointers and values. This is exactly the region an update rewrites.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_state_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let layout = self.layout()?;
        let len = (layout.total - layout.live_head) as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| RrdError::ResourceExhausted("write-back buffer".into()))?;

        // Live header (16 bytes, 8 before version 3)
        buf.extend_from_slice(&self.live.last_update.to_ne_bytes());
        if self.header.has_usec() {
            buf.extend_from_slice(&self.live.last_update_usec.to_ne_bytes());
        }

        // PDP prep (112 bytes each)
        for pdp in &self.pdp {
            let mut name = [0u8; LAST_DS_LEN + 2];
            put_c_string(&mut name[..LAST_DS_LEN], &pdp.last_ds);
            buf.extend_from_slice(&name);
            put_words(&mut buf, &pdp.to_raw());
        }

        // CDP prep (80 bytes each)
        for cdp in &self.cdp {
            put_words(&mut buf, &cdp.to_raw());
        }

        // RRA pointers (8 bytes each)
        for row in &self.current_rows {
            buf.extend_from_slice(&(*row as u64).to_ne_bytes());
        }

        // Values (8 bytes each)
        for value in self.values.as_slice() {
            buf.extend_from_slice(&value.to_ne_bytes());
        }

        writer.write_all(&buf)?;
        Ok(())
    }
}

fn try_alloc_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| RrdError::ResourceExhausted(format!("{} byte buffer", len)))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Reads exactly `buf.len()` bytes, reporting a short file as a size mismatch.
fn read_exact_or_size<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(RrdError::SizeMismatch {
                    expected: offset + buf.len() as u64,
                    actual: offset + filled as u64,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn put_c_string(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}

fn words(bytes: &[u8]) -> Scratch {
    let mut raw = [0u64; SCRATCH_WORDS];
    for (word, chunk) in raw.iter_mut().zip(bytes.chunks_exact(8)) {
        *word = u64::from_ne_bytes(chunk.try_into().unwrap());
    }
    raw
}

fn put_words(buf: &mut Vec<u8>, raw: &Scratch) {
    for word in raw {
        buf.extend_from_slice(&word.to_ne_bytes());
    }
}

fn par_f64(par: &Scratch, slot: usize) -> f64 {
    f64::from_bits(par[slot])
}

fn par_index(par: &Scratch, slot: usize) -> usize {
    par[slot] as usize
}

fn decode_ds_def(block: &[u8]) -> Result<DataSourceDef> {
    let name = c_string(&block[0..NAME_FIELD]);
    let dst = c_string(&block[NAME_FIELD..2 * NAME_FIELD]);
    let par = words(&block[40..DS_DEF_SIZE]);
    let kind = if dst == "COMPUTE" {
        let program: [u8; CDEF_PROGRAM_SIZE] = block[DS_CDEF_OFFSET..DS_DEF_SIZE]
            .try_into()
            .unwrap();
        DataSourceKind::Compute(CdefProgram(program))
    } else {
        parse_dst(&dst)?
    };
    let (min, max) = match kind {
        DataSourceKind::Compute(_) => (f64::NAN, f64::NAN),
        _ => (par_f64(&par, DS_MIN_VAL), par_f64(&par, DS_MAX_VAL)),
    };
    Ok(DataSourceDef {
        name,
        kind,
        heartbeat: par[DS_MRHB_CNT],
        min,
        max,
    })
}

fn encode_ds_def(ds: &DataSourceDef, buf: &mut Vec<u8>) {
    let mut block = [0u8; DS_DEF_SIZE];
    put_c_string(&mut block[0..NAME_FIELD], &ds.name);
    put_c_string(&mut block[NAME_FIELD..2 * NAME_FIELD], ds.kind.name());
    block[40..48].copy_from_slice(&ds.heartbeat.to_ne_bytes());
    match &ds.kind {
        DataSourceKind::Compute(program) => {
            block[DS_CDEF_OFFSET..DS_DEF_SIZE].copy_from_slice(&program.0);
        }
        _ => {
            block[48..56].copy_from_slice(&ds.min.to_ne_bytes());
            block[56..64].copy_from_slice(&ds.max.to_ne_bytes());
        }
    }
    buf.extend_from_slice(&block);
}

fn decode_rra_def(block: &[u8], version: u8) -> Result<ArchiveDef> {
    let cf_name: CfName = c_string(&block[0..NAME_FIELD]).parse()?;
    let row_count = u64::from_ne_bytes(block[24..32].try_into().unwrap()) as usize;
    let pdp_count = u64::from_ne_bytes(block[32..40].try_into().unwrap()) as usize;
    let par = words(&block[40..RRA_DEF_SIZE]);

    let basic = || BasicParams {
        xff: par_f64(&par, RRA_CDP_XFF_VAL),
    };
    let predict = || PredictParams {
        alpha: par_f64(&par, RRA_HW_ALPHA),
        beta: par_f64(&par, RRA_HW_BETA),
        seasonal: par_index(&par, RRA_DEPENDENT_RRA_IDX),
    };
    let seasonal = || {
        let window = par_f64(&par, RRA_SEASONAL_SMOOTHING_WINDOW);
        SeasonalParams {
            gamma: par_f64(&par, RRA_SEASONAL_GAMMA),
            // Older files leave the slot zeroed.
            smoothing_window: if version < 4 || !(window > 0.0 && window < 1.0) {
                DEFAULT_SMOOTHING_WINDOW
            } else {
                window
            },
            smooth_index: par_index(&par, RRA_SEASONAL_SMOOTH_IDX),
            predictor: par_index(&par, RRA_DEPENDENT_RRA_IDX),
        }
    };

    let cf = match cf_name {
        CfName::Average => Consolidation::Average(basic()),
        CfName::Minimum => Consolidation::Minimum(basic()),
        CfName::Maximum => Consolidation::Maximum(basic()),
        CfName::Last => Consolidation::Last(basic()),
        CfName::HwPredict => Consolidation::HwPredict(predict()),
        CfName::MhwPredict => Consolidation::MhwPredict(predict()),
        CfName::Seasonal => Consolidation::Seasonal(seasonal()),
        CfName::DevSeasonal => Consolidation::DevSeasonal(seasonal()),
        CfName::DevPredict => Consolidation::DevPredict(DevPredictParams {
            devseasonal: par_index(&par, RRA_DEPENDENT_RRA_IDX),
        }),
        CfName::Failures => Consolidation::Failures(FailuresParams {
            delta_pos: par_f64(&par, RRA_DELTA_POS),
            delta_neg: par_f64(&par, RRA_DELTA_NEG),
            window_len: par_index(&par, RRA_WINDOW_LEN),
            threshold: par_index(&par, RRA_FAILURE_THRESHOLD),
            devseasonal: par_index(&par, RRA_DEPENDENT_RRA_IDX),
        }),
    };
    Ok(ArchiveDef {
        cf,
        pdp_count,
        row_count,
    })
}

fn encode_rra_def(archive: &ArchiveDef, buf: &mut Vec<u8>) {
    let mut par = [0u64; PAR_WORDS];
    match &archive.cf {
        Consolidation::Average(p)
        | Consolidation::Minimum(p)
        | Consolidation::Maximum(p)
        | Consolidation::Last(p) => {
            par[RRA_CDP_XFF_VAL] = p.xff.to_bits();
        }
        Consolidation::HwPredict(p) | Consolidation::MhwPredict(p) => {
            par[RRA_HW_ALPHA] = p.alpha.to_bits();
            par[RRA_HW_BETA] = p.beta.to_bits();
            par[RRA_DEPENDENT_RRA_IDX] = p.seasonal as u64;
        }
        Consolidation::Seasonal(p) | Consolidation::DevSeasonal(p) => {
            par[RRA_SEASONAL_GAMMA] = p.gamma.to_bits();
            par[RRA_SEASONAL_SMOOTHING_WINDOW] = p.smoothing_window.to_bits();
            par[RRA_SEASONAL_SMOOTH_IDX] = p.smooth_index as u64;
            par[RRA_DEPENDENT_RRA_IDX] = p.predictor as u64;
        }
        Consolidation::DevPredict(p) => {
            par[RRA_DEPENDENT_RRA_IDX] = p.devseasonal as u64;
        }
        Consolidation::Failures(p) => {
            par[RRA_DELTA_POS] = p.delta_pos.to_bits();
            par[RRA_DELTA_NEG] = p.delta_neg.to_bits();
            par[RRA_WINDOW_LEN] = p.window_len as u64;
            par[RRA_FAILURE_THRESHOLD] = p.threshold as u64;
            par[RRA_DEPENDENT_RRA_IDX] = p.devseasonal as u64;
        }
    }

    let mut block = [0u8; 40];
    put_c_string(&mut block[0..NAME_FIELD], archive.cf.cf_name().as_str());
    block[24..32].copy_from_slice(&(archive.row_count as u64).to_ne_bytes());
    block[32..40].copy_from_slice(&(archive.pdp_count as u64).to_ne_bytes());
    buf.extend_from_slice(&block);
    put_words(buf, &par);
}
