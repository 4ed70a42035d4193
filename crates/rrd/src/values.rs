//! Value area: the ring buffers of every archive in one flat arena.
//!
//! Each archive owns `rows x ds_count` contiguous slots, archives follow each
//! other in definition order. [`ArchiveRows`] and [`ArchiveRowsMut`] wrap one
//! archive's block and own all row arithmetic, including wraparound.

use crate::error::{Result, RrdError};

/// Location of one archive's block within the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArchiveExtent {
    offset: usize,
    rows: usize,
}

/// Flat storage for every archive row of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueArea {
    values: Vec<f64>,
    extents: Vec<ArchiveExtent>,
    ds_count: usize,
}

impl ValueArea {
    /// Creates an area filled with NaN ("no data").
    pub fn new(row_counts: &[usize], ds_count: usize) -> Result<Self> {
        let (extents, total) = Self::extents(row_counts, ds_count)?;
        let mut values = Vec::new();
        values.try_reserve_exact(total).map_err(|_| {
            RrdError::ResourceExhausted(format!("value area of {} slots", total))
        })?;
        values.resize(total, f64::NAN);
        Ok(Self {
            values,
            extents,
            ds_count,
        })
    }

    /// Wraps already decoded values, checking the total size.
    pub fn from_values(values: Vec<f64>, row_counts: &[usize], ds_count: usize) -> Result<Self> {
        let (extents, total) = Self::extents(row_counts, ds_count)?;
        if values.len() != total {
            return Err(RrdError::SizeMismatch {
                expected: (total * 8) as u64,
                actual: (values.len() * 8) as u64,
            });
        }
        Ok(Self {
            values,
            extents,
            ds_count,
        })
    }

    fn extents(row_counts: &[usize], ds_count: usize) -> Result<(Vec<ArchiveExtent>, usize)> {
        let mut extents = Vec::with_capacity(row_counts.len());
        let mut offset = 0usize;
        for &rows in row_counts {
            extents.push(ArchiveExtent { offset, rows });
            offset = rows
                .checked_mul(ds_count)
                .and_then(|n| offset.checked_add(n))
                .ok_or_else(|| RrdError::InvalidLayout("value area size overflows".into()))?;
        }
        Ok((extents, offset))
    }

    /// Number of values per row.
    pub fn ds_count(&self) -> usize {
        self.ds_count
    }

    /// Number of archives.
    pub fn archive_count(&self) -> usize {
        self.extents.len()
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the area has no slots.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All slots in file order.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Read access to one archive.
    ///
    /// # Panics
    ///
    /// Panics if `archive` is out of range.
    pub fn archive(&self, archive: usize) -> ArchiveRows<'_> {
        let ext = self.extents[archive];
        ArchiveRows {
            values: &self.values[ext.offset..ext.offset + ext.rows * self.ds_count],
            rows: ext.rows,
            ds_count: self.ds_count,
        }
    }

    /// Write access to one archive.
    ///
    /// # Panics
    ///
    /// Panics if `archive` is out of range.
    pub fn archive_mut(&mut self, archive: usize) -> ArchiveRowsMut<'_> {
        let ext = self.extents[archive];
        ArchiveRowsMut {
            values: &mut self.values[ext.offset..ext.offset + ext.rows * self.ds_count],
            rows: ext.rows,
            ds_count: self.ds_count,
        }
    }
}

/// Wraps `row + offset` into `0..rows`.
fn wrap(row: usize, offset: usize, rows: usize) -> usize {
    ((row % rows) + (offset % rows)) % rows
}

/// Read-only view of one archive's ring buffer.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveRows<'a> {
    values: &'a [f64],
    rows: usize,
    ds_count: usize,
}

impl<'a> ArchiveRows<'a> {
    /// Ring capacity.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Row index `offset` rows after `row`, wrapping.
    pub fn wrap(&self, row: usize, offset: usize) -> usize {
        wrap(row, offset, self.rows)
    }

    /// Values of one row, one per data source.
    ///
    /// # Panics
    ///
    /// Panics if `row >= rows()`.
    pub fn row(&self, row: usize) -> &'a [f64] {
        assert!(row < self.rows, "row {} out of range {}", row, self.rows);
        &self.values[row * self.ds_count..(row + 1) * self.ds_count]
    }

    /// One value of one row.
    pub fn get(&self, row: usize, ds: usize) -> f64 {
        self.row(row)[ds]
    }

    /// The whole block in row-major order.
    pub fn as_slice(&self) -> &'a [f64] {
        self.values
    }
}

/// Mutable view of one archive's ring buffer.
#[derive(Debug)]
pub struct ArchiveRowsMut<'a> {
    values: &'a mut [f64],
    rows: usize,
    ds_count: usize,
}

impl ArchiveRowsMut<'_> {
    /// Ring capacity.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Row index `offset` rows after `row`, wrapping.
    pub fn wrap(&self, row: usize, offset: usize) -> usize {
        wrap(row, offset, self.rows)
    }

    /// Mutable values of one row.
    ///
    /// # Panics
    ///
    /// Panics if `row >= rows()`.
    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        assert!(row < self.rows, "row {} out of range {}", row, self.rows);
        &mut self.values[row * self.ds_count..(row + 1) * self.ds_count]
    }

    /// Sets one value of one row.
    pub fn set(&mut self, row: usize, ds: usize, value: f64) {
        self.row_mut(row)[ds] = value;
    }

    /// The whole block in row-major order.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        self.values
    }
}
