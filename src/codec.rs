//! Tuple codec boundary.
//!
//! The chain stores rows as raw bytes. A [`TupleCodec`] turns a caller's tuple
//! into exactly [`Layout::row_width`] bytes and back; the store never looks
//! inside the bytes.

use crate::error::{Result, StoreError};

/// Byte widths of a table's columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    column_widths: Vec<usize>,
    offsets: Vec<usize>,
    row_width: usize,
}

impl Layout {
    /// Create a layout from per-column byte widths.
    #[must_use]
    pub fn new(column_widths: Vec<usize>) -> Self {
        let mut offsets = Vec::with_capacity(column_widths.len());
        let mut row_width = 0;
        for width in &column_widths {
            offsets.push(row_width);
            row_width += width;
        }

        Self {
            column_widths,
            offsets,
            row_width,
        }
    }

    /// Number of columns.
    #[inline]
    #[must_use]
    pub fn columns(&self) -> usize {
        self.column_widths.len()
    }

    /// Total encoded width of one row.
    #[inline]
    #[must_use]
    pub const fn row_width(&self) -> usize {
        self.row_width
    }

    /// Byte range of column `column` within an encoded row.
    #[must_use]
    pub fn column_range(&self, column: usize) -> Option<std::ops::Range<usize>> {
        let start = *self.offsets.get(column)?;
        let width = *self.column_widths.get(column)?;
        Some(start..start + width)
    }

    /// Fail unless `bytes` is exactly one row wide.
    ///
    /// # Errors
    /// [`StoreError::WidthMismatch`].
    pub fn check_width(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() == self.row_width {
            Ok(())
        } else {
            Err(StoreError::WidthMismatch {
                expected: self.row_width,
                actual: bytes.len(),
            })
        }
    }
}

/// Serializes a table's tuples to and from fixed-width rows.
pub trait TupleCodec: Send + Sync {
    /// The caller-facing tuple type.
    type Tuple;

    /// Column layout every encoded row follows.
    fn layout(&self) -> &Layout;

    /// Append the encoding of `tuple` to `out`.
    ///
    /// # Errors
    /// [`StoreError::WidthMismatch`] if the tuple does not fit the layout.
    fn encode(&self, tuple: &Self::Tuple, out: &mut Vec<u8>) -> Result<()>;

    /// Decode one row.
    ///
    /// # Errors
    /// [`StoreError::WidthMismatch`] if `bytes` is not one row wide.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Tuple>;

    /// Encode into a fresh buffer and check its width.
    ///
    /// # Errors
    /// Whatever [`TupleCodec::encode`] returns, or a width mismatch.
    fn encode_row(&self, tuple: &Self::Tuple) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.layout().row_width());
        self.encode(tuple, &mut out)?;
        self.layout().check_width(&out)?;
        Ok(out)
    }
}

// ============================================================================
//  I64Codec
// ============================================================================

/// Rows of `i64` columns, 8 little-endian bytes each.
#[derive(Clone, Debug)]
pub struct I64Codec {
    layout: Layout,
}

impl I64Codec {
    /// Codec for `columns` integer columns.
    #[must_use]
    pub fn new(columns: usize) -> Self {
        Self {
            layout: Layout::new(vec![8; columns]),
        }
    }
}

impl TupleCodec for I64Codec {
    type Tuple = Vec<i64>;

    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn encode(&self, tuple: &Vec<i64>, out: &mut Vec<u8>) -> Result<()> {
        if tuple.len() != self.layout.columns() {
            return Err(StoreError::WidthMismatch {
                expected: self.layout.row_width(),
                actual: tuple.len() * 8,
            });
        }
        for value in tuple {
            out.extend_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<i64>> {
        self.layout.check_width(bytes)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                i64::from_le_bytes(word)
            })
            .collect())
    }
}

// ============================================================================
//  BytesCodec
// ============================================================================

/// Opaque fixed-width byte rows, passed through unchanged.
#[derive(Clone, Debug)]
pub struct BytesCodec {
    layout: Layout,
}

impl BytesCodec {
    /// Codec for rows of `width` bytes, stored as one column.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            layout: Layout::new(vec![width]),
        }
    }

    /// Codec with explicit column widths.
    #[must_use]
    pub const fn with_layout(layout: Layout) -> Self {
        Self { layout }
    }
}

impl TupleCodec for BytesCodec {
    type Tuple = Vec<u8>;

    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn encode(&self, tuple: &Vec<u8>, out: &mut Vec<u8>) -> Result<()> {
        self.layout.check_width(tuple)?;
        out.extend_from_slice(tuple);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.layout.check_width(bytes)?;
        Ok(bytes.to_vec())
    }
}
