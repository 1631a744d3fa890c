//! Tagged row identifiers.
//!
//! A tid addresses either the master row array or the dangling row array.
//! The raw form is a `u64` whose top bit is the tag; [`RowId`] is the
//! structured form used everywhere inside the crate.

use std::fmt as StdFmt;

/// Tag bit marking a raw tid as dangling.
pub const DANGLING_BIT: u64 = 1 << 63;

/// Row identifier.
///
/// - `Master(i)`: row `i` of the master array. Every row inserted on master
///   lives here, and so do branch inserts unless the store is configured to
///   place them in the dangling array.
/// - `Dangling(i)`: row `i` of the dangling array. These rows were created
///   inside a non-master branch and master never sees them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowId {
    /// Index into the master row array.
    Master(u32),
    /// Index into the dangling row array.
    Dangling(u32),
}

impl RowId {
    /// Row index within its array.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        match self {
            Self::Master(index) | Self::Dangling(index) => index,
        }
    }

    /// Check whether this tid addresses the dangling array.
    #[inline]
    #[must_use]
    pub const fn is_dangling(self) -> bool {
        matches!(self, Self::Dangling(_))
    }

    /// Encode as a tagged raw tid.
    #[inline]
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        match self {
            Self::Master(index) => index as u64,
            Self::Dangling(index) => mark_dangling(index as u64),
        }
    }

    /// Decode a tagged raw tid.
    ///
    /// # Returns
    /// `None` if the untagged part does not fit a row index.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        let index = u32::try_from(unmark_dangling(raw)).ok()?;
        Some(if is_dangling(raw) {
            Self::Dangling(index)
        } else {
            Self::Master(index)
        })
    }
}

impl StdFmt::Display for RowId {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::Master(index) => write!(f, "m{index}"),
            Self::Dangling(index) => write!(f, "d{index}"),
        }
    }
}

/// Set the dangling tag on a raw tid.
#[inline]
#[must_use]
pub const fn mark_dangling(raw: u64) -> u64 {
    raw | DANGLING_BIT
}

/// Clear the dangling tag on a raw tid.
#[inline]
#[must_use]
pub const fn unmark_dangling(raw: u64) -> u64 {
    raw & !DANGLING_BIT
}

/// Check the dangling tag on a raw tid.
#[inline]
#[must_use]
pub const fn is_dangling(raw: u64) -> bool {
    (raw & DANGLING_BIT) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_unmark() {
        let raw: u64 = 42;
        let tagged = mark_dangling(raw);

        assert!(is_dangling(tagged));
        assert!(!is_dangling(raw));
        assert_eq!(unmark_dangling(tagged), raw);
        assert_eq!(mark_dangling(tagged), tagged);
    }

    #[test]
    fn test_row_id_raw_forms() {
        assert_eq!(RowId::Master(7).to_raw(), 7);
        assert_eq!(RowId::Dangling(7).to_raw(), DANGLING_BIT | 7);
        assert_eq!(RowId::from_raw(DANGLING_BIT | 9), Some(RowId::Dangling(9)));
        assert_eq!(RowId::from_raw(9), Some(RowId::Master(9)));
        assert_eq!(RowId::from_raw(u64::from(u32::MAX) + 1), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(RowId::Master(3).to_string(), "m3");
        assert_eq!(RowId::Dangling(3).to_string(), "d3");
    }
}
