//! In-memory slot table and its rectangular geometry.
//!
//! Queries view the flat slot array as a `width × height` grid. Both ends
//! of a protocol must derive identical dimensions from `(db_size,
//! group_size)`, so the derivation lives here as a pure function of the
//! metadata and is used by every query constructor and every scan.
//!
//! ## Grid layout (8 slots, group size 2)
//!
//! ```text
//!           col 0   col 1   col 2   col 3
//!         ┌───────┬───────┬───────┬───────┐
//! row 0   │  S0   │  S1   │  S2   │  S3   │   groups (S0,S1) (S2,S3)
//!         ├───────┼───────┼───────┼───────┤
//! row 1   │  S4   │  S5   │  S6   │  S7   │   groups (S4,S5) (S6,S7)
//!         └───────┴───────┴───────┴───────┘
//! ```
//!
//! The width is always inflated to a multiple of the group size, so a
//! column selector over `width / group_size` positions pulls a whole group
//! at once. Cells past the end of the slot array are implicit empty slots.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PirError, Result};
use crate::slot::Slot;

/// Shape of a database: everything a client needs to build queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMetadata {
    /// Number of slots.
    pub db_size: usize,
    /// Width of each slot in bytes.
    pub slot_bytes: usize,
}

/// A server-side table of slots. Immutable once built.
#[derive(Clone, Debug)]
pub struct Database {
    pub meta: DbMetadata,
    pub slots: Vec<Slot>,
    /// Optional per-slot keyword column for keyword-based queries.
    pub keywords: Option<Vec<u32>>,
}

impl Database {
    /// Database of `db_size` uniformly random slots.
    pub fn random(db_size: usize, slot_bytes: usize, rng: &mut impl Rng) -> Self {
        let slots = (0..db_size).map(|_| Slot::random(slot_bytes, rng)).collect();
        Self {
            meta: DbMetadata { db_size, slot_bytes },
            slots,
            keywords: None,
        }
    }

    /// Database of `db_size` all-zero slots.
    pub fn empty(db_size: usize, slot_bytes: usize) -> Self {
        let slots = (0..db_size).map(|_| Slot::empty(slot_bytes)).collect();
        Self {
            meta: DbMetadata { db_size, slot_bytes },
            slots,
            keywords: None,
        }
    }

    /// Database built from existing slots, which must share one width.
    pub fn from_slots(slots: Vec<Slot>) -> Result<Self> {
        let slot_bytes = slots.first().map(Slot::len).unwrap_or(0);
        if slots.iter().any(|s| s.len() != slot_bytes) {
            return Err(PirError::ShapeMismatch(
                "all slots in a database must have the same width".into(),
            ));
        }
        Ok(Self {
            meta: DbMetadata {
                db_size: slots.len(),
                slot_bytes,
            },
            slots,
            keywords: None,
        })
    }

    /// Attach a keyword column, one keyword per slot.
    pub fn with_keywords(mut self, keywords: Vec<u32>) -> Result<Self> {
        if keywords.len() != self.meta.db_size {
            return Err(PirError::ShapeMismatch(format!(
                "{} keywords for {} slots",
                keywords.len(),
                self.meta.db_size
            )));
        }
        self.keywords = Some(keywords);
        Ok(self)
    }
}

impl DbMetadata {
    /// Derive a `(width, height)` grid for this database.
    ///
    /// The height is taken from `hint_height`; the width is the smallest
    /// multiple of `group_size` that is at least `⌈db_size / height⌉`, so
    /// `width × height` covers every slot and each row splits evenly into
    /// groups.
    pub fn dimensions_for_db(&self, hint_height: usize, group_size: usize) -> Result<(usize, usize)> {
        if group_size == 0 {
            return Err(PirError::Geometry("group size must be positive".into()));
        }
        if hint_height == 0 {
            return Err(PirError::Geometry("database height is zero".into()));
        }
        let raw_width = self.db_size.div_ceil(hint_height).max(1);
        let width = raw_width.div_ceil(group_size) * group_size;
        Ok((width, hint_height))
    }

    /// Canonical square-ish grid: height `⌈√db_size⌉`, width inflated to
    /// the next multiple of the group size.
    pub fn square_dimensions(&self, group_size: usize) -> Result<(usize, usize)> {
        let height = (self.db_size as f64).sqrt().ceil() as usize;
        self.dimensions_for_db(height.max(1), group_size)
    }

    /// Map a flat slot index into `(row, column)` on a `width × height`
    /// grid. Indices in `[db_size, width × height)` name implicit empty
    /// slots and are still mapped.
    pub fn index_to_coordinates(&self, index: usize, width: usize, height: usize) -> Result<(usize, usize)> {
        if width == 0 || index >= width * height {
            return Err(PirError::Geometry(format!(
                "index {index} outside a {width}x{height} grid"
            )));
        }
        Ok((index / width, index % width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_cover_database() {
        for db_size in [1, 9, 10, 100, 256, 1000] {
            let meta = DbMetadata { db_size, slot_bytes: 8 };
            for group_size in 1..6 {
                let (w, h) = meta.square_dimensions(group_size).unwrap();
                assert!(w * h >= db_size, "grid {w}x{h} does not cover {db_size} slots");
                assert_eq!(w % group_size, 0, "width {w} not a multiple of {group_size}");
                // allow at most one extra row's worth of padding beyond
                // the group-size rounding
                assert!(w * h < db_size + w + group_size * h);
            }
        }
    }

    #[test]
    fn test_dimensions_respect_height_hint() {
        let meta = DbMetadata { db_size: 256, slot_bytes: 32 };
        let (w, h) = meta.dimensions_for_db(64, 4).unwrap();
        assert_eq!(h, 64);
        assert_eq!(w, 4); // ceil(256/64) = 4, already a multiple of 4
    }

    #[test]
    fn test_dimensions_reject_zero_group() {
        let meta = DbMetadata { db_size: 16, slot_bytes: 4 };
        assert!(meta.dimensions_for_db(4, 0).is_err());
    }

    #[test]
    fn test_index_to_coordinates() {
        let meta = DbMetadata { db_size: 12, slot_bytes: 4 };
        assert_eq!(meta.index_to_coordinates(0, 4, 3).unwrap(), (0, 0));
        assert_eq!(meta.index_to_coordinates(5, 4, 3).unwrap(), (1, 1));
        assert_eq!(meta.index_to_coordinates(11, 4, 3).unwrap(), (2, 3));
        assert!(meta.index_to_coordinates(12, 4, 3).is_err());
    }

    #[test]
    fn test_from_slots_rejects_mixed_widths() {
        let slots = vec![Slot::empty(4), Slot::empty(5)];
        assert!(Database::from_slots(slots).is_err());
    }

    #[test]
    fn test_with_keywords_checks_length() {
        let mut rng = rand::rng();
        let db = Database::random(8, 4, &mut rng);
        assert!(db.clone().with_keywords(vec![0; 7]).is_err());
        assert!(db.with_keywords(vec![0; 8]).is_ok());
    }
}
