//! Single-server PIR over homomorphically encrypted selection vectors.
//!
//! The database is viewed as a `width × height` grid. A client encrypts
//! the indicator of one row; the server raises each selector ciphertext
//! to the matching slot chunk and multiplies down every column, which is
//! a homomorphic inner product: the column's output decrypts to the chunk
//! of the selected row.
//!
//! The doubly-encrypted form runs the same inner product twice. The row
//! pass yields one level-one ciphertext per column; the column pass then
//! treats those ciphertexts as an encrypted database of `width /
//! group_size` rows and selects one column group with level-two
//! ciphertexts, compressing the answer from a whole row down to one
//! group.
//!
//! A query built with `index = None` is a null query: every selector
//! encrypts zero and every recovered slot comes back empty. Null queries
//! are indistinguishable from real ones and serve as the decoy branch of
//! the authenticated protocol.

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::{Database, DbMetadata};
use crate::error::{PirError, Result};
use crate::paillier::{Ciphertext, EncLevel, PublicKey, SecretKey};
use crate::slot::Slot;

/// An encrypted selection vector over the rows of a grid view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedQuery {
    pub pk: PublicKey,
    /// Encryptions of the indicator bits, one per row.
    pub bits: Vec<Ciphertext>,
    pub group_size: usize,
    pub db_width: usize,
    pub db_height: usize,
}

/// Row and column selectors of a recursive query. The column selector is
/// one nesting level deeper so it can operate on the encrypted row
/// result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoublyEncryptedQuery {
    pub row: EncryptedQuery,
    pub col: EncryptedQuery,
}

/// One output slot of the row pass: `⌈slot_bytes / K⌉` level-one
/// ciphertexts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedSlot {
    pub cts: Vec<Ciphertext>,
}

/// One output slot of the column pass, at nesting level two.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoublyEncryptedSlot {
    pub cts: Vec<Ciphertext>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedQueryResult {
    pub slots: Vec<EncryptedSlot>,
    pub slot_bytes: usize,
    pub bytes_per_ciphertext: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoublyEncryptedQueryResult {
    pub slots: Vec<DoublyEncryptedSlot>,
    pub slot_bytes: usize,
    pub bytes_per_ciphertext: usize,
}

// ============================================================================
// Client: query construction and recovery
// ============================================================================

impl DbMetadata {
    /// Encrypted query against the canonical square-ish grid. `index`
    /// names the row to fetch; `None` builds a null query.
    pub fn new_encrypted_query(
        &self,
        pk: &PublicKey,
        group_size: usize,
        index: Option<usize>,
        rng: &mut impl Rng,
    ) -> Result<EncryptedQuery> {
        let (width, height) = self.square_dimensions(group_size)?;
        self.new_encrypted_query_with_dimensions(pk, width, height, group_size, index, rng)
    }

    /// Encrypted query against an explicit `width × height` grid view.
    pub fn new_encrypted_query_with_dimensions(
        &self,
        pk: &PublicKey,
        width: usize,
        height: usize,
        group_size: usize,
        index: Option<usize>,
        rng: &mut impl Rng,
    ) -> Result<EncryptedQuery> {
        validate_grid(self, width, height, group_size)?;
        if let Some(row) = index {
            if row >= height {
                return Err(PirError::Geometry(format!(
                    "row {row} outside a {height}-row grid"
                )));
            }
        }

        let bits = (0..height)
            .map(|i| {
                if Some(i) == index {
                    pk.encrypt_one(EncLevel::One, rng)
                } else {
                    pk.encrypt_zero(EncLevel::One, rng)
                }
            })
            .collect();

        Ok(EncryptedQuery {
            pk: pk.clone(),
            bits,
            group_size,
            db_width: width,
            db_height: height,
        })
    }

    /// Recursive query for the group containing slot `index`, against the
    /// canonical grid. `None` builds a null query.
    pub fn new_doubly_encrypted_query(
        &self,
        pk: &PublicKey,
        group_size: usize,
        index: Option<usize>,
        rng: &mut impl Rng,
    ) -> Result<DoublyEncryptedQuery> {
        let (width, height) = self.square_dimensions(group_size)?;

        let (row_index, col_index) = match index {
            Some(i) => {
                if i >= self.db_size {
                    return Err(PirError::Geometry(format!(
                        "slot {i} outside a {}-slot database",
                        self.db_size
                    )));
                }
                let (row, col) = self.index_to_coordinates(i, width, height)?;
                (Some(row), Some(col / group_size))
            }
            None => (None, None),
        };

        let row_bits = (0..height)
            .map(|i| {
                if Some(i) == row_index {
                    pk.encrypt_one(EncLevel::One, rng)
                } else {
                    pk.encrypt_zero(EncLevel::One, rng)
                }
            })
            .collect();

        let grouped_width = width / group_size;
        let col_bits = (0..grouped_width)
            .map(|i| {
                if Some(i) == col_index {
                    pk.encrypt_one(EncLevel::Two, rng)
                } else {
                    pk.encrypt_zero(EncLevel::Two, rng)
                }
            })
            .collect();

        Ok(DoublyEncryptedQuery {
            row: EncryptedQuery {
                pk: pk.clone(),
                bits: row_bits,
                group_size,
                db_width: width,
                db_height: height,
            },
            col: EncryptedQuery {
                pk: pk.clone(),
                bits: col_bits,
                group_size,
                db_width: width,
                db_height: 1,
            },
        })
    }

    /// Recursive query that retrieves nothing.
    pub fn new_doubly_encrypted_null_query(
        &self,
        pk: &PublicKey,
        group_size: usize,
        rng: &mut impl Rng,
    ) -> Result<DoublyEncryptedQuery> {
        self.new_doubly_encrypted_query(pk, group_size, None, rng)
    }
}

/// Decrypt a row-pass result back into slots.
pub fn recover_encrypted(res: &EncryptedQueryResult, sk: &SecretKey) -> Result<Vec<Slot>> {
    res.slots
        .iter()
        .map(|eslot| {
            let ints: Vec<_> = eslot.cts.iter().map(|ct| sk.decrypt(ct)).collect();
            Slot::from_chunks(&ints, res.slot_bytes, res.bytes_per_ciphertext)
        })
        .collect()
}

/// Decrypt both layers of a column-pass result back into slots.
pub fn recover_doubly_encrypted(
    res: &DoublyEncryptedQueryResult,
    sk: &SecretKey,
) -> Result<Vec<Slot>> {
    res.slots
        .iter()
        .map(|dslot| {
            let ints: Vec<_> = dslot.cts.iter().map(|ct| sk.nested_decrypt(ct)).collect();
            Slot::from_chunks(&ints, res.slot_bytes, res.bytes_per_ciphertext)
        })
        .collect()
}

// ============================================================================
// Server: scans
// ============================================================================

impl Database {
    /// Homomorphic row selection: one output slot per grid column.
    pub fn private_encrypted_query(
        &self,
        query: &EncryptedQuery,
        nprocs: usize,
    ) -> Result<EncryptedQueryResult> {
        if nprocs == 0 {
            return Err(PirError::Geometry("need at least one worker".into()));
        }
        validate_grid(&self.meta, query.db_width, query.db_height, query.group_size)?;
        if query.bits.len() != query.db_height {
            return Err(PirError::Geometry(format!(
                "row selector has {} entries for {} rows",
                query.bits.len(),
                query.db_height
            )));
        }
        if query.bits.iter().any(|ct| ct.level != EncLevel::One) {
            return Err(PirError::Geometry(
                "row selectors must be level-one ciphertexts".into(),
            ));
        }

        let bytes_per_ciphertext = query.pk.payload_bytes();
        let chunks = self.meta.slot_bytes.div_ceil(bytes_per_ciphertext).max(1);
        let width = query.db_width;

        debug!(
            width,
            height = query.db_height,
            chunks,
            nprocs,
            "encrypted query scan"
        );

        let cols_per_worker = width.div_ceil(nprocs);
        let slots: Vec<EncryptedSlot> = (0..nprocs)
            .into_par_iter()
            .flat_map_iter(|worker| {
                let start = worker * cols_per_worker;
                let end = usize::min(start + cols_per_worker, width);
                (start..end)
                    .map(|col| self.encrypted_column_scan(query, col, chunks, bytes_per_ciphertext))
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(EncryptedQueryResult {
            slots,
            slot_bytes: self.meta.slot_bytes,
            bytes_per_ciphertext,
        })
    }

    fn encrypted_column_scan(
        &self,
        query: &EncryptedQuery,
        col: usize,
        chunks: usize,
        bytes_per_ciphertext: usize,
    ) -> EncryptedSlot {
        let pk = &query.pk;
        let mut acc: Vec<Ciphertext> = (0..chunks).map(|_| pk.identity(EncLevel::One)).collect();

        for (row, bit) in query.bits.iter().enumerate() {
            let idx = row * query.db_width + col;
            if idx >= self.meta.db_size {
                continue; // implicit empty slot
            }
            for (dst, chunk) in acc
                .iter_mut()
                .zip(self.slots[idx].to_chunks(bytes_per_ciphertext))
            {
                if chunk == 0 {
                    continue;
                }
                *dst = pk.add(dst, &pk.const_mul(bit, &chunk));
            }
        }

        EncryptedSlot { cts: acc }
    }

    /// Homomorphic column selection over an already-encrypted row result.
    ///
    /// The intermediate result is reinterpreted as an encrypted database
    /// of `query.bits.len()` rows by `group_size` columns; the level-two
    /// selectors are raised to the level-one ciphertext values, so each
    /// output encrypts exactly the selected level-one ciphertext.
    pub fn private_encrypted_query_over_encrypted_result(
        &self,
        query: &EncryptedQuery,
        prev: &EncryptedQueryResult,
        nprocs: usize,
    ) -> Result<DoublyEncryptedQueryResult> {
        if nprocs == 0 {
            return Err(PirError::Geometry("need at least one worker".into()));
        }
        if query.group_size == 0 {
            return Err(PirError::Geometry("group size must be positive".into()));
        }
        let height = query.bits.len();
        if prev.slots.len() != height * query.group_size {
            return Err(PirError::ShapeMismatch(format!(
                "{} intermediate slots do not tile a {height} x {} grid",
                prev.slots.len(),
                query.group_size
            )));
        }
        if query.bits.iter().any(|ct| ct.level != EncLevel::Two) {
            return Err(PirError::Geometry(
                "column selectors must be level-two ciphertexts".into(),
            ));
        }
        let chunks = prev.slots.first().map(|s| s.cts.len()).unwrap_or(0);
        if prev.slots.iter().any(|s| s.cts.len() != chunks) {
            return Err(PirError::ShapeMismatch(
                "intermediate slots disagree on chunk count".into(),
            ));
        }

        debug!(
            height,
            group_size = query.group_size,
            chunks,
            nprocs,
            "encrypted-over-encrypted scan"
        );

        let pk = &query.pk;
        let group_size = query.group_size;
        let cols_per_worker = group_size.div_ceil(nprocs);

        let slots: Vec<DoublyEncryptedSlot> = (0..nprocs)
            .into_par_iter()
            .flat_map_iter(|worker| {
                let start = worker * cols_per_worker;
                let end = usize::min(start + cols_per_worker, group_size);
                (start..end)
                    .map(|offset| {
                        let mut acc: Vec<Ciphertext> =
                            (0..chunks).map(|_| pk.identity(EncLevel::Two)).collect();
                        for (row, bit) in query.bits.iter().enumerate() {
                            let slot = &prev.slots[row * group_size + offset];
                            for (dst, ct) in acc.iter_mut().zip(&slot.cts) {
                                *dst = pk.add(dst, &pk.const_mul(bit, &ct.c));
                            }
                        }
                        DoublyEncryptedSlot { cts: acc }
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(DoublyEncryptedQueryResult {
            slots,
            slot_bytes: prev.slot_bytes,
            bytes_per_ciphertext: prev.bytes_per_ciphertext,
        })
    }

    /// Two-pass recursive scan: row selection, then column selection over
    /// the encrypted intermediate.
    pub fn private_doubly_encrypted_query(
        &self,
        query: &DoublyEncryptedQuery,
        nprocs: usize,
    ) -> Result<DoublyEncryptedQueryResult> {
        if query.row.group_size != query.col.group_size {
            return Err(PirError::Geometry(
                "row and column selectors disagree on group size".into(),
            ));
        }
        if query.col.bits.len() * query.col.group_size != query.row.db_width {
            return Err(PirError::Geometry(format!(
                "column selector covers {} groups for a width-{} grid",
                query.col.bits.len(),
                query.row.db_width
            )));
        }

        let row_result = self.private_encrypted_query(&query.row, nprocs)?;
        self.private_encrypted_query_over_encrypted_result(&query.col, &row_result, nprocs)
    }
}

fn validate_grid(
    meta: &DbMetadata,
    width: usize,
    height: usize,
    group_size: usize,
) -> Result<()> {
    if group_size == 0 {
        return Err(PirError::Geometry("group size must be positive".into()));
    }
    if height == 0 || width == 0 {
        return Err(PirError::Geometry("grid has a zero dimension".into()));
    }
    if width % group_size != 0 {
        return Err(PirError::Geometry(format!(
            "width {width} is not a multiple of group size {group_size}"
        )));
    }
    if width * height < meta.db_size {
        return Err(PirError::Geometry(format!(
            "a {width}x{height} grid cannot hold {} slots",
            meta.db_size
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paillier::key_gen;

    #[test]
    fn test_encrypted_query_recovers_row() {
        let mut rng = rand::rng();
        let (sk, pk) = key_gen(128, &mut rng);
        let db = Database::random(30, 12, &mut rng);

        for group_size in 1..4 {
            let (width, height) = db.meta.square_dimensions(group_size).unwrap();
            let row = rng.random_range(0..height);

            let query = db
                .meta
                .new_encrypted_query(&pk, group_size, Some(row), &mut rng)
                .unwrap();
            let response = db.private_encrypted_query(&query, 2).unwrap();
            let recovered = recover_encrypted(&response, &sk).unwrap();

            assert_eq!(recovered.len() % group_size, 0);
            for (col, slot) in recovered.iter().enumerate() {
                let idx = row * width + col;
                let expected = if idx < db.meta.db_size {
                    db.slots[idx].clone()
                } else {
                    Slot::empty(db.meta.slot_bytes)
                };
                assert_eq!(*slot, expected, "row {row} col {col} g {group_size}");
            }
        }
    }

    #[test]
    fn test_encrypted_null_query_recovers_empty_row() {
        let mut rng = rand::rng();
        let (sk, pk) = key_gen(128, &mut rng);
        let db = Database::random(25, 6, &mut rng);

        let query = db.meta.new_encrypted_query(&pk, 1, None, &mut rng).unwrap();
        let response = db.private_encrypted_query(&query, 2).unwrap();
        let recovered = recover_encrypted(&response, &sk).unwrap();

        let empty = Slot::empty(db.meta.slot_bytes);
        for slot in &recovered {
            assert_eq!(*slot, empty);
        }
    }

    #[test]
    fn test_slot_wider_than_one_ciphertext() {
        // 40-byte slots over a 128-bit modulus force several chunks per
        // slot
        let mut rng = rand::rng();
        let (sk, pk) = key_gen(128, &mut rng);
        assert!(pk.payload_bytes() < 40);
        let db = Database::random(9, 40, &mut rng);

        let (width, _) = db.meta.square_dimensions(1).unwrap();
        let query = db.meta.new_encrypted_query(&pk, 1, Some(1), &mut rng).unwrap();
        let response = db.private_encrypted_query(&query, 1).unwrap();
        let recovered = recover_encrypted(&response, &sk).unwrap();

        assert_eq!(recovered[0], db.slots[width]);
    }

    #[test]
    fn test_doubly_encrypted_query_recovers_group() {
        let mut rng = rand::rng();
        let (sk, pk) = key_gen(128, &mut rng);
        let db = Database::random(30, 12, &mut rng);

        for group_size in 1..4 {
            let (width, height) = db.meta.square_dimensions(group_size).unwrap();
            let index = rng.random_range(0..db.meta.db_size);

            let query = db
                .meta
                .new_doubly_encrypted_query(&pk, group_size, Some(index), &mut rng)
                .unwrap();
            assert_eq!(query.col.bits.len(), width / group_size);

            let response = db.private_doubly_encrypted_query(&query, 2).unwrap();
            let recovered = recover_doubly_encrypted(&response, &sk).unwrap();
            assert_eq!(recovered.len(), group_size);

            let (row, col) = db.meta.index_to_coordinates(index, width, height).unwrap();
            let group_start = row * width + (col / group_size) * group_size;
            for (j, slot) in recovered.iter().enumerate() {
                let idx = group_start + j;
                let expected = if idx < db.meta.db_size {
                    db.slots[idx].clone()
                } else {
                    Slot::empty(db.meta.slot_bytes)
                };
                assert_eq!(*slot, expected, "index {index} offset {j} g {group_size}");
            }
        }
    }

    #[test]
    fn test_doubly_encrypted_null_query() {
        let mut rng = rand::rng();
        let (sk, pk) = key_gen(128, &mut rng);
        let db = Database::random(20, 8, &mut rng);

        for group_size in [1, 2] {
            let query = db
                .meta
                .new_doubly_encrypted_null_query(&pk, group_size, &mut rng)
                .unwrap();
            let response = db.private_doubly_encrypted_query(&query, 2).unwrap();
            let recovered = recover_doubly_encrypted(&response, &sk).unwrap();

            assert_eq!(recovered.len(), group_size);
            let empty = Slot::empty(db.meta.slot_bytes);
            for slot in &recovered {
                assert_eq!(*slot, empty);
            }
        }
    }

    #[test]
    fn test_parallel_encrypted_scan_is_deterministic() {
        let mut rng = rand::rng();
        let (_sk, pk) = key_gen(128, &mut rng);
        let db = Database::random(16, 8, &mut rng);

        let query = db.meta.new_encrypted_query(&pk, 1, Some(2), &mut rng).unwrap();
        let single = db.private_encrypted_query(&query, 1).unwrap();
        for nprocs in [2, 5, 16] {
            let multi = db.private_encrypted_query(&query, nprocs).unwrap();
            for (a, b) in single.slots.iter().zip(&multi.slots) {
                assert_eq!(a.cts, b.cts, "nondeterministic at {nprocs} workers");
            }
        }
    }

    #[test]
    fn test_malformed_queries_rejected() {
        let mut rng = rand::rng();
        let (_sk, pk) = key_gen(128, &mut rng);
        let db = Database::random(16, 4, &mut rng);

        // selector too short for the declared height
        let mut query = db.meta.new_encrypted_query(&pk, 1, Some(0), &mut rng).unwrap();
        query.bits.pop();
        assert!(db.private_encrypted_query(&query, 1).is_err());

        // grid too small for the database
        let mut query = db.meta.new_encrypted_query(&pk, 1, Some(0), &mut rng).unwrap();
        query.db_height = 1;
        query.bits.truncate(1);
        assert!(db.private_encrypted_query(&query, 1).is_err());

        // out-of-range indices
        assert!(db.meta.new_encrypted_query(&pk, 1, Some(99), &mut rng).is_err());
        assert!(db
            .meta
            .new_doubly_encrypted_query(&pk, 1, Some(16), &mut rng)
            .is_err());
    }
}
