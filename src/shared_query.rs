//! Secret-shared PIR over a DPF-expanded selection vector.
//!
//! The client splits the indicator of a row into DPF keys, one per
//! server. Each server expands its key into a boolean vector and XORs
//! together the `group_size` slots of every selected row; XORing the
//! servers' results recovers the queried group, while any proper subset
//! of them sees data indistinguishable from random.
//!
//! Queries address rows of a `⌈db_size / group_size⌉`-row view of the
//! database, so row `i` covers slots `[i·g, i·g + g)`. Index queries walk
//! that row domain; keyword queries evaluate the DPF over the 32-bit
//! keyword space at each slot's keyword.

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::{Database, DbMetadata};
use crate::dpf::{self, Dpf, Key2P, KeyMp, PrfKey};
use crate::error::{PirError, Result};
use crate::slot::Slot;

/// Width of the keyword domain in bits.
pub const KEYWORD_BITS: u32 = 32;

/// Largest row domain, in bits, an index scan will expand in full.
const MAX_INDEX_BITS: u32 = 24;

/// The DPF key variant carried by a query share.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DpfKey {
    TwoParty(Key2P),
    MultiParty(KeyMp),
}

/// One server's share of a secret-shared query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryShare {
    pub key: DpfKey,
    pub prf_keys: Vec<PrfKey>,
    pub share_number: usize,
    /// Number of adjacent slots returned together.
    pub group_size: usize,
    /// Whether the key ranges over the keyword space instead of rows.
    pub is_keyword: bool,
}

/// A server's answer: one XOR-share per slot of the queried group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretSharedQueryResult {
    pub shares: Vec<Slot>,
    pub slot_bytes: usize,
}

impl DbMetadata {
    /// Split an index query into `num_shares` DPF shares.
    pub fn new_index_query_shares(
        &self,
        index: usize,
        group_size: usize,
        num_shares: usize,
        rng: &mut impl Rng,
    ) -> Result<Vec<QueryShare>> {
        let height = self.query_height(group_size)?;
        if index >= height {
            return Err(PirError::Geometry(format!(
                "index {index} outside the {height}-row domain"
            )));
        }
        // one bit wider than strictly needed, to match the domain the
        // key expansion produces on the server side
        let num_bits = height.next_power_of_two().trailing_zeros() + 1;
        self.new_query_shares(index as u64, num_bits, group_size, num_shares, false, rng)
    }

    /// Split a keyword query into `num_shares` DPF shares over the 32-bit
    /// keyword space.
    pub fn new_keyword_query_shares(
        &self,
        keyword: u32,
        group_size: usize,
        num_shares: usize,
        rng: &mut impl Rng,
    ) -> Result<Vec<QueryShare>> {
        if group_size != 1 {
            return Err(PirError::Geometry(
                "keyword queries address single slots; group size must be 1".into(),
            ));
        }
        self.query_height(group_size)?;
        self.new_query_shares(keyword as u64, KEYWORD_BITS, group_size, num_shares, true, rng)
    }

    fn new_query_shares(
        &self,
        point: u64,
        num_bits: u32,
        group_size: usize,
        num_shares: usize,
        is_keyword: bool,
        rng: &mut impl Rng,
    ) -> Result<Vec<QueryShare>> {
        if num_shares < 2 {
            return Err(PirError::Geometry(
                "secret sharing needs at least two servers".into(),
            ));
        }

        let pf = Dpf::client_initialize(num_bits, rng);
        let keys: Vec<DpfKey> = if num_shares == 2 {
            pf.generate_two_server(point, rng)?
                .into_iter()
                .map(DpfKey::TwoParty)
                .collect()
        } else {
            pf.generate_multi_server(point, num_shares, rng)?
                .into_iter()
                .map(DpfKey::MultiParty)
                .collect()
        };

        Ok(keys
            .into_iter()
            .enumerate()
            .map(|(share_number, key)| QueryShare {
                key,
                prf_keys: pf.prf_keys.clone(),
                share_number,
                group_size,
                is_keyword,
            })
            .collect())
    }

    /// Height of the row domain for a given group size.
    pub(crate) fn query_height(&self, group_size: usize) -> Result<usize> {
        if group_size == 0 {
            return Err(PirError::Geometry("group size must be positive".into()));
        }
        let height = self.db_size.div_ceil(group_size);
        if height == 0 {
            return Err(PirError::Geometry("database height is zero".into()));
        }
        Ok(height)
    }
}

impl Database {
    /// Expand a share's DPF key into the per-row selection vector for
    /// this database.
    pub fn expand_shared_query(&self, share: &QueryShare) -> Result<Vec<bool>> {
        let height = self.meta.query_height(share.group_size)?;

        let bits = if share.is_keyword {
            if share.group_size != 1 {
                return Err(PirError::Geometry(
                    "keyword queries address single slots; group size must be 1".into(),
                ));
            }
            let keywords = self.keywords.as_ref().ok_or_else(|| {
                PirError::Geometry("database carries no keyword column".into())
            })?;
            let DpfKey::TwoParty(key) = &share.key else {
                return Err(PirError::Crypto(
                    "keyword queries require two-party keys".into(),
                ));
            };
            keywords
                .iter()
                .map(|&kw| dpf::eval_at_two_server(key, &share.prf_keys, kw as u64))
                .collect()
        } else {
            match &share.key {
                DpfKey::TwoParty(key) => {
                    if key.num_bits() > MAX_INDEX_BITS {
                        return Err(PirError::ShapeMismatch(format!(
                            "a {}-bit key cannot drive an index scan",
                            key.num_bits()
                        )));
                    }
                    dpf::eval_two_server(key, &share.prf_keys)
                }
                DpfKey::MultiParty(key) => dpf::eval_multi_server(key),
            }
        };

        if bits.len() < height {
            return Err(PirError::ShapeMismatch(format!(
                "key expands to {} rows but the database has {height}",
                bits.len()
            )));
        }
        Ok(bits)
    }

    /// Answer a secret-shared query: expand the key and scan.
    pub fn private_secret_shared_query(
        &self,
        share: &QueryShare,
        nprocs: usize,
    ) -> Result<SecretSharedQueryResult> {
        let bits = self.expand_shared_query(share)?;
        self.private_secret_shared_query_with_bits(share, &bits, nprocs)
    }

    /// Scan with a selection vector that was expanded elsewhere, so one
    /// DPF expansion can drive scans over several databases.
    pub fn private_secret_shared_query_with_bits(
        &self,
        share: &QueryShare,
        bits: &[bool],
        nprocs: usize,
    ) -> Result<SecretSharedQueryResult> {
        if nprocs == 0 {
            return Err(PirError::Geometry("need at least one worker".into()));
        }
        let group_size = share.group_size;
        let height = self.meta.query_height(group_size)?;
        if bits.len() < height {
            return Err(PirError::ShapeMismatch(format!(
                "selection vector covers {} of {height} rows",
                bits.len()
            )));
        }

        debug!(height, group_size, nprocs, "secret-shared scan");

        let slot_bytes = self.meta.slot_bytes;
        let rows_per_worker = height.div_ceil(nprocs);

        let partials: Vec<Vec<Slot>> = (0..nprocs)
            .into_par_iter()
            .map(|worker| {
                let start = worker * rows_per_worker;
                let end = usize::min(start + rows_per_worker, height);

                let mut acc = vec![Slot::empty(slot_bytes); group_size];
                for row in start..end {
                    if !bits[row] {
                        continue;
                    }
                    for (offset, dst) in acc.iter_mut().enumerate() {
                        let idx = row * group_size + offset;
                        if idx >= self.meta.db_size {
                            break; // implicit empty slots past the end
                        }
                        dst.xor_with(&self.slots[idx])
                            .expect("database slots share one width");
                    }
                }
                acc
            })
            .collect();

        // xor is commutative, so folding the per-worker accumulators in
        // worker order keeps the output independent of scheduling
        let mut shares = vec![Slot::empty(slot_bytes); group_size];
        for partial in partials {
            for (dst, src) in shares.iter_mut().zip(&partial) {
                dst.xor_with(src).expect("accumulators share one width");
            }
        }

        Ok(SecretSharedQueryResult { shares, slot_bytes })
    }
}

/// XOR the servers' result shares back into the queried group.
pub fn recover(results: &[SecretSharedQueryResult]) -> Result<Vec<Slot>> {
    let first = results
        .first()
        .ok_or_else(|| PirError::ShapeMismatch("no result shares to recover from".into()))?;

    let mut slots = vec![Slot::empty(first.slot_bytes); first.shares.len()];
    for result in results {
        if result.shares.len() != slots.len() || result.slot_bytes != first.slot_bytes {
            return Err(PirError::ShapeMismatch(
                "result shares disagree on geometry".into(),
            ));
        }
        for (dst, src) in slots.iter_mut().zip(&result.shares) {
            dst.xor_with(src)?;
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_query(db: &Database, shares: &[QueryShare], nprocs: usize) -> Vec<Slot> {
        let results: Vec<SecretSharedQueryResult> = shares
            .iter()
            .map(|s| db.private_secret_shared_query(s, nprocs).unwrap())
            .collect();
        recover(&results).unwrap()
    }

    fn expected_group(db: &Database, index: usize, group_size: usize) -> Vec<Slot> {
        (0..group_size)
            .map(|j| {
                let idx = index * group_size + j;
                if idx < db.meta.db_size {
                    db.slots[idx].clone()
                } else {
                    Slot::empty(db.meta.slot_bytes)
                }
            })
            .collect()
    }

    #[test]
    fn test_two_server_query_all_group_sizes() {
        let mut rng = rand::rng();
        let db = Database::random(50, 8, &mut rng);

        for group_size in 1..5 {
            let height = db.meta.db_size.div_ceil(group_size);
            for _ in 0..3 {
                let index = rng.random_range(0..height);
                let shares = db
                    .meta
                    .new_index_query_shares(index, group_size, 2, &mut rng)
                    .unwrap();
                let recovered = run_query(&db, &shares, 4);
                assert_eq!(
                    recovered,
                    expected_group(&db, index, group_size),
                    "wrong group for index {index}, group size {group_size}"
                );
            }
        }
    }

    #[test]
    fn test_multi_server_query() {
        let mut rng = rand::rng();
        let db = Database::random(33, 16, &mut rng);

        for num_shares in [3, 4] {
            let index = rng.random_range(0..33);
            let shares = db
                .meta
                .new_index_query_shares(index, 1, num_shares, &mut rng)
                .unwrap();
            let recovered = run_query(&db, &shares, 2);
            assert_eq!(recovered, vec![db.slots[index].clone()]);
        }
    }

    #[test]
    fn test_single_share_reveals_nothing_definite() {
        // not a privacy proof, just a sanity check that one share alone
        // does not already equal the record
        let mut rng = rand::rng();
        let db = Database::random(16, 32, &mut rng);
        let shares = db.meta.new_index_query_shares(3, 1, 2, &mut rng).unwrap();
        let res = db.private_secret_shared_query(&shares[0], 1).unwrap();
        assert_ne!(res.shares[0], db.slots[3]);
    }

    #[test]
    fn test_parallel_scan_is_deterministic() {
        let mut rng = rand::rng();
        let db = Database::random(64, 8, &mut rng);
        let shares = db.meta.new_index_query_shares(17, 2, 2, &mut rng).unwrap();

        let single = db.private_secret_shared_query(&shares[0], 1).unwrap();
        for nprocs in [2, 3, 8, 64] {
            let multi = db.private_secret_shared_query(&shares[0], nprocs).unwrap();
            assert_eq!(single.shares, multi.shares, "nondeterministic at {nprocs} workers");
        }
    }

    #[test]
    fn test_keyword_query() {
        let mut rng = rand::rng();
        let keywords: Vec<u32> = (0..20).map(|i| 1000 + 37 * i).collect();
        let db = Database::random(20, 8, &mut rng)
            .with_keywords(keywords.clone())
            .unwrap();

        let target = 13;
        let shares = db
            .meta
            .new_keyword_query_shares(keywords[target], 1, 2, &mut rng)
            .unwrap();
        let recovered = run_query(&db, &shares, 2);
        assert_eq!(recovered, vec![db.slots[target].clone()]);
    }

    #[test]
    fn test_out_of_domain_index_rejected() {
        let mut rng = rand::rng();
        let db = Database::random(10, 4, &mut rng);
        assert!(db.meta.new_index_query_shares(10, 1, 2, &mut rng).is_err());
        assert!(db.meta.new_index_query_shares(4, 2, 2, &mut rng).is_ok());
        assert!(db.meta.new_index_query_shares(5, 2, 2, &mut rng).is_err());
        assert!(db.meta.new_index_query_shares(0, 0, 2, &mut rng).is_err());
    }

    #[test]
    fn test_recover_rejects_mismatched_shapes() {
        let a = SecretSharedQueryResult {
            shares: vec![Slot::empty(4)],
            slot_bytes: 4,
        };
        let b = SecretSharedQueryResult {
            shares: vec![Slot::empty(4), Slot::empty(4)],
            slot_bytes: 4,
        };
        assert!(recover(&[a, b]).is_err());
        assert!(recover(&[]).is_err());
    }
}
