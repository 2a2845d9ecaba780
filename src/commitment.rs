//! Salted random-oracle commitments to big integers.
//!
//! The committer publishes `(salt, SHA3-256(salt ‖ value))`. Anyone who
//! later learns the value can check the opening; hiding rests on the
//! committed value's entropy (here always a ciphertext) and binding on
//! collision resistance.

use rand::{Rng, RngCore};
use rug::{integer::Order, Integer};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A commitment together with its public salt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoCommitment {
    salt: [u8; 32],
    digest: [u8; 32],
}

impl RoCommitment {
    /// Commit to a value under a fresh salt.
    pub fn commit(value: &Integer, rng: &mut impl Rng) -> Self {
        let mut salt = [0u8; 32];
        rng.fill_bytes(&mut salt);
        let digest = hash(&salt, value);
        Self { salt, digest }
    }

    /// True iff this commitment was produced from `value`.
    pub fn check_open(&self, value: &Integer) -> bool {
        hash(&self.salt, value) == self.digest
    }
}

fn hash(salt: &[u8; 32], value: &Integer) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(salt);
    hasher.update(value.to_digits::<u8>(Order::MsfBe));
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_open() {
        let mut rng = rand::rng();
        let value = Integer::from(0xdead_beefu64);
        let comm = RoCommitment::commit(&value, &mut rng);
        assert!(comm.check_open(&value));
    }

    #[test]
    fn test_wrong_value_rejected() {
        let mut rng = rand::rng();
        let comm = RoCommitment::commit(&Integer::from(42), &mut rng);
        assert!(!comm.check_open(&Integer::from(43)));
    }

    #[test]
    fn test_salts_differ_across_commitments() {
        let mut rng = rand::rng();
        let value = Integer::from(7);
        let a = RoCommitment::commit(&value, &mut rng);
        let b = RoCommitment::commit(&value, &mut rng);
        assert_ne!(a, b);
    }
}
