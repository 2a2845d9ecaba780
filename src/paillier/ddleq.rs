//! Non-interactive proofs that one nested ciphertext re-randomizes
//! another.
//!
//! The relation: `c2 = c1^(a^n mod n²) · b^(n²) mod n³` for some units
//! `a, b` of `Z*_n`. When it holds, `c1` and `c2` carry the same nested
//! plaintext; the inner factor `a^n` is an encryption of zero and the
//! outer factor only refreshes the randomizer.
//!
//! The proof is a cut-and-choose sigma protocol. Each round the prover
//! publishes a fresh re-randomization `d` of `c2`; the Fiat-Shamir
//! challenge bit then asks it to open `d` either as a re-randomization of
//! `c2` (the scalars it just sampled) or as a re-randomization of `c1`
//! (those scalars composed with the witness). If `c1` and `c2` disagreed
//! on their nested plaintext, no `d` could open both ways, so each round
//! halves a cheater's chances and `secparam` rounds leave soundness error
//! `2^-secparam`.
//!
//! Composition of two canonical re-randomizations is again canonical up to
//! an outer factor the prover can compute in public: with `E(x) = x^n mod
//! n²`, `E(a)·E(a_i) ≡ E(a·a_i) (mod n²)` and the excess
//! `c1^(E(a)·E(a_i) − E(a·a_i))` is a perfect `n²`-th power absorbed into
//! the outer scalar. Neither proving nor verifying needs the secret key.

use rand::Rng;
use rug::Integer;
use serde::{Deserialize, Serialize};
use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake256,
};

use crate::error::{PirError, Result};

use super::{pow_mod, pow_mod_checked, random_unit, Ciphertext, EncLevel, PublicKey};

/// A `secparam`-round re-randomization proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DdleqProof {
    /// One fresh re-randomization of `c2` per round.
    commitments: Vec<Integer>,
    /// Per-round opening scalars; which statement they open is fixed by
    /// the recomputed challenge bit.
    responses: Vec<(Integer, Integer)>,
}

/// Prove that `c2` is the canonical re-randomization of `c1` under the
/// witness scalars `(a, b)`.
pub fn prove_ddleq(
    pk: &PublicKey,
    secparam: u32,
    c1: &Ciphertext,
    c2: &Ciphertext,
    a: &Integer,
    b: &Integer,
    rng: &mut impl Rng,
) -> Result<DdleqProof> {
    if c1.level != EncLevel::Two || c2.level != EncLevel::Two {
        return Err(PirError::Crypto(
            "re-randomization proofs cover level-two ciphertexts".into(),
        ));
    }

    let n = &pk.n;
    let n2 = &pk.n2;

    let mut round_scalars = Vec::with_capacity(secparam as usize);
    let mut commitments = Vec::with_capacity(secparam as usize);
    for _ in 0..secparam {
        let a_i = random_unit(n, rng);
        let b_i = random_unit(n, rng);
        commitments.push(pk.rerandomize(c2, &a_i, &b_i).c);
        round_scalars.push((a_i, b_i));
    }

    let bits = challenge_bits(pk, &c1.c, &c2.c, &commitments, secparam);

    let mut responses = Vec::with_capacity(secparam as usize);
    for (bit, (a_i, b_i)) in bits.iter().zip(round_scalars) {
        if !bit {
            responses.push((a_i, b_i));
            continue;
        }

        // open against c1: compose the round scalars with the witness
        let a_comp = Integer::from(a * &a_i) % n;
        let e_a = pow_mod(a, n, n2);
        let e_ai = pow_mod(&a_i, n, n2);
        let e_comp = pow_mod(&a_comp, n, n2);

        // the exponent excess is a multiple of n²; it folds into the
        // outer scalar as c1^k
        let k = (Integer::from(&e_a * &e_ai) - &e_comp) / n2;
        let carry = pow_mod_checked(&c1.c, &k, n)?;

        let b_scaled = pow_mod(b, &e_ai, n);
        let b_comp = carry * b_scaled % n * &b_i % n;
        responses.push((a_comp, b_comp));
    }

    Ok(DdleqProof {
        commitments,
        responses,
    })
}

/// Verify a re-randomization proof at the given round count. Rejects
/// quietly on any malformed input.
pub fn verify_ddleq(
    pk: &PublicKey,
    c1: &Ciphertext,
    c2: &Ciphertext,
    proof: &DdleqProof,
    secparam: u32,
) -> bool {
    if c1.level != EncLevel::Two || c2.level != EncLevel::Two {
        return false;
    }
    if proof.commitments.len() != secparam as usize || proof.responses.len() != secparam as usize {
        return false;
    }

    let n = &pk.n;
    let bits = challenge_bits(pk, &c1.c, &c2.c, &proof.commitments, secparam);

    for ((bit, d), (x, y)) in bits.iter().zip(&proof.commitments).zip(&proof.responses) {
        // opening scalars must be units, otherwise the inner factor is
        // not an encryption of zero
        if *x <= 0 || *x >= *n || *y <= 0 || *y >= *n {
            return false;
        }
        if Integer::from(x.gcd_ref(n)) != 1 || Integer::from(y.gcd_ref(n)) != 1 {
            return false;
        }

        let base = if *bit { c1 } else { c2 };
        if pk.rerandomize(base, x, y).c != *d {
            return false;
        }
    }

    true
}

fn challenge_bits(
    pk: &PublicKey,
    c1: &Integer,
    c2: &Integer,
    commitments: &[Integer],
    secparam: u32,
) -> Vec<bool> {
    let mut hasher = Shake256::default();
    hasher.update(b"aspir-rerandomization-proof-v1");
    absorb(&mut hasher, &pk.n);
    absorb(&mut hasher, c1);
    absorb(&mut hasher, c2);
    for d in commitments {
        absorb(&mut hasher, d);
    }

    let mut reader = hasher.finalize_xof();
    let mut buf = vec![0u8; (secparam as usize).div_ceil(8)];
    reader.read(&mut buf);

    (0..secparam as usize)
        .map(|i| buf[i / 8] >> (i % 8) & 1 == 1)
        .collect()
}

fn absorb(hasher: &mut Shake256, value: &Integer) {
    let bytes = value.to_digits::<u8>(rug::integer::Order::MsfBe);
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paillier::key_gen;

    const SECPARAM: u32 = 40;

    #[test]
    fn test_honest_proof_verifies() {
        let mut rng = rand::rng();
        let (_sk, pk) = key_gen(128, &mut rng);

        let inner = pk.encrypt_zero(EncLevel::One, &mut rng);
        let c1 = pk.encrypt_at_level(&inner.c, EncLevel::Two, &mut rng);
        let (c2, a, b) = pk.nested_randomize(&c1, &mut rng);

        let proof = prove_ddleq(&pk, SECPARAM, &c1, &c2, &a, &b, &mut rng).unwrap();
        assert!(verify_ddleq(&pk, &c1, &c2, &proof, SECPARAM));
    }

    #[test]
    fn test_proof_binds_the_pair() {
        let mut rng = rand::rng();
        let (_sk, pk) = key_gen(128, &mut rng);

        let inner = pk.encrypt_zero(EncLevel::One, &mut rng);
        let c1 = pk.encrypt_at_level(&inner.c, EncLevel::Two, &mut rng);
        let (c2, a, b) = pk.nested_randomize(&c1, &mut rng);
        let proof = prove_ddleq(&pk, SECPARAM, &c1, &c2, &a, &b, &mut rng).unwrap();

        // an unrelated ciphertext must not verify against the same proof
        let other = pk.encrypt_at_level(&Integer::from(5), EncLevel::Two, &mut rng);
        assert!(!verify_ddleq(&pk, &other, &c2, &proof, SECPARAM));
        assert!(!verify_ddleq(&pk, &c1, &other, &proof, SECPARAM));
    }

    #[test]
    fn test_tampered_proof_rejected() {
        let mut rng = rand::rng();
        let (_sk, pk) = key_gen(128, &mut rng);

        let inner = pk.encrypt_zero(EncLevel::One, &mut rng);
        let c1 = pk.encrypt_at_level(&inner.c, EncLevel::Two, &mut rng);
        let (c2, a, b) = pk.nested_randomize(&c1, &mut rng);

        let mut proof = prove_ddleq(&pk, SECPARAM, &c1, &c2, &a, &b, &mut rng).unwrap();
        proof.responses[0].0 += 1;
        assert!(!verify_ddleq(&pk, &c1, &c2, &proof, SECPARAM));
    }

    #[test]
    fn test_round_count_is_enforced() {
        let mut rng = rand::rng();
        let (_sk, pk) = key_gen(128, &mut rng);

        let inner = pk.encrypt_zero(EncLevel::One, &mut rng);
        let c1 = pk.encrypt_at_level(&inner.c, EncLevel::Two, &mut rng);
        let (c2, a, b) = pk.nested_randomize(&c1, &mut rng);

        let proof = prove_ddleq(&pk, 8, &c1, &c2, &a, &b, &mut rng).unwrap();
        assert!(verify_ddleq(&pk, &c1, &c2, &proof, 8));
        // a short proof must not satisfy a taller soundness requirement
        assert!(!verify_ddleq(&pk, &c1, &c2, &proof, SECPARAM));
    }
}
