//! Two-level (nested) Paillier encryption.
//!
//! Level-one ciphertexts live in `Z*_{n²}` and encrypt values modulo `n`.
//! Level-two ciphertexts live in `Z*_{n³}` and encrypt values modulo `n²`,
//! which is wide enough to hold an entire level-one ciphertext. That is
//! the trick the recursive encrypted queries rely on: a homomorphic inner
//! product at level two selects one level-one ciphertext out of many
//! without the server seeing which.
//!
//! Both levels use the generator `1 + n`, so an encryption of `m` with
//! randomizer `r` is `(1 + n)^m · r^(n^s) mod n^(s+1)` with `s` the level.
//! Useful identities, used throughout:
//!
//! - multiplying ciphertexts adds plaintexts;
//! - exponentiating a ciphertext multiplies its plaintext by the exponent;
//! - `r^(n^s) mod n^(s+1)` depends only on `r mod n`, so randomizers can
//!   always be carried reduced modulo `n`.
//!
//! The secret key can also recover the randomizer of a ciphertext
//! ([`SecretKey::extract_randomness`]), which the authenticated protocol
//! uses to let a prover open a re-randomized ciphertext as a provable
//! encryption of zero.

pub mod ddleq;

use rand::{Rng, RngCore};
use rug::{integer::IsPrime, integer::Order, Integer};
use serde::{Deserialize, Serialize};

use crate::error::{PirError, Result};

/// Nesting depth of a ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncLevel {
    /// Plaintexts modulo `n`, ciphertexts modulo `n²`.
    One,
    /// Plaintexts modulo `n²`, ciphertexts modulo `n³`.
    Two,
}

/// A Paillier ciphertext tagged with its nesting level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub c: Integer,
    pub level: EncLevel,
}

/// Public encryption key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    n: Integer,
    n2: Integer,
    n3: Integer,
}

/// Secret decryption key, with the precomputed inverses both decryption
/// and randomness extraction need.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretKey {
    pk: PublicKey,
    lambda: Integer,
    /// `λ⁻¹ mod n`
    mu_n: Integer,
    /// `λ⁻¹ mod n²`
    mu_n2: Integer,
    /// `n⁻¹ mod λ`
    inv_n_mod_lambda: Integer,
    /// `(n²)⁻¹ mod λ`
    inv_n2_mod_lambda: Integer,
    /// `2⁻¹ mod n`
    inv_two: Integer,
}

/// Generate a keypair with an RSA modulus of `modulus_bits` bits.
pub fn key_gen(modulus_bits: u32, rng: &mut impl Rng) -> (SecretKey, PublicKey) {
    assert!(modulus_bits >= 32, "modulus too small to carry a payload");

    loop {
        let p = random_prime(modulus_bits / 2, rng);
        let q = random_prime(modulus_bits - modulus_bits / 2, rng);
        if p == q {
            continue;
        }

        let n = Integer::from(&p * &q);
        if n.significant_bits() != modulus_bits {
            continue;
        }
        let n2 = Integer::from(&n * &n);
        let n3 = Integer::from(&n2 * &n);

        let lambda = Integer::from(&p - 1).lcm(&Integer::from(&q - 1));

        // gcd(n, λ) must be 1 for every inverse below; retry on freak
        // prime pairs where it is not
        let Ok(mu_n) = lambda.clone().invert(&n) else {
            continue;
        };
        let Ok(mu_n2) = lambda.clone().invert(&n2) else {
            continue;
        };
        let Ok(inv_n_mod_lambda) = n.clone().invert(&lambda) else {
            continue;
        };
        let inv_n2_mod_lambda =
            Integer::from(&inv_n_mod_lambda * &inv_n_mod_lambda) % &lambda;
        let Ok(inv_two) = Integer::from(2).invert(&n) else {
            continue;
        };

        let pk = PublicKey { n, n2, n3 };
        let sk = SecretKey {
            pk: pk.clone(),
            lambda,
            mu_n,
            mu_n2,
            inv_n_mod_lambda,
            inv_n2_mod_lambda,
            inv_two,
        };
        return (sk, pk);
    }
}

impl PublicKey {
    /// The RSA modulus `n`.
    pub fn modulus(&self) -> &Integer {
        &self.n
    }

    /// How many payload bytes one ciphertext carries: the largest byte
    /// count guaranteed to encode a value below `n`.
    pub fn payload_bytes(&self) -> usize {
        (((self.n.significant_bits() - 1) / 8) as usize).max(1)
    }

    fn plaintext_modulus(&self, level: EncLevel) -> &Integer {
        match level {
            EncLevel::One => &self.n,
            EncLevel::Two => &self.n2,
        }
    }

    fn ciphertext_modulus(&self, level: EncLevel) -> &Integer {
        match level {
            EncLevel::One => &self.n2,
            EncLevel::Two => &self.n3,
        }
    }

    /// `n^s`: the exponent that turns a randomizer into its ciphertext
    /// contribution at the given level.
    fn randomizer_exponent(&self, level: EncLevel) -> &Integer {
        match level {
            EncLevel::One => &self.n,
            EncLevel::Two => &self.n2,
        }
    }

    /// Deterministic encryption with a caller-supplied randomizer.
    pub fn encrypt_with_r(&self, m: &Integer, r: &Integer, level: EncLevel) -> Ciphertext {
        let cmod = self.ciphertext_modulus(level);
        let m_red = Integer::from(m % self.plaintext_modulus(level));
        let gm = pow_mod(&Integer::from(&self.n + 1), &m_red, cmod);
        let rn = pow_mod(r, self.randomizer_exponent(level), cmod);
        Ciphertext {
            c: gm * rn % cmod,
            level,
        }
    }

    /// Encrypt `m` at the given level with fresh randomness.
    pub fn encrypt_at_level(&self, m: &Integer, level: EncLevel, rng: &mut impl Rng) -> Ciphertext {
        let r = random_unit(&self.n, rng);
        self.encrypt_with_r(m, &r, level)
    }

    /// Encrypt `m` at level one.
    pub fn encrypt(&self, m: &Integer, rng: &mut impl Rng) -> Ciphertext {
        self.encrypt_at_level(m, EncLevel::One, rng)
    }

    pub fn encrypt_zero(&self, level: EncLevel, rng: &mut impl Rng) -> Ciphertext {
        self.encrypt_at_level(&Integer::new(), level, rng)
    }

    pub fn encrypt_one(&self, level: EncLevel, rng: &mut impl Rng) -> Ciphertext {
        self.encrypt_at_level(&Integer::from(1), level, rng)
    }

    /// Multiplicative identity of the ciphertext group: an encryption of
    /// zero with unit randomness. Neutral element for [`PublicKey::add`].
    pub fn identity(&self, level: EncLevel) -> Ciphertext {
        Ciphertext {
            c: Integer::from(1),
            level,
        }
    }

    /// Homomorphic addition of plaintexts (ciphertext product).
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        assert_eq!(a.level, b.level, "cannot add ciphertexts across levels");
        let cmod = self.ciphertext_modulus(a.level);
        Ciphertext {
            c: Integer::from(&a.c * &b.c) % cmod,
            level: a.level,
        }
    }

    /// Homomorphic multiplication of the plaintext by a non-negative
    /// constant (ciphertext exponentiation).
    pub fn const_mul(&self, ct: &Ciphertext, k: &Integer) -> Ciphertext {
        assert!(*k >= 0, "constant multiplier must be non-negative");
        Ciphertext {
            c: pow_mod(&ct.c, k, self.ciphertext_modulus(ct.level)),
            level: ct.level,
        }
    }

    /// Homomorphic subtraction of a level-one ciphertext from the inner
    /// plaintext of a level-two ciphertext.
    ///
    /// The level-two operand encrypts a level-one ciphertext value `x`;
    /// the result encrypts `x · inner⁻¹ mod n²`, whose level-one plaintext
    /// is the difference of the two inner plaintexts. In particular the
    /// result nested-decrypts to zero exactly when both operands carry the
    /// same inner plaintext.
    pub fn nested_sub(&self, outer: &Ciphertext, inner: &Ciphertext) -> Result<Ciphertext> {
        if outer.level != EncLevel::Two || inner.level != EncLevel::One {
            return Err(PirError::Crypto(
                "nested subtraction needs a level-two and a level-one ciphertext".into(),
            ));
        }
        let inv = inner
            .c
            .clone()
            .invert(&self.n2)
            .map_err(|_| PirError::Crypto("inner ciphertext is not invertible".into()))?;
        Ok(Ciphertext {
            c: pow_mod(&outer.c, &inv, &self.n3),
            level: EncLevel::Two,
        })
    }

    /// Refresh both layers of a level-two ciphertext.
    ///
    /// Returns the re-randomized ciphertext together with the inner-layer
    /// scalar `a` and the outer-layer scalar `b` that witness it.
    pub fn nested_randomize(
        &self,
        ct: &Ciphertext,
        rng: &mut impl Rng,
    ) -> (Ciphertext, Integer, Integer) {
        assert_eq!(ct.level, EncLevel::Two, "can only nested-randomize level two");
        let a = random_unit(&self.n, rng);
        let b = random_unit(&self.n, rng);
        (self.rerandomize(ct, &a, &b), a, b)
    }

    /// Canonical re-randomization `ct^(a^n mod n²) · b^(n²) mod n³`.
    ///
    /// The first factor multiplies the inner level-one ciphertext by
    /// `a^n`, an encryption of zero, and the second refreshes the outer
    /// randomizer. Deterministic in `(ct, a, b)`, which the
    /// re-randomization proof depends on.
    pub(crate) fn rerandomize(&self, ct: &Ciphertext, a: &Integer, b: &Integer) -> Ciphertext {
        let e = pow_mod(a, &self.n, &self.n2);
        let c = pow_mod(&ct.c, &e, &self.n3) * pow_mod(b, &self.n2, &self.n3) % &self.n3;
        Ciphertext {
            c,
            level: EncLevel::Two,
        }
    }
}

impl SecretKey {
    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    /// Decrypt one layer, at whichever level the ciphertext carries.
    pub fn decrypt(&self, ct: &Ciphertext) -> Integer {
        match ct.level {
            EncLevel::One => self.decrypt_level_one(&ct.c),
            EncLevel::Two => self.decrypt_level_two(&ct.c),
        }
    }

    /// Strip the outer layer of a level-two ciphertext, returning the
    /// inner level-one ciphertext it encrypts.
    pub fn decrypt_nested_layer(&self, ct: &Ciphertext) -> Ciphertext {
        assert_eq!(ct.level, EncLevel::Two, "not a nested ciphertext");
        Ciphertext {
            c: self.decrypt_level_two(&ct.c),
            level: EncLevel::One,
        }
    }

    /// Decrypt both layers of a level-two ciphertext.
    pub fn nested_decrypt(&self, ct: &Ciphertext) -> Integer {
        let inner = self.decrypt_nested_layer(ct);
        self.decrypt_level_one(&inner.c)
    }

    fn decrypt_level_one(&self, c: &Integer) -> Integer {
        let pk = &self.pk;
        let a = pow_mod(c, &self.lambda, &pk.n2);
        // L(a) = (a - 1) / n; truncation maps the degenerate all-zero
        // ciphertext to plaintext zero as well
        let l = Integer::from(&a - 1) / &pk.n;
        l * &self.mu_n % &pk.n
    }

    /// Level-two decryption: recover `d = λ·m mod n²` from the binomial
    /// expansion `(1+n)^d = 1 + d·n + C(d,2)·n² mod n³`, then divide out
    /// `λ`.
    fn decrypt_level_two(&self, c: &Integer) -> Integer {
        let pk = &self.pk;
        let a = pow_mod(c, &self.lambda, &pk.n3);
        let l = Integer::from(&a - 1) / &pk.n % &pk.n2;

        // first digit of d base n
        let d1 = Integer::from(&l % &pk.n);
        // second digit, after removing the C(d,2) carry
        let t = Integer::from(&l - &d1) / &pk.n % &pk.n;
        let binom = (Integer::from(&d1 * &d1) - &d1) * &self.inv_two % &pk.n;
        let d2 = ((t - binom) % &pk.n + &pk.n) % &pk.n;

        let d = d1 + d2 * &pk.n;
        d * &self.mu_n2 % &pk.n2
    }

    /// Recover the randomizer of a ciphertext, reduced modulo `n`.
    ///
    /// At level `s` the ciphertext is congruent to `r^(n^s) mod n`, and
    /// `n^s` is invertible modulo `λ`, so `r` falls out of one modular
    /// exponentiation.
    pub fn extract_randomness(&self, ct: &Ciphertext) -> Integer {
        let pk = &self.pk;
        let base = Integer::from(&ct.c % &pk.n);
        let e = match ct.level {
            EncLevel::One => &self.inv_n_mod_lambda,
            EncLevel::Two => &self.inv_n2_mod_lambda,
        };
        pow_mod(&base, e, &pk.n)
    }
}

// ============================================================================
// Modular arithmetic helpers
// ============================================================================

/// `base^exp mod modulus` for exponents that cannot fail (non-negative,
/// or an invertible base).
pub(crate) fn pow_mod(base: &Integer, exp: &Integer, modulus: &Integer) -> Integer {
    Integer::from(
        base.pow_mod_ref(exp, modulus)
            .expect("base must be invertible for a negative exponent"),
    )
}

/// Fallible variant for negative exponents over possibly-degenerate bases.
pub(crate) fn pow_mod_checked(base: &Integer, exp: &Integer, modulus: &Integer) -> Result<Integer> {
    base.pow_mod_ref(exp, modulus)
        .map(Integer::from)
        .ok_or_else(|| PirError::Crypto("non-invertible base in modular exponentiation".into()))
}

/// Uniform integer in `[0, bound)`.
pub(crate) fn random_below(bound: &Integer, rng: &mut impl Rng) -> Integer {
    let num_bytes = (bound.significant_bits() as usize).div_ceil(8) + 8;
    let mut buf = vec![0u8; num_bytes];
    rng.fill_bytes(&mut buf);
    Integer::from_digits(&buf, Order::MsfBe) % bound
}

/// Uniform unit of `Z*_n`.
pub(crate) fn random_unit(n: &Integer, rng: &mut impl Rng) -> Integer {
    loop {
        let r = random_below(n, rng);
        if r != 0 && Integer::from(r.gcd_ref(n)) == 1 {
            return r;
        }
    }
}

fn random_prime(bits: u32, rng: &mut impl Rng) -> Integer {
    assert!(bits >= 16, "prime width too small");
    loop {
        let mut candidate = random_below(&(Integer::from(1) << bits), rng);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(bits - 2, true);
        candidate.set_bit(0, true);

        while candidate.significant_bits() == bits {
            if candidate.is_probably_prime(30) != IsPrime::No {
                return candidate;
            }
            candidate += 2;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
