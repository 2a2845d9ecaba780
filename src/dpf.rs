//! Distributed point functions over boolean outputs.
//!
//! A DPF splits the indicator vector of a single index `alpha` into keys,
//! one per server, such that no key reveals `alpha` but the servers'
//! full-domain evaluations XOR to the unit vector `e_alpha`.
//!
//! Two constructions live here:
//!
//! - **Two-party tree DPF.** A GGM-style binary tree of 128-bit seeds with
//!   one correction word per level. On the path to `alpha` the parties'
//!   seeds diverge and their control bits differ; everywhere else both
//!   parties hold identical state, so the leaf control bits XOR to the
//!   indicator. Key size is `O(log domain)`, which also makes single-point
//!   evaluation over the 32-bit keyword space practical.
//! - **Multi-server seed-expanded keys.** Servers `1..k` each hold a
//!   32-byte seed whose ChaCha expansion is their share; server `0` holds
//!   the explicit correction vector that makes the XOR come out to
//!   `e_alpha`. Key `0` is linear in the domain, so generation refuses
//!   domains too large to materialize.
//!
//! The PRF keys produced by [`Dpf::client_initialize`] parameterize the
//! tree expansion and are shipped to every server alongside its key.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::{ChaCha20Rng, ChaCha8Rng};
use serde::{Deserialize, Serialize};

use crate::error::{PirError, Result};

/// Seed width of a tree node.
pub const SEED_BYTES: usize = 16;

/// Number of PRF keys a client hands to each server.
pub const NUM_PRF_KEYS: usize = 2;

/// Largest domain, in bits, that full-domain evaluation will materialize.
const MAX_EXPAND_BITS: u32 = 26;

/// A PRF key parameterizing the tree expansion. The same keys must be
/// used at generation and evaluation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrfKey(pub [u8; SEED_BYTES]);

/// Per-level correction word of a two-party key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionWord {
    seed: [u8; SEED_BYTES],
    t_left: bool,
    t_right: bool,
}

/// One party's key for the two-party tree DPF.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Key2P {
    party: u8,
    num_bits: u32,
    seed: [u8; SEED_BYTES],
    correction_words: Vec<CorrectionWord>,
}

impl Key2P {
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Domain size `2^num_bits`.
    pub fn domain_size(&self) -> usize {
        1usize << self.num_bits
    }
}

/// One server's key for the seed-expanded multi-server scheme.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyMp {
    share_number: usize,
    num_bits: u32,
    material: MpMaterial,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum MpMaterial {
    /// ChaCha seed; the share is its expansion over the domain.
    Seed([u8; 32]),
    /// Packed correction bits held by share 0.
    Explicit(Vec<u8>),
}

impl KeyMp {
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn domain_size(&self) -> usize {
        1usize << self.num_bits
    }

    pub fn share_number(&self) -> usize {
        self.share_number
    }
}

/// Client-side DPF context: the domain size and the PRF keys shared with
/// every server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dpf {
    num_bits: u32,
    pub prf_keys: Vec<PrfKey>,
}

impl Dpf {
    /// Set up a DPF over the domain `{0, ..., 2^num_bits - 1}`.
    pub fn client_initialize(num_bits: u32, rng: &mut impl Rng) -> Self {
        assert!(num_bits >= 1 && num_bits <= 32, "domain must span 1..=32 bits");
        let prf_keys = (0..NUM_PRF_KEYS)
            .map(|_| {
                let mut k = [0u8; SEED_BYTES];
                rng.fill_bytes(&mut k);
                PrfKey(k)
            })
            .collect();
        Self { num_bits, prf_keys }
    }

    /// Generate the two keys of the tree DPF for the point `alpha`.
    pub fn generate_two_server(&self, alpha: u64, rng: &mut impl Rng) -> Result<[Key2P; 2]> {
        if alpha >= (1u64 << self.num_bits) {
            return Err(PirError::Geometry(format!(
                "point {alpha} outside a {}-bit domain",
                self.num_bits
            )));
        }

        let mut s0 = random_seed(rng);
        let mut s1 = random_seed(rng);
        let mut t0 = false;
        let mut t1 = true;
        let initial = (s0, s1);

        let mut correction_words = Vec::with_capacity(self.num_bits as usize);
        for level in 0..self.num_bits {
            let bit = (alpha >> (self.num_bits - 1 - level)) & 1 == 1;

            let (s0l, t0l, s0r, t0r) = expand(&s0, &self.prf_keys);
            let (s1l, t1l, s1r, t1r) = expand(&s1, &self.prf_keys);

            let (s0_keep, t0_keep, s0_lose) = if bit { (s0r, t0r, s0l) } else { (s0l, t0l, s0r) };
            let (s1_keep, t1_keep, s1_lose) = if bit { (s1r, t1r, s1l) } else { (s1l, t1l, s1r) };

            // the lose-side correction collapses the off-path subtrees
            // into identical state for both parties
            let cw = CorrectionWord {
                seed: xor_seeds(&s0_lose, &s1_lose),
                t_left: t0l ^ t1l ^ bit ^ true,
                t_right: t0r ^ t1r ^ bit,
            };
            let t_cw_keep = if bit { cw.t_right } else { cw.t_left };

            s0 = if t0 { xor_seeds(&s0_keep, &cw.seed) } else { s0_keep };
            s1 = if t1 { xor_seeds(&s1_keep, &cw.seed) } else { s1_keep };
            t0 = t0_keep ^ (t0 && t_cw_keep);
            t1 = t1_keep ^ (t1 && t_cw_keep);

            correction_words.push(cw);
        }

        Ok([
            Key2P {
                party: 0,
                num_bits: self.num_bits,
                seed: initial.0,
                correction_words: correction_words.clone(),
            },
            Key2P {
                party: 1,
                num_bits: self.num_bits,
                seed: initial.1,
                correction_words,
            },
        ])
    }

    /// Generate `num_shares` seed-expanded keys whose full-domain
    /// evaluations XOR to `e_alpha`.
    pub fn generate_multi_server(
        &self,
        alpha: u64,
        num_shares: usize,
        rng: &mut impl Rng,
    ) -> Result<Vec<KeyMp>> {
        if num_shares < 2 {
            return Err(PirError::Geometry(
                "multi-server keys need at least two shares".into(),
            ));
        }
        if alpha >= (1u64 << self.num_bits) {
            return Err(PirError::Geometry(format!(
                "point {alpha} outside a {}-bit domain",
                self.num_bits
            )));
        }
        if self.num_bits > MAX_EXPAND_BITS {
            return Err(PirError::Crypto(format!(
                "seed-expanded keys cannot materialize a {}-bit domain",
                self.num_bits
            )));
        }

        let domain = 1usize << self.num_bits;
        let packed_len = domain.div_ceil(8);

        // start from e_alpha and fold every seed expansion into share 0
        let mut correction = vec![0u8; packed_len];
        correction[(alpha as usize) / 8] ^= 1 << (alpha % 8);

        let mut keys = Vec::with_capacity(num_shares);
        keys.push(KeyMp {
            share_number: 0,
            num_bits: self.num_bits,
            material: MpMaterial::Explicit(Vec::new()),
        });
        for share_number in 1..num_shares {
            let mut seed = [0u8; 32];
            rng.fill_bytes(&mut seed);
            for (dst, src) in correction.iter_mut().zip(expand_packed(&seed, packed_len)) {
                *dst ^= src;
            }
            keys.push(KeyMp {
                share_number,
                num_bits: self.num_bits,
                material: MpMaterial::Seed(seed),
            });
        }
        keys[0].material = MpMaterial::Explicit(correction);

        Ok(keys)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate a two-party key over its whole domain.
///
/// The result has `2^num_bits` entries; the two parties' vectors XOR to
/// the unit vector of the shared point.
pub fn eval_two_server(key: &Key2P, prf_keys: &[PrfKey]) -> Vec<bool> {
    assert!(
        key.num_bits <= MAX_EXPAND_BITS,
        "refusing to materialize a {}-bit domain",
        key.num_bits
    );
    assert_eq!(prf_keys.len(), NUM_PRF_KEYS, "wrong number of PRF keys");

    let mut nodes: Vec<([u8; SEED_BYTES], bool)> = vec![(key.seed, key.party == 1)];
    for cw in &key.correction_words {
        let mut next = Vec::with_capacity(nodes.len() * 2);
        for (seed, t) in &nodes {
            let (sl, tl, sr, tr) = expand(seed, prf_keys);
            if *t {
                next.push((xor_seeds(&sl, &cw.seed), tl ^ cw.t_left));
                next.push((xor_seeds(&sr, &cw.seed), tr ^ cw.t_right));
            } else {
                next.push((sl, tl));
                next.push((sr, tr));
            }
        }
        nodes = next;
    }

    nodes.into_iter().map(|(_, t)| t).collect()
}

/// Evaluate a two-party key at a single point. Cheap even over the 32-bit
/// keyword domain, where full expansion is out of the question.
pub fn eval_at_two_server(key: &Key2P, prf_keys: &[PrfKey], index: u64) -> bool {
    assert_eq!(prf_keys.len(), NUM_PRF_KEYS, "wrong number of PRF keys");
    assert!(index < (1u64 << key.num_bits), "point outside the key domain");

    let mut seed = key.seed;
    let mut t = key.party == 1;
    for (level, cw) in key.correction_words.iter().enumerate() {
        let bit = (index >> (key.num_bits as usize - 1 - level)) & 1 == 1;
        let (sl, tl, sr, tr) = expand(&seed, prf_keys);
        let (s_child, t_child) = if bit { (sr, tr) } else { (sl, tl) };
        if t {
            seed = xor_seeds(&s_child, &cw.seed);
            t = t_child ^ if bit { cw.t_right } else { cw.t_left };
        } else {
            seed = s_child;
            t = t_child;
        }
    }
    t
}

/// Evaluate a multi-server key over its whole domain.
pub fn eval_multi_server(key: &KeyMp) -> Vec<bool> {
    let domain = key.domain_size();
    let packed = match &key.material {
        MpMaterial::Explicit(bits) => bits.clone(),
        MpMaterial::Seed(seed) => expand_packed(seed, domain.div_ceil(8)),
    };
    (0..domain).map(|i| packed[i / 8] >> (i % 8) & 1 == 1).collect()
}

// ============================================================================
// PRG plumbing
// ============================================================================

fn random_seed(rng: &mut impl Rng) -> [u8; SEED_BYTES] {
    let mut s = [0u8; SEED_BYTES];
    rng.fill_bytes(&mut s);
    s
}

fn xor_seeds(a: &[u8; SEED_BYTES], b: &[u8; SEED_BYTES]) -> [u8; SEED_BYTES] {
    let mut out = [0u8; SEED_BYTES];
    for i in 0..SEED_BYTES {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Derive one child (seed, control bit) by running ChaCha keyed with the
/// parent seed and the direction's PRF key.
fn expand_child(seed: &[u8; SEED_BYTES], prf_key: &PrfKey) -> ([u8; SEED_BYTES], bool) {
    let mut material = [0u8; 32];
    material[..SEED_BYTES].copy_from_slice(seed);
    material[SEED_BYTES..].copy_from_slice(&prf_key.0);

    let mut prg = ChaCha8Rng::from_seed(material);
    let mut out = [0u8; SEED_BYTES + 1];
    prg.fill_bytes(&mut out);

    let mut child = [0u8; SEED_BYTES];
    child.copy_from_slice(&out[..SEED_BYTES]);
    (child, out[SEED_BYTES] & 1 == 1)
}

fn expand(
    seed: &[u8; SEED_BYTES],
    prf_keys: &[PrfKey],
) -> ([u8; SEED_BYTES], bool, [u8; SEED_BYTES], bool) {
    let (sl, tl) = expand_child(seed, &prf_keys[0]);
    let (sr, tr) = expand_child(seed, &prf_keys[1]);
    (sl, tl, sr, tr)
}

fn expand_packed(seed: &[u8; 32], packed_len: usize) -> Vec<u8> {
    let mut prg = ChaCha20Rng::from_seed(*seed);
    let mut out = vec![0u8; packed_len];
    prg.fill_bytes(&mut out);
    out
}

// ============================================================================
// Tests
// ============================================================================
