//! Authenticated PIR: queries that prove possession of a per-record
//! capability key.
//!
//! Alongside the main database the server keeps a capability-key
//! database with one key per record group. A client must show that it
//! knows the key of the group it is fetching, without the server learning
//! which group that is.
//!
//! ## Single-server variant
//!
//! The client sends two recursive queries, one real and one null, in an
//! order fixed by a secret coin, together with commitments to level-one
//! encryptions of the capability key (real branch) and of zero (null
//! branch). The server runs both branches against the key database and
//! returns the two doubly-encrypted results as a challenge. The client
//! subtracts its token from each challenge token; on an honest run the
//! real branch cancels to an encryption of zero, which the client
//! re-randomizes and opens with a re-randomization proof plus the layer
//! randomizers. The null branch means the server cannot plant a tagged
//! key database and watch which branch trips: both branches look
//! identical until the proof lands, and the proof only reveals the branch
//! it opens.
//!
//! If the server corrupted exactly one branch of the challenge, the
//! client proves whichever branch still cancels. That branch choice leaks
//! the coin, but the server already learned it by cheating; refusing to
//! answer would only turn a detectable deviation into a denial of
//! service. If both branches are corrupt the client aborts.
//!
//! ## Two-server variant
//!
//! With secret-shared queries the servers audit each other instead: the
//! client XOR-shares the capability key across servers, each server runs
//! its DPF share over the key database and XORs its key-slot share into
//! the token share, and the audit accepts iff all contributions cancel to
//! zero. A query aimed at a group whose key the client does not know
//! leaves a nonzero residue except with probability `2^-8B` for `B`-byte
//! keys.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::commitment::RoCommitment;
use crate::database::{Database, DbMetadata};
use crate::encrypted_query::{DoublyEncryptedQuery, EncryptedQuery};
use crate::error::{PirError, Result};
use crate::paillier::ddleq::{prove_ddleq, verify_ddleq, DdleqProof};
use crate::paillier::{Ciphertext, EncLevel, PublicKey, SecretKey};
use crate::shared_query::QueryShare;
use crate::slot::Slot;
use rug::Integer;

/// Which of the two transmitted branches a value belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch {
    Zero,
    One,
}

impl Branch {
    pub fn index(self) -> usize {
        match self {
            Branch::Zero => 0,
            Branch::One => 1,
        }
    }

    pub fn other(self) -> Branch {
        match self {
            Branch::Zero => Branch::One,
            Branch::One => Branch::Zero,
        }
    }

    fn random(rng: &mut impl Rng) -> Branch {
        if rng.random::<bool>() {
            Branch::One
        } else {
            Branch::Zero
        }
    }
}

// ============================================================================
// Single-server (AHE) variant
// ============================================================================

/// A dual-branch recursive query with commitments to its capability
/// tokens. One branch is real, the other null; their order is uniformly
/// random and nothing in the structure tells them apart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticatedEncryptedQuery {
    pub query0: DoublyEncryptedQuery,
    pub query1: DoublyEncryptedQuery,
    pub auth_token_comm0: RoCommitment,
    pub auth_token_comm1: RoCommitment,
}

impl AuthenticatedEncryptedQuery {
    pub fn query(&self, branch: Branch) -> &DoublyEncryptedQuery {
        match branch {
            Branch::Zero => &self.query0,
            Branch::One => &self.query1,
        }
    }

    pub fn commitment(&self, branch: Branch) -> &RoCommitment {
        match branch {
            Branch::Zero => &self.auth_token_comm0,
            Branch::One => &self.auth_token_comm1,
        }
    }
}

/// Client-side secret state of one authenticated round.
#[derive(Clone, Debug)]
pub struct AuthQueryPrivateState {
    pub sk: SecretKey,
    /// Which branch carries the real query.
    pub bit: Branch,
    pub auth_token0: Ciphertext,
    pub auth_token1: Ciphertext,
}

impl AuthQueryPrivateState {
    fn auth_token(&self, branch: Branch) -> &Ciphertext {
        match branch {
            Branch::Zero => &self.auth_token0,
            Branch::One => &self.auth_token1,
        }
    }
}

/// The server's challenge: both branches of the query executed against
/// the capability-key database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChalToken {
    pub token0: Ciphertext,
    pub token1: Ciphertext,
    pub secparam: u32,
}

impl ChalToken {
    pub fn token(&self, branch: Branch) -> &Ciphertext {
        match branch {
            Branch::Zero => &self.token0,
            Branch::One => &self.token1,
        }
    }
}

/// The client's response to a challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofToken {
    /// The surrendered level-one capability token of the opened branch.
    pub auth_token: Ciphertext,
    /// Re-randomization of the subtracted challenge token.
    pub t: Ciphertext,
    /// Proof that `t` re-randomizes the subtracted challenge token.
    pub p: DdleqProof,
    /// Which branch the proof opens.
    pub qbit: Branch,
    /// Inner-layer randomizer of `t`.
    pub r: Integer,
    /// Outer-layer randomizer of `t`.
    pub s: Integer,
}

impl DbMetadata {
    /// Build an authenticated query for the group containing slot
    /// `index`, whose capability key is `auth_key`.
    pub fn new_authenticated_query(
        &self,
        sk: &SecretKey,
        group_size: usize,
        index: usize,
        auth_key: &Slot,
        rng: &mut impl Rng,
    ) -> Result<(AuthenticatedEncryptedQuery, AuthQueryPrivateState)> {
        let pk = sk.public_key();
        if auth_key.len() > pk.payload_bytes() {
            return Err(PirError::ShapeMismatch(format!(
                "a {}-byte capability key does not fit one ciphertext",
                auth_key.len()
            )));
        }

        let query_real = self.new_doubly_encrypted_query(pk, group_size, Some(index), rng)?;
        let query_fake = self.new_doubly_encrypted_null_query(pk, group_size, rng)?;

        // the key must be encoded exactly as the key database encodes its
        // slots, or the challenge subtraction will not cancel
        let real_token = pk.encrypt(&auth_key.as_integer(), rng);
        let fake_token = pk.encrypt(&Integer::new(), rng);

        let bit = Branch::random(rng);
        let (query0, token0, query1, token1) = match bit {
            Branch::Zero => (query_real, real_token, query_fake, fake_token),
            Branch::One => (query_fake, fake_token, query_real, real_token),
        };

        let auth_token_comm0 = RoCommitment::commit(&token0.c, rng);
        let auth_token_comm1 = RoCommitment::commit(&token1.c, rng);

        Ok((
            AuthenticatedEncryptedQuery {
                query0,
                query1,
                auth_token_comm0,
                auth_token_comm1,
            },
            AuthQueryPrivateState {
                sk: sk.clone(),
                bit,
                auth_token0: token0,
                auth_token1: token1,
            },
        ))
    }
}

/// Server: run both branches against the capability-key database and
/// package the results as a challenge.
///
/// The key database stores one key per group, so the scan uses a view
/// with the row width shrunk by the group size and a column group size of
/// one; the client's query is left untouched.
pub fn generate_auth_chal_for_query(
    secparam: u32,
    key_db: &Database,
    query: &AuthenticatedEncryptedQuery,
    nprocs: usize,
) -> Result<ChalToken> {
    let group_size = query.query0.col.group_size;
    if query.query1.col.group_size != group_size {
        return Err(PirError::Geometry(
            "branches disagree on group size".into(),
        ));
    }

    debug!(secparam, group_size, "generating capability challenge");

    let token0 = challenge_branch(key_db, &query.query0, nprocs)?;
    let token1 = challenge_branch(key_db, &query.query1, nprocs)?;

    Ok(ChalToken {
        token0,
        token1,
        secparam,
    })
}

fn challenge_branch(
    key_db: &Database,
    query: &DoublyEncryptedQuery,
    nprocs: usize,
) -> Result<Ciphertext> {
    let group_size = query.col.group_size;
    if group_size == 0 || query.row.db_width % group_size != 0 {
        return Err(PirError::Geometry(format!(
            "row width {} is not a multiple of group size {group_size}",
            query.row.db_width
        )));
    }

    // scoped view for the one-key-per-group layout
    let row = EncryptedQuery {
        pk: query.row.pk.clone(),
        bits: query.row.bits.clone(),
        group_size: 1,
        db_width: query.row.db_width / group_size,
        db_height: query.row.db_height,
    };
    let col = EncryptedQuery {
        pk: query.col.pk.clone(),
        bits: query.col.bits.clone(),
        group_size: 1,
        db_width: query.col.db_width,
        db_height: query.col.db_height,
    };

    let intermediate = key_db.private_encrypted_query(&row, nprocs)?;
    let res = key_db.private_encrypted_query_over_encrypted_result(&col, &intermediate, nprocs)?;

    if res.slots.len() != 1 || res.slots[0].cts.len() != 1 {
        return Err(PirError::ShapeMismatch(
            "capability challenge must be a single ciphertext".into(),
        ));
    }
    Ok(res.slots[0].cts[0].clone())
}

/// Client: answer a challenge by opening whichever branch cancels to an
/// encryption of zero.
pub fn auth_prove(
    state: &AuthQueryPrivateState,
    chal_token: &ChalToken,
    rng: &mut impl Rng,
) -> Result<ProofToken> {
    let sk = &state.sk;
    let pk = sk.public_key();

    let sub0 = pk.nested_sub(&chal_token.token0, &state.auth_token0)?;
    let sub1 = pk.nested_sub(&chal_token.token1, &state.auth_token1)?;
    let zero0 = sk.nested_decrypt(&sub0) == 0;
    let zero1 = sk.nested_decrypt(&sub1) == 0;

    let qbit = match (zero0, zero1) {
        (false, false) => return Err(PirError::ServerCheating),
        // the server corrupted one branch and thereby unmasked the real
        // one; prove the branch that still cancels rather than leak by
        // refusing
        (true, false) => Branch::Zero,
        (false, true) => Branch::One,
        (true, true) => state.bit,
    };
    let chal = match qbit {
        Branch::Zero => sub0,
        Branch::One => sub1,
    };

    debug!(branch = qbit.index(), "answering capability challenge");

    let (t, a, b) = pk.nested_randomize(&chal, rng);
    let p = prove_ddleq(pk, chal_token.secparam, &chal, &t, &a, &b, rng)?;

    // open the re-randomized token as a double encryption of zero
    let s = sk.extract_randomness(&t);
    let inner = sk.decrypt_nested_layer(&t);
    let r = sk.extract_randomness(&inner);

    Ok(ProofToken {
        auth_token: state.auth_token(qbit).clone(),
        t,
        p,
        qbit,
        r,
        s,
    })
}

/// Server: verify a proof against the query and challenge of the same
/// round. Accepts iff every check passes; rejection gives no hint which
/// check failed.
pub fn auth_check(
    pk: &PublicKey,
    query: &AuthenticatedEncryptedQuery,
    chal_token: &ChalToken,
    proof_token: &ProofToken,
) -> bool {
    auth_check_inner(pk, query, chal_token, proof_token).unwrap_or(false)
}

fn auth_check_inner(
    pk: &PublicKey,
    query: &AuthenticatedEncryptedQuery,
    chal_token: &ChalToken,
    proof_token: &ProofToken,
) -> Result<bool> {
    let comm = query.commitment(proof_token.qbit);
    let chal = chal_token.token(proof_token.qbit);

    // the surrendered token must be the one committed at query time
    if !comm.check_open(&proof_token.auth_token.c) {
        return Ok(false);
    }

    // redo the client's subtraction; everything below pins down that this
    // value is an encryption of zero
    let subtracted = pk.nested_sub(chal, &proof_token.auth_token)?;

    if !verify_ddleq(pk, &subtracted, &proof_token.t, &proof_token.p, chal_token.secparam) {
        return Ok(false);
    }

    // re-encrypting zero with the opened randomizers must reproduce the
    // re-randomized token bit for bit
    let inner = pk.encrypt_with_r(&Integer::new(), &proof_token.r, EncLevel::One);
    let check = pk.encrypt_with_r(&inner.c, &proof_token.s, EncLevel::Two);
    Ok(check.c == proof_token.t.c)
}

// ============================================================================
// Two-server (secret-shared) variant
// ============================================================================

/// A share of the capability key, as handed to one server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthTokenShare {
    pub t: Slot,
}

/// A server's audit contribution. All servers' contributions XOR to zero
/// exactly when the query is keyed correctly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditTokenShare {
    pub t: Slot,
}

/// One server's portion of an authenticated secret-shared query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticatedQueryShare {
    pub query: QueryShare,
    pub auth_token: AuthTokenShare,
}

/// XOR-share a capability key across `num_shares` servers.
pub fn auth_token_shares_for_key(
    auth_key: &Slot,
    num_shares: usize,
    rng: &mut impl Rng,
) -> Vec<AuthTokenShare> {
    assert!(num_shares >= 1, "need at least one share");
    let num_bytes = auth_key.len();

    let mut accumulator = auth_key.clone();
    let mut shares = Vec::with_capacity(num_shares);
    shares.push(AuthTokenShare {
        t: Slot::empty(num_bytes), // placeholder, replaced below
    });
    for _ in 1..num_shares {
        let share = Slot::random(num_bytes, rng);
        accumulator
            .xor_with(&share)
            .expect("shares match the key width");
        shares.push(AuthTokenShare { t: share });
    }
    shares[0].t = accumulator;
    shares
}

impl DbMetadata {
    /// Build index query shares bundled with capability-key shares, one
    /// pair per server.
    pub fn new_authenticated_index_query_shares(
        &self,
        index: usize,
        auth_key: &Slot,
        group_size: usize,
        num_shares: usize,
        rng: &mut impl Rng,
    ) -> Result<Vec<AuthenticatedQueryShare>> {
        let query_shares = self.new_index_query_shares(index, group_size, num_shares, rng)?;
        let token_shares = auth_token_shares_for_key(auth_key, num_shares, rng);

        Ok(query_shares
            .into_iter()
            .zip(token_shares)
            .map(|(query, auth_token)| AuthenticatedQueryShare { query, auth_token })
            .collect())
    }
}

/// Server: expand the share's DPF over the capability-key database and
/// fold in the token share.
pub fn generate_audit_for_shared_query(
    key_db: &Database,
    share: &AuthenticatedQueryShare,
    nprocs: usize,
) -> Result<AuditTokenShare> {
    // the key database stores one key per group of the main database
    let scoped = QueryShare {
        group_size: 1,
        ..share.query.clone()
    };
    let bits = key_db.expand_shared_query(&scoped)?;
    generate_audit_for_shared_query_with_bits(key_db, share, &bits, nprocs)
}

/// As [`generate_audit_for_shared_query`], but reusing a selection vector
/// expanded elsewhere, so the same DPF expansion can serve the data scan
/// and the audit.
pub fn generate_audit_for_shared_query_with_bits(
    key_db: &Database,
    share: &AuthenticatedQueryShare,
    bits: &[bool],
    nprocs: usize,
) -> Result<AuditTokenShare> {
    let scoped = QueryShare {
        group_size: 1,
        ..share.query.clone()
    };
    let res = key_db.private_secret_shared_query_with_bits(&scoped, bits, nprocs)?;
    if res.shares.len() != 1 {
        return Err(PirError::ShapeMismatch(format!(
            "audit scan produced {} slots instead of one",
            res.shares.len()
        )));
    }

    let mut token = res
        .shares
        .into_iter()
        .next()
        .expect("length checked above");
    token.xor_with(&share.auth_token.t)?;
    Ok(AuditTokenShare { t: token })
}

/// Accept iff all audit contributions XOR to zero.
pub fn check_audit(audit_tokens: &[AuditTokenShare]) -> bool {
    let Some(first) = audit_tokens.first() else {
        return false;
    };

    let mut acc = Slot::empty(first.t.len());
    for token in audit_tokens {
        if acc.xor_with(&token.t).is_err() {
            return false;
        }
    }
    acc.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_token_shares_xor_to_key() {
        let mut rng = rand::rng();
        let key = Slot::random(10, &mut rng);

        for num_shares in [2, 3, 5] {
            let shares = auth_token_shares_for_key(&key, num_shares, &mut rng);
            assert_eq!(shares.len(), num_shares);

            let mut acc = Slot::empty(10);
            for share in &shares {
                acc.xor_with(&share.t).unwrap();
            }
            assert_eq!(acc, key);
        }
    }

    #[test]
    fn test_check_audit_on_raw_tokens() {
        let mut rng = rand::rng();
        let a = Slot::random(8, &mut rng);
        let b = a.clone();

        assert!(check_audit(&[
            AuditTokenShare { t: a.clone() },
            AuditTokenShare { t: b }
        ]));
        assert!(!check_audit(&[
            AuditTokenShare { t: a },
            AuditTokenShare { t: Slot::random(8, &mut rng) }
        ]));
        assert!(!check_audit(&[]));
    }

    #[test]
    fn test_branch_plumbing() {
        assert_eq!(Branch::Zero.index(), 0);
        assert_eq!(Branch::One.index(), 1);
        assert_eq!(Branch::Zero.other(), Branch::One);
        assert_eq!(Branch::One.other(), Branch::Zero);
    }
}
