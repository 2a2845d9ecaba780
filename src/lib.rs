//! Private information retrieval with authenticated queries.
//!
//! A client fetches the `i`-th record of a server-held database without
//! revealing `i`. Two query families are provided, plus an authentication
//! layer over each:
//!
//! 1. **Secret-shared PIR** ([`shared_query`]): two or more
//!    non-colluding servers each receive a DPF key; XORing their scan
//!    results recovers the record. Communication is tiny, trust is split.
//! 2. **Encrypted PIR** ([`encrypted_query`]): a single server computes a
//!    homomorphic inner product between an encrypted selection vector and
//!    the database, over a square-ish grid view. The doubly-encrypted
//!    form recurses once more and compresses the answer from a row down
//!    to one group of records.
//! 3. **Authenticated PIR** ([`auth`]): the server additionally demands
//!    proof that the client knows a per-record capability key before the
//!    answer is useful, still without learning which record was touched.
//!    The single-server variant runs a commit / challenge / prove round
//!    over a real and a decoy query; the multi-server variant XORs audit
//!    shares that cancel only for a correctly keyed query.
//!
//! ## Example: two-server retrieval
//!
//! ```
//! use aspir::database::Database;
//! use aspir::shared_query::recover;
//!
//! let mut rng = rand::rng();
//! let db = Database::random(256, 32, &mut rng);
//!
//! // client
//! let shares = db.meta.new_index_query_shares(42, 1, 2, &mut rng)?;
//!
//! // each server answers its share independently
//! let res_a = db.private_secret_shared_query(&shares[0], 4)?;
//! let res_b = db.private_secret_shared_query(&shares[1], 4)?;
//!
//! // client combines
//! let slots = recover(&[res_a, res_b])?;
//! assert_eq!(slots[0], db.slots[42]);
//! # Ok::<(), aspir::error::PirError>(())
//! ```
//!
//! Scans are read-only over the database and fan out across a
//! caller-chosen number of workers; results are bit-exact regardless of
//! the worker count.

pub mod auth;
pub mod commitment;
pub mod database;
pub mod dpf;
pub mod encrypted_query;
pub mod error;
pub mod paillier;
pub mod shared_query;
pub mod slot;

pub use auth::{
    auth_check, auth_prove, auth_token_shares_for_key, check_audit,
    generate_audit_for_shared_query, generate_audit_for_shared_query_with_bits,
    generate_auth_chal_for_query, AuditTokenShare, AuthQueryPrivateState, AuthTokenShare,
    AuthenticatedEncryptedQuery, AuthenticatedQueryShare, Branch, ChalToken, ProofToken,
};
pub use commitment::RoCommitment;
pub use database::{Database, DbMetadata};
pub use encrypted_query::{
    recover_doubly_encrypted, recover_encrypted, DoublyEncryptedQuery,
    DoublyEncryptedQueryResult, EncryptedQuery, EncryptedQueryResult,
};
pub use error::{PirError, Result};
pub use paillier::{key_gen, Ciphertext, EncLevel, PublicKey, SecretKey};
pub use shared_query::{recover, QueryShare, SecretSharedQueryResult};
pub use slot::Slot;
