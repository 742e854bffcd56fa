//! commitment codec
//!
//! point commitments, point ids, nullifier hashes and tree nodes are all
//! outputs of one arithmetic-friendly hash over the bn254 scalar field, so the
//! spend circuit can recompute every one of them
//!
//! # hash
//!
//! mimc with the x^5 s-box used as a block cipher in miyaguchi-preneel mode:
//!
//! ```text
//! E_k(x)     = x_R + k   where x_0 = x, x_{i+1} = (x_i + k + c_i)^5
//! compress(h, m) = E_h(m) + h + m
//! hash(tag; m_1..m_n) = compress(..compress(tag, m_1).., m_n)
//! ```
//!
//! gcd(5, r - 1) = 1 for bn254, so x^5 is a permutation; 110 rounds covers
//! log_5(r) with margin for interpolation attacks

use std::sync::OnceLock;

use ark_bn254::Fr;
use ark_ff::{Field, PrimeField};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::field::{field_newtype, FieldElement};

/// number of mimc rounds
pub const MIMC_ROUNDS: usize = 110;

/// domain label for round constant derivation
const ROUND_CONSTANT_DOMAIN: &[u8] = b"gravity-pool.mimc5.round-constant.v1";
/// domain label for the empty leaf
const EMPTY_LEAF_DOMAIN: &[u8] = b"gravity-pool.merkle.empty-leaf.v1";

/// per-use domain tags, absorbed as the initial chaining value
pub mod domain {
    pub const COMMITMENT: u64 = 1;
    pub const POINT_ID: u64 = 2;
    pub const NULLIFIER: u64 = 3;
    pub const MERKLE_NODE: u64 = 4;
}

field_newtype!(
    /// binding + hiding commitment to (value, blinding)
    Commitment
);

field_newtype!(
    /// public id of a point: hash of its commitment
    PointId
);

field_newtype!(
    /// published once, when the point is spent
    NullifierHash
);

field_newtype!(
    /// merkle root of the commitment accumulator
    Root
);

/// mimc round constants, shared by the native hash and the circuit gadget
pub fn round_constants() -> &'static [Fr] {
    static CONSTANTS: OnceLock<Vec<Fr>> = OnceLock::new();
    CONSTANTS.get_or_init(|| {
        (0..MIMC_ROUNDS as u32)
            .map(|i| {
                let mut hasher = Sha256::new();
                hasher.update(ROUND_CONSTANT_DOMAIN);
                hasher.update(i.to_be_bytes());
                Fr::from_be_bytes_mod_order(&hasher.finalize())
            })
            .collect()
    })
}

/// mimc-5 block cipher keyed by `key`
pub fn mimc_encrypt(mut x: Fr, key: Fr) -> Fr {
    for c in round_constants() {
        let t = x + key + c;
        let t2 = t.square();
        x = t2.square() * t;
    }
    x + key
}

/// one miyaguchi-preneel step
pub fn compress(chain: Fr, message: Fr) -> Fr {
    mimc_encrypt(message, chain) + chain + message
}

/// domain-tagged hash of a sequence of field elements
pub fn hash(tag: u64, inputs: &[Fr]) -> Fr {
    inputs
        .iter()
        .fold(Fr::from(tag), |chain, m| compress(chain, *m))
}

/// `commit(value, blinding)`
///
/// both arguments arrive as field elements, so range failures surface when
/// decoding them (see [`commit_bytes`])
pub fn commit(value: FieldElement, blinding: FieldElement) -> Commitment {
    Commitment::from(hash(domain::COMMITMENT, &[value.0, blinding.0]))
}

/// `commit` over wire-encoded scalars, `InvalidScalar` if either is out of range
pub fn commit_bytes(value: &[u8], blinding: &[u8]) -> Result<Commitment> {
    let value = FieldElement::from_be_bytes(value)?;
    let blinding = FieldElement::from_be_bytes(blinding)?;
    Ok(commit(value, blinding))
}

/// point id = H(commitment)
pub fn point_id(commitment: &Commitment) -> PointId {
    PointId::from(hash(domain::POINT_ID, &[commitment.inner()]))
}

/// `deriveNullifier(pointId, secret)`
pub fn derive_nullifier(id: &PointId, secret: FieldElement) -> NullifierHash {
    NullifierHash::from(hash(domain::NULLIFIER, &[id.inner(), secret.0]))
}

/// interior node of the accumulator
pub fn hash_node(left: Fr, right: Fr) -> Fr {
    hash(domain::MERKLE_NODE, &[left, right])
}

/// value of an unfilled leaf slot
pub fn empty_leaf() -> Fr {
    static EMPTY: OnceLock<Fr> = OnceLock::new();
    *EMPTY.get_or_init(|| Fr::from_be_bytes_mod_order(&Sha256::digest(EMPTY_LEAF_DOMAIN)))
}
