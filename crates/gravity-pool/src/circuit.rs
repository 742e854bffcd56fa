//! spend circuit
//!
//! public: root, nullifier_hash, recipient, relayer, fee, refund
//! private: value, secret, merkle siblings, direction bits
//!
//! ```text
//! C       = H_commit(value, secret)        value == unit
//! id      = H_id(C)
//! nf      = H_nf(id, secret)               nf == nullifier_hash
//! root'   = fold(C, siblings, bits)        root' == root
//! value   = payout + fee + refund          payout, fee, refund < 2^64
//! ```
//!
//! the hash gadgets replay [`crate::codec`] constraint for constraint, so a
//! commitment computed natively is the one the circuit opens.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, ProvingKey, VerifyingKey};
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
use ark_serialize::CanonicalSerialize;
use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
use rand::{CryptoRng, RngCore};

use crate::codec::{self, domain, round_constants};
use crate::error::{PoolError, Result};
use crate::field::FieldElement;
use crate::merkle::MerkleProof;
use crate::verifier::PublicInputs;

/// bits allowed in payout, fee and refund
const AMOUNT_BITS: usize = 64;

/// mimc-5 encryption in-circuit, three constraints per round
pub fn mimc_encrypt_gadget(x: &FpVar<Fr>, key: &FpVar<Fr>) -> std::result::Result<FpVar<Fr>, SynthesisError> {
    let mut x = x.clone();
    for c in round_constants() {
        let t = &x + key + *c;
        let t2 = t.square()?;
        x = t2.square()? * &t;
    }
    Ok(x + key)
}

pub fn compress_gadget(chain: &FpVar<Fr>, message: &FpVar<Fr>) -> std::result::Result<FpVar<Fr>, SynthesisError> {
    Ok(mimc_encrypt_gadget(message, chain)? + chain + message)
}

/// in-circuit [`codec::hash`]
pub fn hash_gadget(tag: u64, inputs: &[FpVar<Fr>]) -> std::result::Result<FpVar<Fr>, SynthesisError> {
    let mut chain = FpVar::constant(Fr::from(tag));
    for m in inputs {
        chain = compress_gadget(&chain, m)?;
    }
    Ok(chain)
}

/// private half of a spend
#[derive(Clone, Debug)]
pub struct SpendWitness {
    pub value: u64,
    pub secret: FieldElement,
    pub path: MerkleProof,
}

#[derive(Clone, Debug)]
pub struct SpendCircuit {
    unit: u64,
    depth: usize,
    inputs: Option<PublicInputs>,
    witness: Option<SpendWitness>,
}

impl SpendCircuit {
    /// shape-only circuit for key generation
    pub fn blank(depth: usize, unit: u64) -> Self {
        Self {
            unit,
            depth,
            inputs: None,
            witness: None,
        }
    }

    pub fn new(unit: u64, inputs: PublicInputs, witness: SpendWitness) -> Self {
        Self {
            unit,
            depth: witness.path.depth(),
            inputs: Some(inputs),
            witness: Some(witness),
        }
    }

    fn input<T>(&self, f: impl FnOnce(&PublicInputs) -> T) -> std::result::Result<T, SynthesisError> {
        self.inputs.as_ref().map(f).ok_or(SynthesisError::AssignmentMissing)
    }

    fn private<T>(&self, f: impl FnOnce(&SpendWitness) -> T) -> std::result::Result<T, SynthesisError> {
        self.witness.as_ref().map(f).ok_or(SynthesisError::AssignmentMissing)
    }
}

impl ConstraintSynthesizer<Fr> for SpendCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> std::result::Result<(), SynthesisError> {
        // public inputs, allocation order is the verifier's input order
        let root = FpVar::new_input(cs.clone(), || self.input(|i| i.root.inner()))?;
        let nullifier_hash = FpVar::new_input(cs.clone(), || self.input(|i| i.nullifier_hash.inner()))?;
        let recipient = FpVar::new_input(cs.clone(), || self.input(|i| i.recipient.inner()))?;
        let relayer = FpVar::new_input(cs.clone(), || self.input(|i| i.relayer.inner()))?;
        let fee = FpVar::new_input(cs.clone(), || self.input(|i| Fr::from(i.fee)))?;
        let refund = FpVar::new_input(cs.clone(), || self.input(|i| Fr::from(i.refund)))?;

        let value = FpVar::new_witness(cs.clone(), || self.private(|w| Fr::from(w.value)))?;
        let secret = FpVar::new_witness(cs.clone(), || self.private(|w| w.secret.inner()))?;

        // fixed denomination
        value.enforce_equal(&FpVar::constant(Fr::from(self.unit)))?;

        let commitment = hash_gadget(domain::COMMITMENT, &[value.clone(), secret.clone()])?;
        let id = hash_gadget(domain::POINT_ID, &[commitment.clone()])?;
        let nullifier = hash_gadget(domain::NULLIFIER, &[id, secret])?;
        nullifier.enforce_equal(&nullifier_hash)?;

        // membership, directions come from witnessed bits
        let mut node = commitment;
        for h in 0..self.depth {
            let sibling = FpVar::new_witness(cs.clone(), || {
                self.private(|w| w.path.siblings.get(h).copied())?
                    .ok_or(SynthesisError::AssignmentMissing)
            })?;
            let is_right = Boolean::new_witness(cs.clone(), || {
                self.private(|w| w.path.indices.get(h).copied())?
                    .ok_or(SynthesisError::AssignmentMissing)
            })?;
            let left = FpVar::conditionally_select(&is_right, &sibling, &node)?;
            let right = FpVar::conditionally_select(&is_right, &node, &sibling)?;
            node = hash_gadget(domain::MERKLE_NODE, &[left, right])?;
        }
        node.enforce_equal(&root)?;

        // conservation without wraparound
        let payout = FpVar::new_witness(cs.clone(), || {
            let value = self.private(|w| Fr::from(w.value))?;
            let (fee, refund) = self.input(|i| (Fr::from(i.fee), Fr::from(i.refund)))?;
            Ok(value - fee - refund)
        })?;
        (&payout + &fee + &refund).enforce_equal(&value)?;
        for amount in [&payout, &fee, &refund] {
            enforce_u64(amount)?;
        }

        // tie recipient and relayer into the constraint system
        let _ = recipient.square()?;
        let _ = relayer.square()?;

        Ok(())
    }
}

fn enforce_u64(v: &FpVar<Fr>) -> std::result::Result<(), SynthesisError> {
    let bits = v.to_bits_le()?;
    for bit in &bits[AMOUNT_BITS..] {
        bit.enforce_equal(&Boolean::FALSE)?;
    }
    Ok(())
}

/// circuit-specific trusted setup for a tree of `depth` and denomination `unit`
pub fn setup<R: RngCore + CryptoRng>(
    depth: usize,
    unit: u64,
    rng: &mut R,
) -> Result<(ProvingKey<Bn254>, VerifyingKey<Bn254>)> {
    <Groth16<Bn254> as CircuitSpecificSetupSNARK<Fr>>::setup(SpendCircuit::blank(depth, unit), rng)
        .map_err(|e| PoolError::Setup(e.to_string()))
}

/// produce a compressed spend proof
///
/// the cheap native checks run first, an unsatisfiable witness never
/// reaches the prover
pub fn prove<R: RngCore + CryptoRng>(
    pk: &ProvingKey<Bn254>,
    unit: u64,
    inputs: &PublicInputs,
    witness: &SpendWitness,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let fees = inputs.fee.saturating_add(inputs.refund);
    if fees > witness.value {
        return Err(PoolError::FeeExceedsDenomination { fees, unit });
    }
    let commitment = codec::commit(FieldElement::from_u64(witness.value), witness.secret);
    if witness.path.leaf != commitment.inner() || !witness.path.verify(&inputs.root) {
        return Err(PoolError::InvalidProof("membership path does not reach root".into()));
    }
    let nullifier = codec::derive_nullifier(&codec::point_id(&commitment), witness.secret);
    if nullifier != inputs.nullifier_hash {
        return Err(PoolError::InvalidProof("nullifier does not match witness".into()));
    }

    let circuit = SpendCircuit::new(unit, *inputs, witness.clone());
    let proof = Groth16::<Bn254>::prove(pk, circuit, rng)
        .map_err(|e| PoolError::InvalidProof(format!("proving failed: {}", e)))?;

    let mut bytes = Vec::new();
    proof.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}
