//! zk proof gate
//!
//! a spend proof is checked against its six public inputs, in this order:
//!
//! ```text
//! (root, nullifier_hash, recipient, relayer, fee, refund)
//! ```
//!
//! recipient, relayer, fee and refund do not take part in the hiding
//! arithmetic but are still bound into the proof, so a relayer cannot point a
//! valid proof at a different payout.
//!
//! verification is pure. the gate runs it outside every lock and batches of
//! independent requests fan out over rayon.

use std::path::Path;

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use ark_snark::SNARK;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::codec::{NullifierHash, Root};
use crate::error::{PoolError, Result};
use crate::field::{FieldElement, FIELD_BYTES};

/// number of public inputs
pub const PUBLIC_INPUTS: usize = 6;

/// public-input tuple of a spend proof
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicInputs {
    pub root: Root,
    pub nullifier_hash: NullifierHash,
    /// payout address, or the output commitment of a private transfer
    pub recipient: FieldElement,
    pub relayer: FieldElement,
    pub fee: u64,
    pub refund: u64,
}

impl PublicInputs {
    pub const ENCODED_LEN: usize = PUBLIC_INPUTS * FIELD_BYTES;

    /// ordered field elements as the verifier consumes them
    pub fn to_field_elements(&self) -> [Fr; PUBLIC_INPUTS] {
        [
            self.root.inner(),
            self.nullifier_hash.inner(),
            self.recipient.inner(),
            self.relayer.inner(),
            Fr::from(self.fee),
            Fr::from(self.refund),
        ]
    }

    /// six 32-byte big-endian field elements
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_field_elements()
            .iter()
            .flat_map(|f| FieldElement(*f).to_be_bytes())
            .collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(PoolError::InvalidEncoding(format!(
                "public inputs are {} bytes, expected {}",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        let fe = bytes
            .chunks_exact(FIELD_BYTES)
            .map(FieldElement::from_be_bytes)
            .collect::<Result<Vec<_>>>()?;
        let fee = fe[4]
            .to_u64()
            .ok_or_else(|| PoolError::InvalidEncoding("fee exceeds u64".into()))?;
        let refund = fe[5]
            .to_u64()
            .ok_or_else(|| PoolError::InvalidEncoding("refund exceeds u64".into()))?;

        Ok(Self {
            root: Root(fe[0]),
            nullifier_hash: NullifierHash(fe[1]),
            recipient: fe[2],
            relayer: fe[3],
            fee,
            refund,
        })
    }
}

/// the proof system behind the gate
pub trait ProofVerifier: Send + Sync {
    /// `Ok(())` iff `proof` attests to a satisfying witness for `inputs`
    fn verify(&self, proof: &[u8], inputs: &PublicInputs) -> Result<()>;
}

/// groth16 over bn254 with a prepared verifying key
#[derive(Clone)]
pub struct Groth16Verifier {
    pvk: PreparedVerifyingKey<Bn254>,
}

impl Groth16Verifier {
    pub fn new(vk: &VerifyingKey<Bn254>) -> Result<Self> {
        let pvk = Groth16::<Bn254>::process_vk(vk)
            .map_err(|e| PoolError::Setup(format!("failed to prepare verifying key: {}", e)))?;
        Ok(Self { pvk })
    }

    /// from a compressed verifying key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let vk = VerifyingKey::<Bn254>::deserialize_compressed(bytes)?;
        if vk.gamma_abc_g1.len() != PUBLIC_INPUTS + 1 {
            return Err(PoolError::Setup(format!(
                "verifying key expects {} public inputs, spend proofs carry {}",
                vk.gamma_abc_g1.len().saturating_sub(1),
                PUBLIC_INPUTS
            )));
        }
        Self::new(&vk)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

impl ProofVerifier for Groth16Verifier {
    fn verify(&self, proof: &[u8], inputs: &PublicInputs) -> Result<()> {
        let proof = Proof::<Bn254>::deserialize_compressed(proof)
            .map_err(|e| PoolError::InvalidProof(format!("malformed proof: {}", e)))?;

        match Groth16::<Bn254>::verify_with_processed_vk(&self.pvk, &inputs.to_field_elements(), &proof) {
            Ok(true) => Ok(()),
            Ok(false) => Err(PoolError::InvalidProof("pairing check failed".into())),
            Err(e) => Err(PoolError::InvalidProof(e.to_string())),
        }
    }
}

/// root-window check followed by proof verification
pub struct ProofGate<V> {
    verifier: V,
}

impl<V: ProofVerifier> ProofGate<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// `RootMismatch` unless `inputs.root` is one of `known_roots`, then
    /// `InvalidProof` on any constraint failure
    pub fn verify(&self, proof: &[u8], inputs: &PublicInputs, known_roots: &[Root]) -> Result<()> {
        if !known_roots.contains(&inputs.root) {
            return Err(PoolError::RootMismatch);
        }
        self.verifier.verify(proof, inputs)
    }

    /// independent requests, verified in parallel, results in input order
    pub fn verify_batch(
        &self,
        requests: &[(&[u8], &PublicInputs)],
        known_roots: &[Root],
    ) -> Vec<Result<()>> {
        #[cfg(feature = "parallel")]
        let iter = requests.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = requests.iter();

        iter.map(|(proof, inputs)| self.verify(proof, inputs, known_roots))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// accepts proofs equal to the root bytes
    struct EchoVerifier;

    impl ProofVerifier for EchoVerifier {
        fn verify(&self, proof: &[u8], inputs: &PublicInputs) -> Result<()> {
            if proof == inputs.root.to_bytes() {
                Ok(())
            } else {
                Err(PoolError::InvalidProof("echo mismatch".into()))
            }
        }
    }

    fn inputs(root: u64) -> PublicInputs {
        PublicInputs {
            root: Root::from(Fr::from(root)),
            nullifier_hash: NullifierHash::from(Fr::from(7u64)),
            recipient: FieldElement::from_be_bytes(&[0xaa; 20]).unwrap(),
            relayer: FieldElement::default(),
            fee: 1,
            refund: 0,
        }
    }

    #[test]
    fn test_encoding_order() {
        let i = inputs(3);
        let bytes = i.to_bytes();
        assert_eq!(bytes.len(), PublicInputs::ENCODED_LEN);
        assert_eq!(&bytes[..32], &i.root.to_bytes());
        assert_eq!(&bytes[32..64], &i.nullifier_hash.to_bytes());
        assert_eq!(&bytes[64 + 12..96], &[0xaa; 20]);
        assert_eq!(bytes[4 * 32 + 31], 1);
        assert_eq!(PublicInputs::from_bytes(&bytes).unwrap(), i);
    }

    #[test]
    fn test_decode_rejects_wide_fee() {
        let mut bytes = inputs(3).to_bytes();
        bytes[4 * 32 + 10] = 1;
        assert!(matches!(
            PublicInputs::from_bytes(&bytes),
            Err(PoolError::InvalidEncoding(_))
        ));
        assert!(PublicInputs::from_bytes(&bytes[1..]).is_err());
    }

    #[test]
    fn test_gate_checks_root_window_first() {
        let gate = ProofGate::new(EchoVerifier);
        let i = inputs(5);
        let good = i.root.to_bytes();
        let roots = [Root::from(Fr::from(4u64)), Root::from(Fr::from(5u64))];

        assert!(gate.verify(&good, &i, &roots).is_ok());
        assert_eq!(gate.verify(&good, &i, &roots[..1]), Err(PoolError::RootMismatch));
        assert!(matches!(
            gate.verify(b"junk", &i, &roots),
            Err(PoolError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_batch_preserves_order() {
        let gate = ProofGate::new(EchoVerifier);
        let a = inputs(1);
        let b = inputs(2);
        let roots = [a.root, b.root];
        let pa = a.root.to_bytes();
        let requests: Vec<(&[u8], &PublicInputs)> = vec![(&pa[..], &a), (&b"x"[..], &b), (&pa[..], &b)];

        let results = gate.verify_batch(&requests, &roots);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_err());
    }

    #[test]
    fn test_malformed_groth16_proof() {
        use crate::circuit;
        use rand::{rngs::StdRng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0);
        let (_, vk) = circuit::setup(4, 10, &mut rng).unwrap();
        let verifier = Groth16Verifier::new(&vk).unwrap();
        assert!(matches!(
            verifier.verify(&[1, 2, 3], &inputs(1)),
            Err(PoolError::InvalidProof(_))
        ));
    }
}
