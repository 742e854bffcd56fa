//! wallet-side point notes
//!
//! a note is everything needed to spend one point: the spend secret (which
//! doubles as the commitment's blinding factor) and the one-time owner key
//! used in rings. lose it and the point is gone.

use ark_bn254::Fr;
use ark_std::UniformRand;
use rand::{CryptoRng, RngCore};

use crate::circuit::SpendWitness;
use crate::codec::{self, Commitment, NullifierHash, PointId};
use crate::error::{PoolError, Result};
use crate::field::FieldElement;
use crate::merkle::MerkleProof;
use crate::ring::{KeyImage, OwnerKey, OwnerSecret};

const NOTE_PREFIX: &str = "gravity-note-";

#[derive(Clone)]
pub struct PointNote {
    secret: FieldElement,
    owner: OwnerSecret,
}

impl PointNote {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            secret: FieldElement(Fr::rand(rng)),
            owner: OwnerSecret::random(rng),
        }
    }

    pub fn from_parts(secret: FieldElement, owner: OwnerSecret) -> Self {
        Self { secret, owner }
    }

    pub fn secret(&self) -> FieldElement {
        self.secret
    }

    pub fn owner_secret(&self) -> &OwnerSecret {
        &self.owner
    }

    pub fn owner_key(&self) -> OwnerKey {
        self.owner.public_key()
    }

    pub fn key_image(&self) -> KeyImage {
        self.owner.key_image()
    }

    pub fn commitment(&self, unit: u64) -> Commitment {
        codec::commit(FieldElement::from_u64(unit), self.secret)
    }

    pub fn id(&self, unit: u64) -> PointId {
        codec::point_id(&self.commitment(unit))
    }

    pub fn nullifier_hash(&self, unit: u64) -> NullifierHash {
        codec::derive_nullifier(&self.id(unit), self.secret)
    }

    /// private inputs for the spend circuit
    pub fn witness(&self, unit: u64, path: MerkleProof) -> SpendWitness {
        SpendWitness {
            value: unit,
            secret: self.secret,
            path,
        }
    }

    /// `gravity-note-<hex(secret || owner secret)>`
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&self.secret.to_be_bytes());
        bytes.extend_from_slice(&self.owner.to_bytes());
        format!("{}{}", NOTE_PREFIX, hex::encode(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(NOTE_PREFIX)
            .ok_or_else(|| PoolError::InvalidEncoding("missing note prefix".into()))?;
        let bytes = hex::decode(body).map_err(|e| PoolError::InvalidEncoding(e.to_string()))?;
        if bytes.len() != 64 {
            return Err(PoolError::InvalidEncoding(format!("note is {} bytes, expected 64", bytes.len())));
        }
        let secret = FieldElement::from_be_bytes(&bytes[..32])?;
        let mut owner = [0u8; 32];
        owner.copy_from_slice(&bytes[32..]);
        let owner = OwnerSecret::from_bytes(owner)
            .ok_or_else(|| PoolError::InvalidEncoding("owner secret is not a canonical scalar".into()))?;
        Ok(Self { secret, owner })
    }
}

impl core::fmt::Debug for PointNote {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PointNote")
            .field("owner", &self.owner_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_note_derivations_consistent() {
        let mut rng = StdRng::seed_from_u64(11);
        let note = PointNote::random(&mut rng);
        let c = note.commitment(10);
        assert_eq!(c, codec::commit(FieldElement::from_u64(10), note.secret()));
        assert_eq!(note.id(10), codec::point_id(&c));
        assert_eq!(note.nullifier_hash(10), codec::derive_nullifier(&note.id(10), note.secret()));
        assert_ne!(note.commitment(10), note.commitment(20));
    }

    #[test]
    fn test_hex_restores_note() {
        let mut rng = StdRng::seed_from_u64(12);
        let note = PointNote::random(&mut rng);
        let restored = PointNote::from_hex(&note.to_hex()).unwrap();
        assert_eq!(restored.secret(), note.secret());
        assert_eq!(restored.owner_key(), note.owner_key());
        assert_eq!(restored.key_image(), note.key_image());

        assert!(PointNote::from_hex("gravity-note-00").is_err());
        assert!(PointNote::from_hex(&note.to_hex()[1..]).is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut rng = StdRng::seed_from_u64(13);
        let note = PointNote::random(&mut rng);
        let dbg = format!("{:?}", note);
        assert!(!dbg.contains(&hex::encode(note.secret().to_be_bytes())));
    }
}
