//! linkable spontaneous anonymous group signatures over ristretto255
//!
//! a ring of k owner keys signs a message; the verifier learns that one of
//! the k secret keys was used and nothing about which. each secret key maps
//! to exactly one key image `I = x * Hp(P)`, so two signatures by the same
//! key are linkable without being attributable.
//!
//! ```text
//! sign (signer at index π):
//!   α ← random
//!   c_{π+1} = H(m, ring, I, αG, αHp(P_π))
//!   for i = π+1 .. π-1 (mod k):
//!     s_i ← random
//!     c_{i+1} = H(m, ring, I, s_i G + c_i P_i, s_i Hp(P_i) + c_i I)
//!   s_π = α - c_π x
//!   σ = (c_0, s_0..s_{k-1}, I)
//! ```
//!
//! verification walks the same chain from c_0 and accepts iff it closes.
//! size and verification cost are linear in k.

use std::collections::HashMap;

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT as G,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
    traits::IsIdentity,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use sha2::Sha512;

use crate::error::{PoolError, Result};

/// transcript domain for ring challenges
const LSAG_DOMAIN: &[u8] = b"gravity-pool.lsag.v1";
/// hash-to-point domain
const HASH_TO_POINT_DOMAIN: &[u8] = b"gravity-pool.lsag.hash-to-point.v1";

/// compressed ristretto public key bound to a point
///
/// one-time key chosen by the depositor, never a wallet address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey(pub [u8; 32]);

impl OwnerKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// decompress, failing on bytes that are not a valid non-identity point
    pub fn decompress(&self) -> Result<RistrettoPoint> {
        let point = CompressedRistretto(self.0)
            .decompress()
            .ok_or_else(|| PoolError::InvalidEncoding("owner key is not a ristretto point".into()))?;
        if point.is_identity() {
            return Err(PoolError::InvalidEncoding("owner key is the identity".into()));
        }
        Ok(point)
    }
}

impl core::fmt::Debug for OwnerKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "OwnerKey({}..)", hex::encode(&self.0[..6]))
    }
}

/// linkability tag, one per secret key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyImage(pub [u8; 32]);

impl core::fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "KeyImage({}..)", hex::encode(&self.0[..6]))
    }
}

/// secret half of an owner key
#[derive(Clone)]
pub struct OwnerSecret(Scalar);

impl OwnerSecret {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(Scalar::random(rng))
    }

    /// from canonical scalar bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Option<Self> {
        Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes)).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> OwnerKey {
        OwnerKey((self.0 * G).compress().to_bytes())
    }

    pub fn key_image(&self) -> KeyImage {
        let image = self.0 * hash_to_point(&self.public_key());
        KeyImage(image.compress().to_bytes())
    }
}

impl core::fmt::Debug for OwnerSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("OwnerSecret(..)")
    }
}

/// Hp: owner key -> curve point with unknown discrete log
pub fn hash_to_point(key: &OwnerKey) -> RistrettoPoint {
    let mut input = Vec::with_capacity(HASH_TO_POINT_DOMAIN.len() + 32);
    input.extend_from_slice(HASH_TO_POINT_DOMAIN);
    input.extend_from_slice(&key.0);
    RistrettoPoint::hash_from_bytes::<Sha512>(&input)
}

/// lsag signature `(c_0, s_0..s_{k-1}, I)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingSignature {
    pub challenge: Scalar,
    pub responses: Vec<Scalar>,
    pub key_image: KeyImage,
}

impl RingSignature {
    /// size in bytes for a ring of `k` members
    pub fn encoded_len(k: usize) -> usize {
        32 * (k + 2)
    }

    /// c_0 || s_0 .. s_{k-1} || I
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::encoded_len(self.responses.len()));
        out.extend_from_slice(self.challenge.as_bytes());
        for s in &self.responses {
            out.extend_from_slice(s.as_bytes());
        }
        out.extend_from_slice(&self.key_image.0);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 96 || bytes.len() % 32 != 0 {
            return Err(PoolError::InvalidEncoding(format!(
                "ring signature length {} is not 32 * (k + 2)",
                bytes.len()
            )));
        }
        let mut chunks: Vec<[u8; 32]> = bytes
            .chunks_exact(32)
            .map(|c| {
                let mut word = [0u8; 32];
                word.copy_from_slice(c);
                word
            })
            .collect();

        let key_image = KeyImage(chunks.pop().unwrap_or_default());
        let scalars = chunks
            .into_iter()
            .map(|w| {
                Option::<Scalar>::from(Scalar::from_canonical_bytes(w))
                    .ok_or_else(|| PoolError::InvalidEncoding("non-canonical scalar".into()))
            })
            .collect::<Result<Vec<_>>>()?;

        let (challenge, responses) = scalars
            .split_first()
            .ok_or_else(|| PoolError::InvalidEncoding("empty ring signature".into()))?;
        Ok(Self {
            challenge: *challenge,
            responses: responses.to_vec(),
            key_image,
        })
    }

    pub fn ring_size(&self) -> usize {
        self.responses.len()
    }
}

/// the ring primitive the settlement gate depends on
///
/// implementations verify wire-encoded signatures so the gate never sees a
/// curve type
pub trait RingScheme: Send + Sync {
    /// accept iff `signature` is a valid ring signature on `message` for
    /// exactly this ring, returning the signer's key image
    fn verify(&self, message: &[u8], signature: &[u8], ring: &[OwnerKey]) -> Result<KeyImage>;
}

/// lsag over ristretto255
#[derive(Clone, Copy, Debug, Default)]
pub struct Lsag;

impl Lsag {
    /// sign `message` as `ring[signer_index]`
    pub fn sign<R: RngCore + CryptoRng>(
        message: &[u8],
        secret: &OwnerSecret,
        ring: &[OwnerKey],
        signer_index: usize,
        rng: &mut R,
    ) -> Result<RingSignature> {
        let n = ring.len();
        if n < 2 {
            return Err(PoolError::InvalidRing("ring needs at least two members".into()));
        }
        if signer_index >= n || ring[signer_index] != secret.public_key() {
            return Err(PoolError::InvalidRing("signer key is not at the signer index".into()));
        }

        let points = decompress_ring(ring)?;
        let hashed: Vec<RistrettoPoint> = ring.iter().map(hash_to_point).collect();
        let x = secret.0;
        let image = x * hashed[signer_index];
        let key_image = KeyImage(image.compress().to_bytes());
        let base = base_transcript(message, ring, &key_image);

        let mut c = vec![Scalar::ZERO; n];
        let mut s = vec![Scalar::ZERO; n];

        let alpha = Scalar::random(rng);
        let mut i = (signer_index + 1) % n;
        c[i] = challenge(&base, &(alpha * G), &(alpha * hashed[signer_index]));

        while i != signer_index {
            s[i] = Scalar::random(rng);
            let l = s[i] * G + c[i] * points[i];
            let r = s[i] * hashed[i] + c[i] * image;
            let next = (i + 1) % n;
            c[next] = challenge(&base, &l, &r);
            i = next;
        }
        s[signer_index] = alpha - c[signer_index] * x;

        Ok(RingSignature {
            challenge: c[0],
            responses: s,
            key_image,
        })
    }

    /// typed verification
    pub fn verify_signature(
        message: &[u8],
        signature: &RingSignature,
        ring: &[OwnerKey],
    ) -> Result<KeyImage> {
        let n = ring.len();
        if n < 2 {
            return Err(PoolError::InvalidRing("ring needs at least two members".into()));
        }
        if signature.ring_size() != n {
            return Err(PoolError::InvalidRing(format!(
                "signature covers {} members, ring has {}",
                signature.ring_size(),
                n
            )));
        }

        let points = decompress_ring(ring)?;
        let image = CompressedRistretto(signature.key_image.0)
            .decompress()
            .ok_or_else(|| PoolError::InvalidRing("key image is not a ristretto point".into()))?;
        if image.is_identity() {
            return Err(PoolError::InvalidRing("key image is the identity".into()));
        }

        let base = base_transcript(message, ring, &signature.key_image);
        let mut c = signature.challenge;
        for (i, (point, s)) in points.iter().zip(&signature.responses).enumerate() {
            let l = RistrettoPoint::vartime_double_scalar_mul_basepoint(&c, point, s);
            let r = s * hash_to_point(&ring[i]) + c * image;
            c = challenge(&base, &l, &r);
        }

        if c == signature.challenge {
            Ok(signature.key_image)
        } else {
            Err(PoolError::InvalidSignature)
        }
    }
}

impl RingScheme for Lsag {
    fn verify(&self, message: &[u8], signature: &[u8], ring: &[OwnerKey]) -> Result<KeyImage> {
        let signature = RingSignature::from_bytes(signature)?;
        Self::verify_signature(message, &signature, ring)
    }
}

fn decompress_ring(ring: &[OwnerKey]) -> Result<Vec<RistrettoPoint>> {
    ring.iter()
        .map(|k| k.decompress().map_err(|e| PoolError::InvalidRing(e.to_string())))
        .collect()
}

fn base_transcript(message: &[u8], ring: &[OwnerKey], key_image: &KeyImage) -> Transcript {
    let mut t = Transcript::new(LSAG_DOMAIN);
    t.append_message(b"message", message);
    t.append_u64(b"ring-size", ring.len() as u64);
    for key in ring {
        t.append_message(b"ring-member", &key.0);
    }
    t.append_message(b"key-image", &key_image.0);
    t
}

fn challenge(base: &Transcript, l: &RistrettoPoint, r: &RistrettoPoint) -> Scalar {
    let mut t = base.clone();
    t.append_message(b"L", l.compress().as_bytes());
    t.append_message(b"R", r.compress().as_bytes());
    let mut wide = [0u8; 64];
    t.challenge_bytes(b"c", &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// key images seen by the gate, each bound to the digest of the message it signed
///
/// re-presenting the same (image, message) is allowed - the nullifier set
/// decides whether that is a double spend. the same image on a different
/// message is a double-sign.
#[derive(Clone, Debug, Default)]
pub struct KeyImageRegistry {
    seen: HashMap<KeyImage, [u8; 32]>,
}

impl KeyImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, image: &KeyImage, message_digest: &[u8; 32]) -> Result<()> {
        match self.seen.get(image) {
            Some(prev) if prev != message_digest => Err(PoolError::LinkedSignature),
            _ => Ok(()),
        }
    }

    pub fn record(&mut self, image: KeyImage, message_digest: [u8; 32]) -> Result<()> {
        self.check(&image, &message_digest)?;
        self.seen.insert(image, message_digest);
        Ok(())
    }

    /// forget an image whose spend was cancelled before settling
    pub fn release(&mut self, image: &KeyImage) -> bool {
        self.seen.remove(image).is_some()
    }

    pub fn contains(&self, image: &KeyImage) -> bool {
        self.seen.contains_key(image)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn ring_of(rng: &mut StdRng, k: usize) -> (Vec<OwnerSecret>, Vec<OwnerKey>) {
        let secrets: Vec<_> = (0..k).map(|_| OwnerSecret::random(rng)).collect();
        let keys = secrets.iter().map(OwnerSecret::public_key).collect();
        (secrets, keys)
    }

    #[test]
    fn test_sign_verify_every_position() {
        let mut rng = StdRng::seed_from_u64(1);
        let (secrets, ring) = ring_of(&mut rng, 5);
        for (pi, secret) in secrets.iter().enumerate() {
            let sig = Lsag::sign(b"spend", secret, &ring, pi, &mut rng).unwrap();
            let image = Lsag::verify_signature(b"spend", &sig, &ring).unwrap();
            assert_eq!(image, secret.key_image());
        }
    }

    #[test]
    fn test_rejects_wrong_message_and_ring() {
        let mut rng = StdRng::seed_from_u64(2);
        let (secrets, ring) = ring_of(&mut rng, 4);
        let sig = Lsag::sign(b"m1", &secrets[2], &ring, 2, &mut rng).unwrap();

        assert_eq!(
            Lsag::verify_signature(b"m2", &sig, &ring),
            Err(PoolError::InvalidSignature)
        );

        let mut swapped = ring.clone();
        swapped.swap(0, 1);
        assert!(Lsag::verify_signature(b"m1", &sig, &swapped).is_err());

        let (_, other) = ring_of(&mut rng, 4);
        assert!(Lsag::verify_signature(b"m1", &sig, &other).is_err());
    }

    #[test]
    fn test_signer_must_be_in_ring() {
        let mut rng = StdRng::seed_from_u64(3);
        let (_, ring) = ring_of(&mut rng, 3);
        let outsider = OwnerSecret::random(&mut rng);
        assert!(matches!(
            Lsag::sign(b"m", &outsider, &ring, 0, &mut rng),
            Err(PoolError::InvalidRing(_))
        ));
    }

    #[test]
    fn test_key_image_links_across_rings() {
        let mut rng = StdRng::seed_from_u64(4);
        let (secrets, ring_a) = ring_of(&mut rng, 3);
        let (_, mut ring_b) = ring_of(&mut rng, 3);
        ring_b[1] = ring_a[0];

        let a = Lsag::sign(b"a", &secrets[0], &ring_a, 0, &mut rng).unwrap();
        let b = Lsag::sign(b"b", &secrets[0], &ring_b, 1, &mut rng).unwrap();
        assert_eq!(a.key_image, b.key_image);
    }

    #[test]
    fn test_tampered_response_fails() {
        let mut rng = StdRng::seed_from_u64(5);
        let (secrets, ring) = ring_of(&mut rng, 4);
        let mut sig = Lsag::sign(b"m", &secrets[1], &ring, 1, &mut rng).unwrap();
        sig.responses[3] += Scalar::ONE;
        assert_eq!(Lsag::verify_signature(b"m", &sig, &ring), Err(PoolError::InvalidSignature));
    }

    #[test]
    fn test_wire_encoding_linear_in_ring_size() {
        let mut rng = StdRng::seed_from_u64(6);
        for k in [2usize, 5, 11] {
            let (secrets, ring) = ring_of(&mut rng, k);
            let sig = Lsag::sign(b"m", &secrets[0], &ring, 0, &mut rng).unwrap();
            let bytes = sig.to_bytes();
            assert_eq!(bytes.len(), RingSignature::encoded_len(k));
            assert_eq!(Lsag.verify(b"m", &bytes, &ring).unwrap(), secrets[0].key_image());
        }
        assert!(RingSignature::from_bytes(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_registry_detects_double_sign() {
        let mut registry = KeyImageRegistry::new();
        let image = KeyImage([7u8; 32]);
        registry.record(image, [1u8; 32]).unwrap();

        // same message again is not a link
        assert!(registry.check(&image, &[1u8; 32]).is_ok());
        assert_eq!(registry.record(image, [2u8; 32]), Err(PoolError::LinkedSignature));

        assert!(registry.release(&image));
        assert!(registry.record(image, [2u8; 32]).is_ok());
    }
}
