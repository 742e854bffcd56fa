//! bn254 scalar field elements and their wire encoding
//!
//! every commitment, nullifier, root and public input travels as a
//! 32-byte big-endian integer that must be strictly below the modulus

use core::fmt;

use ark_bn254::Fr;
use ark_ff::{BigInt, BigInteger, PrimeField};

use crate::error::{PoolError, Result};

/// width of the encoding in bytes
pub const FIELD_BYTES: usize = 32;

/// canonical element of the bn254 scalar field
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldElement(pub Fr);

impl FieldElement {
    pub fn new(inner: Fr) -> Self {
        Self(inner)
    }

    pub fn from_u64(v: u64) -> Self {
        Self(Fr::from(v))
    }

    /// decode big-endian bytes, shorter inputs are left-padded
    ///
    /// address-like values go through here unchanged, so anything up to
    /// 31 bytes always decodes and 32-byte values must be canonical
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FIELD_BYTES {
            return Err(PoolError::InvalidScalar);
        }
        let mut buf = [0u8; FIELD_BYTES];
        buf[FIELD_BYTES - bytes.len()..].copy_from_slice(bytes);

        let mut limbs = [0u64; 4];
        for (limb, chunk) in limbs.iter_mut().zip(buf.rchunks(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *limb = u64::from_be_bytes(word);
        }

        Fr::from_bigint(BigInt::new(limbs))
            .map(Self)
            .ok_or(PoolError::InvalidScalar)
    }

    pub fn to_be_bytes(&self) -> [u8; FIELD_BYTES] {
        let bytes = self.0.into_bigint().to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        out[FIELD_BYTES - bytes.len()..].copy_from_slice(&bytes);
        out
    }

    /// decode a hex string (with or without 0x prefix)
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| PoolError::InvalidEncoding(e.to_string()))?;
        Self::from_be_bytes(&bytes)
    }

    /// value as u64 if it fits
    pub fn to_u64(&self) -> Option<u64> {
        let bytes = self.to_be_bytes();
        if bytes[..FIELD_BYTES - 8].iter().any(|b| *b != 0) {
            return None;
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[FIELD_BYTES - 8..]);
        Some(u64::from_be_bytes(word))
    }

    pub fn inner(&self) -> Fr {
        self.0
    }
}

impl From<Fr> for FieldElement {
    fn from(f: Fr) -> Self {
        Self(f)
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_be_bytes();
        write!(f, "Fe({}..)", hex::encode(&bytes[..6]))
    }
}

/// typed wrapper over a field element sharing the same wire encoding
macro_rules! field_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $crate::field::FieldElement);

        impl $name {
            pub fn to_bytes(&self) -> [u8; $crate::field::FIELD_BYTES] {
                self.0.to_be_bytes()
            }

            pub fn from_bytes(bytes: &[u8]) -> $crate::error::Result<Self> {
                $crate::field::FieldElement::from_be_bytes(bytes).map(Self)
            }

            pub fn inner(&self) -> ark_bn254::Fr {
                self.0 .0
            }
        }

        impl From<ark_bn254::Fr> for $name {
            fn from(f: ark_bn254::Fr) -> Self {
                Self($crate::field::FieldElement(f))
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let bytes = self.0.to_be_bytes();
                write!(f, "{}({}..)", stringify!($name), hex::encode(&bytes[..6]))
            }
        }
    };
}

pub(crate) use field_newtype;

#[cfg(test)]
mod tests {
    use super::*;

    // r = 21888242871839275222246405745257275088548364400416034343698204186575808495617
    const MODULUS_BE: &str = "30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001";

    #[test]
    fn test_be_roundtrip() {
        let fe = FieldElement::from_u64(0xdead_beef);
        let bytes = fe.to_be_bytes();
        assert_eq!(&bytes[28..], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(FieldElement::from_be_bytes(&bytes).unwrap(), fe);
        assert_eq!(fe.to_u64(), Some(0xdead_beef));
    }

    #[test]
    fn test_short_input_left_padded() {
        let addr = [0xabu8; 20];
        let fe = FieldElement::from_be_bytes(&addr).unwrap();
        let bytes = fe.to_be_bytes();
        assert_eq!(&bytes[..12], &[0u8; 12]);
        assert_eq!(&bytes[12..], &addr);
    }

    #[test]
    fn test_rejects_non_canonical() {
        let modulus = hex::decode(MODULUS_BE).unwrap();
        assert_eq!(FieldElement::from_be_bytes(&modulus), Err(PoolError::InvalidScalar));
        assert_eq!(FieldElement::from_be_bytes(&[0xff; 32]), Err(PoolError::InvalidScalar));
        assert_eq!(FieldElement::from_be_bytes(&[0u8; 33]), Err(PoolError::InvalidScalar));

        // modulus - 1 is the largest canonical value
        let mut below = modulus.clone();
        below[31] -= 1;
        assert!(FieldElement::from_be_bytes(&below).is_ok());
    }

    #[test]
    fn test_hex() {
        let fe = FieldElement::from_u64(255);
        let s = fe.to_string();
        assert!(s.ends_with("ff"));
        assert_eq!(FieldElement::from_hex(&s).unwrap(), fe);
        assert!(FieldElement::from_hex("zz").is_err());
    }
}
