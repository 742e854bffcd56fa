//! gravity-weighted decoy selection
//!
//! ```text
//! weight(p, now) = mass(p) * sqrt(now - created_at(p) + 1) * G
//! ```
//!
//! decoys are drawn without replacement, each with probability proportional
//! to its weight among the eligible points still in the draw. the spender is
//! never drawn; it is inserted afterwards at a uniformly random position.
//!
//! all randomness comes from a chacha20 stream keyed by a 32-byte seed, so
//! (snapshot, seed) reproduces the ring exactly. seeds come from the os rng
//! or from an unpredictable beacon the caller does not control.

use std::collections::HashSet;

use rand::distributions::{Distribution, WeightedIndex};
use rand::{rngs::OsRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::codec::PointId;
use crate::error::{PoolError, Result};
use crate::pool::{PointRecord, PoolSnapshot};
use crate::ring::OwnerKey;

/// blake3 derive-key context for beacon seeds
const SEED_CONTEXT: &str = "gravity-pool 2024 decoy selection seed v1";

/// 32-byte selection seed
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SelectionSeed(pub [u8; 32]);

impl SelectionSeed {
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self(seed)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// seed from public unpredictable state (e.g. a block hash) and a
    /// per-spend context, replayable by anyone holding both
    pub fn derive(beacon: &[u8], context: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(SEED_CONTEXT);
        hasher.update(&(beacon.len() as u64).to_le_bytes());
        hasher.update(beacon);
        hasher.update(context);
        Self(*hasher.finalize().as_bytes())
    }
}

impl core::fmt::Debug for SelectionSeed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SelectionSeed({})", hex::encode(self.0))
    }
}

/// a ring ready for signing: spender at `signer_index`
#[derive(Clone, Debug, PartialEq)]
pub struct RingSelection {
    pub members: Vec<PointRecord>,
    pub signer_index: usize,
}

impl RingSelection {
    pub fn owner_keys(&self) -> Vec<OwnerKey> {
        self.members.iter().map(|m| m.owner).collect()
    }

    pub fn ids(&self) -> Vec<PointId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GravitySelector {
    ring_size: usize,
    gravity_constant: f64,
}

impl GravitySelector {
    pub fn new(ring_size: usize, gravity_constant: f64) -> Result<Self> {
        if ring_size < 2 {
            return Err(PoolError::InvalidConfig(format!(
                "ring size {} leaves no room for decoys",
                ring_size
            )));
        }
        if !gravity_constant.is_finite() || gravity_constant <= 0.0 {
            return Err(PoolError::InvalidConfig(format!(
                "gravity constant {} must be finite and positive",
                gravity_constant
            )));
        }
        Ok(Self {
            ring_size,
            gravity_constant,
        })
    }

    pub fn ring_size(&self) -> usize {
        self.ring_size
    }

    pub fn weight(&self, point: &PointRecord, now: u64) -> f64 {
        let age = now.saturating_sub(point.created_at) as f64;
        point.mass * (age + 1.0).sqrt() * self.gravity_constant
    }

    /// draw `ring_size - 1` decoys for `spender` from `snapshot`
    ///
    /// `excluded` holds points the caller knows to be spent; the selector
    /// cannot see that join itself
    pub fn select(
        &self,
        snapshot: &PoolSnapshot,
        spender: &PointId,
        excluded: &HashSet<PointId>,
        seed: &SelectionSeed,
    ) -> Result<RingSelection> {
        let spender = *snapshot
            .get(spender)
            .ok_or_else(|| PoolError::InvalidRing("spender is not in the pool snapshot".into()))?;

        let now = snapshot.taken_at();
        let needed = self.ring_size - 1;

        let (candidates, weights): (Vec<&PointRecord>, Vec<f64>) = snapshot
            .records()
            .iter()
            .filter(|r| r.id != spender.id && !excluded.contains(&r.id))
            .map(|r| (r, self.weight(r, now)))
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .unzip();

        if candidates.len() < needed {
            return Err(PoolError::InsufficientPool {
                eligible: candidates.len(),
                needed,
            });
        }

        let mut rng = ChaCha20Rng::from_seed(seed.0);
        let mut dist = WeightedIndex::new(&weights).map_err(|_| PoolError::InsufficientPool {
            eligible: 0,
            needed,
        })?;

        let mut members = Vec::with_capacity(self.ring_size);
        for n in 0..needed {
            let pick = dist.sample(&mut rng);
            members.push(*candidates[pick]);
            // the last draw may exhaust the pool, which WeightedIndex rejects
            if n + 1 < needed {
                dist.update_weights(&[(pick, &0.0)])
                    .map_err(|_| PoolError::InsufficientPool {
                        eligible: n + 1,
                        needed,
                    })?;
            }
        }

        let signer_index = rng.gen_range(0..self.ring_size);
        members.insert(signer_index, spender);

        Ok(RingSelection {
            members,
            signer_index,
        })
    }
}
