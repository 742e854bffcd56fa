//! point arena
//!
//! every minted point is an immutable record appended in insertion order.
//! nothing here knows whether a point is spent - spendability is a join
//! against the nullifier set, done by whoever holds the secret.
//!
//! the selector reads [`PoolSnapshot`]s, cloned under a short read lock so a
//! snapshot never observes half an insert and never waits on proof checks.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::codec::{Commitment, PointId};
use crate::error::{PoolError, Result};
use crate::ring::OwnerKey;

/// public metadata of one point
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointRecord {
    pub id: PointId,
    pub commitment: Commitment,
    /// one-time ring key, never a wallet address
    pub owner: OwnerKey,
    pub mass: f64,
    /// clock seconds at mint
    pub created_at: u64,
    pub leaf_index: u64,
}

#[derive(Default)]
struct ArenaInner {
    records: Vec<PointRecord>,
    by_id: HashMap<PointId, usize>,
    by_owner: HashMap<OwnerKey, usize>,
    by_commitment: HashMap<Commitment, usize>,
}

#[derive(Default)]
pub struct PointArena {
    inner: RwLock<ArenaInner>,
}

impl PointArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// append a record; commitments and owner keys are unique
    pub fn push(&self, record: PointRecord) -> Result<usize> {
        let mut inner = self.inner.write();
        if inner.by_commitment.contains_key(&record.commitment) {
            return Err(PoolError::DuplicateCommitment);
        }
        if inner.by_owner.contains_key(&record.owner) {
            return Err(PoolError::DuplicateOwner);
        }

        let pos = inner.records.len();
        inner.by_id.insert(record.id, pos);
        inner.by_owner.insert(record.owner, pos);
        inner.by_commitment.insert(record.commitment, pos);
        inner.records.push(record);
        Ok(pos)
    }

    pub fn contains_commitment(&self, commitment: &Commitment) -> bool {
        self.inner.read().by_commitment.contains_key(commitment)
    }

    pub fn contains_owner(&self, owner: &OwnerKey) -> bool {
        self.inner.read().by_owner.contains_key(owner)
    }

    pub fn get(&self, id: &PointId) -> Option<PointRecord> {
        let inner = self.inner.read();
        inner.by_id.get(id).map(|pos| inner.records[*pos])
    }

    pub fn by_owner(&self, owner: &OwnerKey) -> Option<PointRecord> {
        let inner = self.inner.read();
        inner.by_owner.get(owner).map(|pos| inner.records[*pos])
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// consistent copy of every record, stamped with `now`
    pub fn snapshot(&self, now: u64) -> PoolSnapshot {
        let records = self.inner.read().records.clone();
        PoolSnapshot {
            records,
            taken_at: now,
        }
    }
}

/// point-in-time view of the arena
#[derive(Clone, Debug)]
pub struct PoolSnapshot {
    records: Vec<PointRecord>,
    taken_at: u64,
}

impl PoolSnapshot {
    /// snapshot over explicit records, for replaying a selection
    pub fn from_records(records: Vec<PointRecord>, taken_at: u64) -> Self {
        Self { records, taken_at }
    }

    pub fn records(&self) -> &[PointRecord] {
        &self.records
    }

    pub fn taken_at(&self) -> u64 {
        self.taken_at
    }

    pub fn get(&self, id: &PointId) -> Option<&PointRecord> {
        self.records.iter().find(|r| r.id == *id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
