//! nullifier set - the double-spend defense
//!
//! a nullifier is either reserved (withdrawal waiting out its timelock) or
//! spent. both count as spent for every check; only a reservation can be
//! released, and spent entries are never removed.
//!
//! callers serialize writes (the settlement gate holds its state lock), so
//! check-and-insert here is atomic with respect to every other writer.

use std::collections::HashMap;

use crate::codec::NullifierHash;
use crate::error::{PoolError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullifierState {
    /// held by a pending withdrawal
    Reserved,
    /// final
    Spent,
}

#[derive(Clone, Debug, Default)]
pub struct NullifierSet {
    entries: HashMap<NullifierHash, NullifierState>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// check-and-insert as spent
    pub fn mark_spent(&mut self, hash: NullifierHash) -> Result<()> {
        self.insert(hash, NullifierState::Spent)
    }

    /// check-and-insert as reserved
    pub fn reserve(&mut self, hash: NullifierHash) -> Result<()> {
        self.insert(hash, NullifierState::Reserved)
    }

    fn insert(&mut self, hash: NullifierHash, state: NullifierState) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.entries.entry(hash) {
            Entry::Occupied(_) => Err(PoolError::AlreadySpent),
            Entry::Vacant(v) => {
                v.insert(state);
                Ok(())
            }
        }
    }

    /// reserved -> spent
    pub fn finalize(&mut self, hash: &NullifierHash) -> Result<()> {
        let state = self.entries.get_mut(hash).ok_or(PoolError::AlreadyResolved)?;
        match *state {
            NullifierState::Reserved => {
                *state = NullifierState::Spent;
                Ok(())
            }
            NullifierState::Spent => Err(PoolError::AlreadySpent),
        }
    }

    /// drop a reservation; returns false for spent or unknown entries
    pub fn release(&mut self, hash: &NullifierHash) -> bool {
        if self.entries.get(hash) == Some(&NullifierState::Reserved) {
            self.entries.remove(hash);
            true
        } else {
            false
        }
    }

    pub fn is_spent(&self, hash: &NullifierHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn state(&self, hash: &NullifierHash) -> Option<NullifierState> {
        self.entries.get(hash).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
