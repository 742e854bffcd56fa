//! collateral backing
//!
//! `outstanding_points * unit_value == collateral_held` at every committed
//! state. the ledger is external; the gate only moves collateral through the
//! [`CollateralLedger`] seam and re-checks the equality after each mint and
//! burn.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{PoolError, Result};
use crate::field::FieldElement;

/// custody of collateral and protocol fees
pub trait CollateralLedger: Send + Sync {
    /// collateral currently backing points, fee account excluded
    fn collateral_held(&self) -> u128;

    /// take `amount` into collateral
    fn lock(&self, amount: u64) -> Result<()>;

    /// pay `amount` out of collateral to `payee`
    fn release(&self, payee: &FieldElement, amount: u64) -> Result<()>;

    /// move `amount` out of collateral into the fee account
    fn collect_fee(&self, amount: u64) -> Result<()>;
}

#[derive(Debug, Default)]
struct LedgerState {
    collateral: u128,
    fees: u128,
    paid: HashMap<FieldElement, u128>,
}

/// in-process ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fees_collected(&self) -> u128 {
        self.state.lock().fees
    }

    pub fn paid_to(&self, payee: &FieldElement) -> u128 {
        self.state.lock().paid.get(payee).copied().unwrap_or(0)
    }

    /// remove collateral behind the gate's back; models custody loss
    pub fn force_debit(&self, amount: u64) {
        let mut state = self.state.lock();
        state.collateral = state.collateral.saturating_sub(amount as u128);
    }

    fn debit(state: &mut LedgerState, amount: u64) -> Result<()> {
        state.collateral = state
            .collateral
            .checked_sub(amount as u128)
            .ok_or_else(|| PoolError::Ledger(format!("insufficient collateral for {}", amount)))?;
        Ok(())
    }
}

impl CollateralLedger for MemoryLedger {
    fn collateral_held(&self) -> u128 {
        self.state.lock().collateral
    }

    fn lock(&self, amount: u64) -> Result<()> {
        self.state.lock().collateral += amount as u128;
        Ok(())
    }

    fn release(&self, payee: &FieldElement, amount: u64) -> Result<()> {
        let mut state = self.state.lock();
        Self::debit(&mut state, amount)?;
        *state.paid.entry(*payee).or_default() += amount as u128;
        Ok(())
    }

    fn collect_fee(&self, amount: u64) -> Result<()> {
        let mut state = self.state.lock();
        Self::debit(&mut state, amount)?;
        state.fees += amount as u128;
        Ok(())
    }
}

/// point supply on the gate's side of the invariant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Treasury {
    outstanding_points: u64,
    unit_value: u64,
}

impl Treasury {
    pub fn new(unit_value: u64) -> Self {
        Self {
            outstanding_points: 0,
            unit_value,
        }
    }

    pub fn outstanding_points(&self) -> u64 {
        self.outstanding_points
    }

    pub fn unit_value(&self) -> u64 {
        self.unit_value
    }

    pub fn expected_collateral(&self) -> u128 {
        self.outstanding_points as u128 * self.unit_value as u128
    }

    pub fn mint(&mut self) {
        self.outstanding_points += 1;
    }

    pub fn burn(&mut self) {
        self.outstanding_points = self.outstanding_points.saturating_sub(1);
    }

    pub fn check(&self, ledger: &dyn CollateralLedger) -> Result<()> {
        let expected = self.expected_collateral();
        let held = ledger.collateral_held();
        if expected == held {
            Ok(())
        } else {
            Err(PoolError::InvariantViolation { expected, held })
        }
    }
}

/// `amount * bps / 10_000`, rounded down
pub fn fee_for(amount: u64, bps: u16) -> u64 {
    (amount as u128 * bps as u128 / 10_000) as u64
}
