//! deployment configuration
//!
//! the anonymity parameters (ring size, gravity constant) are deployment
//! choices, not literals: every field can be set from toml and the whole
//! config is validated before a gate is built.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PoolError, Result};
use crate::merkle::MAX_DEPTH;

/// seconds a withdrawal waits between request and release
pub const WITHDRAWAL_TIMELOCK_SECS: u64 = 86_400;

/// upper bound for either fee rate
pub const MAX_FEE_BPS: u16 = 500;

/// smallest tree accepted for a deployment
pub const MIN_TREE_DEPTH: usize = 4;

/// largest ring accepted for a deployment
pub const MAX_RING_SIZE: usize = 128;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// collateral per point
    pub unit_value: u64,
    /// merkle depth, capacity 2^depth
    pub tree_depth: usize,
    /// roots a proof may be built against
    pub root_history_size: usize,
    /// protocol-wide, every ring has exactly this many members
    pub ring_size: usize,
    pub gravity_constant: f64,
    /// mass assigned to freshly minted points
    pub default_mass: f64,
    /// charged on top of the unit at deposit
    pub deposit_fee_bps: u16,
    /// taken from the unit at withdrawal
    pub withdrawal_fee_bps: u16,
    /// compressed groth16 verifying key
    pub verifying_key: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            unit_value: 10,
            tree_depth: 20,
            root_history_size: 100,
            ring_size: 11,
            gravity_constant: 9.81,
            default_mass: 1.0,
            deposit_fee_bps: 0,
            withdrawal_fee_bps: 0,
            verifying_key: None,
        }
    }
}

impl PoolConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| PoolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        info!(
            path = %path.display(),
            depth = config.tree_depth,
            ring_size = config.ring_size,
            unit = config.unit_value,
            "loaded pool config"
        );
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PoolError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.unit_value == 0 {
            return Err(invalid("unit_value must be positive"));
        }
        if !(MIN_TREE_DEPTH..=MAX_DEPTH).contains(&self.tree_depth) {
            return Err(invalid(format!(
                "tree_depth {} outside {}..={}",
                self.tree_depth, MIN_TREE_DEPTH, MAX_DEPTH
            )));
        }
        if self.root_history_size == 0 {
            return Err(invalid("root_history_size must be at least 1"));
        }
        if !(2..=MAX_RING_SIZE).contains(&self.ring_size) {
            return Err(invalid(format!(
                "ring_size {} outside 2..={}",
                self.ring_size, MAX_RING_SIZE
            )));
        }
        if !self.gravity_constant.is_finite() || self.gravity_constant <= 0.0 {
            return Err(invalid("gravity_constant must be finite and positive"));
        }
        if !self.default_mass.is_finite() || self.default_mass <= 0.0 {
            return Err(invalid("default_mass must be finite and positive"));
        }
        if self.deposit_fee_bps > MAX_FEE_BPS || self.withdrawal_fee_bps > MAX_FEE_BPS {
            return Err(invalid(format!("fee rates are capped at {} bps", MAX_FEE_BPS)));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> PoolError {
    PoolError::InvalidConfig(msg.into())
}
