//! error types for gravity-pool

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    // === codec ===
    #[error("value is not a canonical field element")]
    InvalidScalar,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    // === accumulator / nullifiers ===
    #[error("commitment tree is full ({capacity} leaves)")]
    TreeFull { capacity: u64 },

    #[error("no leaf at index {index}")]
    UnknownLeaf { index: u64 },

    #[error("nullifier already spent")]
    AlreadySpent,

    #[error("commitment already deposited")]
    DuplicateCommitment,

    #[error("owner key already bound to a point")]
    DuplicateOwner,

    // === decoys / rings ===
    #[error("insufficient pool: {eligible} eligible decoys, ring needs {needed}")]
    InsufficientPool { eligible: usize, needed: usize },

    #[error("invalid ring: {0}")]
    InvalidRing(String),

    #[error("ring signature does not verify")]
    InvalidSignature,

    #[error("key image already signed a different message")]
    LinkedSignature,

    // === proof gate ===
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("root is not within the accepted root history")]
    RootMismatch,

    #[error("fees {fees} exceed the denomination {unit}")]
    FeeExceedsDenomination { fees: u64, unit: u64 },

    #[error("transfers carry no fee or refund, got {fees}")]
    TransferFee { fees: u64 },

    // === withdrawals ===
    #[error("withdrawal still locked until {unlock_at}")]
    StillLocked { unlock_at: u64 },

    #[error("withdrawal already resolved")]
    AlreadyResolved,

    #[error("unknown withdrawal")]
    UnknownWithdrawal,

    #[error("cancel not signed by the requester")]
    UnauthorizedCancel,

    #[error("withdrawal paused by monitor")]
    WithdrawalPaused,

    // === settlement ===
    #[error("treasury invariant violated: expected {expected} collateral, ledger holds {held}")]
    InvariantViolation { expected: u128, held: u128 },

    #[error("settlement halted pending reconciliation")]
    Halted,

    #[error("settlement paused by operator")]
    Paused,

    #[error("ledger error: {0}")]
    Ledger(String),

    // === setup ===
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("io error: {0}")]
    Io(String),
}

impl PoolError {
    /// only a treasury drift stops the gate
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }

    /// losing side of a race between honest concurrent requests
    pub fn is_expected_race(&self) -> bool {
        matches!(self, Self::AlreadySpent | Self::AlreadyResolved)
    }
}

impl From<std::io::Error> for PoolError {
    fn from(e: std::io::Error) -> Self {
        PoolError::Io(e.to_string())
    }
}

impl From<ark_serialize::SerializationError> for PoolError {
    fn from(e: ark_serialize::SerializationError) -> Self {
        PoolError::InvalidEncoding(e.to_string())
    }
}
