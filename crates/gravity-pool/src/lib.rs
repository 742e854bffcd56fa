//! gravity pool
//!
//! fixed-denomination anonymity pool: deposit collateral to mint points,
//! transfer them privately, redeem them after a timelock
//!
//! # architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SETTLEMENT GATE                         │
//! │     deposit / spend / request → cancel | complete withdraw   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  pure, parallel                 serialized (one mutex)       │
//! │  ├─ proof gate (groth16)        ├─ key image registry        │
//! │  │   root ∈ history window      ├─ nullifier set             │
//! │  └─ ring verifier (lsag)        ├─ merkle accumulator        │
//! │                                 └─ treasury ⇄ ledger         │
//! │                                                              │
//! │  snapshot reads (rwlock)                                     │
//! │  └─ point arena → gravity-weighted decoy selector           │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                   commitment codec (mimc-5 over bn254)
//! ```
//!
//! # lifecycle
//!
//! - **deposit**: `C = H(unit, secret)` enters the tree, one point minted
//! - **transfer**: prove membership + nullifier, sign with a ring of k
//!   owner keys; the nullifier is recorded and the output commitment minted
//! - **withdraw**: same proof, nullifier reserved for 24h, then collateral
//!   released to the recipient minus fees
//!
//! spends are always consume-old/produce-new. a point's commitment stays in
//! the tree forever and keeps proving membership; the nullifier set alone
//! decides spendability.

pub mod circuit;
pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod field;
pub mod merkle;
pub mod note;
pub mod nullifier;
pub mod pool;
pub mod ring;
pub mod selector;
pub mod settlement;
pub mod treasury;
pub mod verifier;

pub use circuit::{SpendCircuit, SpendWitness};
pub use client::{build_transfer, build_withdrawal, sign_cancel, Payout};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{commit, derive_nullifier, point_id, Commitment, NullifierHash, PointId, Root};
pub use config::{PoolConfig, WITHDRAWAL_TIMELOCK_SECS};
pub use error::{PoolError, Result};
pub use field::FieldElement;
pub use merkle::{verify_membership, MerkleProof, MerkleTree};
pub use note::PointNote;
pub use nullifier::NullifierSet;
pub use pool::{PointArena, PointRecord, PoolSnapshot};
pub use ring::{KeyImage, KeyImageRegistry, Lsag, OwnerKey, OwnerSecret, RingScheme, RingSignature};
pub use selector::{GravitySelector, RingSelection, SelectionSeed};
pub use settlement::{
    cancel_message, DepositRequest, FeeRates, GateStatus, SettlementGate, SpendOutcome,
    SpendRequest, SpendStage, WithdrawalId, WithdrawalOutcome, WithdrawalReceipt, WithdrawalRecord,
    WithdrawalRequest,
};
pub use treasury::{CollateralLedger, MemoryLedger, Treasury};
pub use verifier::{Groth16Verifier, ProofGate, ProofVerifier, PublicInputs};

/// reference gravity constant; deployments set their own
pub const REFERENCE_GRAVITY: f64 = 9.81;
