//! # ember-engine
//!
//! Reward accrual engine for lending markets and the vaults built on them.
//!
//! Every balance-changing operation runs inside a [`store::Ledger`]: the
//! epoch directory is synced, the market index is caught up through any
//! elapsed epochs, the participant's checkpoints are settled against the
//! fresh indices and only then is the share delta applied. Vault share
//! changes additionally settle the vault's own market positions and fold the
//! result into a vault-scoped index shared by its depositors.
//!
//! ## Modules
//!
//! - [`accrual`]: Index advance and settlement arithmetic shared by every level
//! - [`epochs`]: Epoch directory: lookups, sync and schedule configuration
//! - [`market`]: Market catch-up through elapsed epochs
//! - [`streams`]: Continuous annualized reward streams
//! - [`settlement`]: Position settlement and share deltas
//! - [`vault`]: Cascading settlement of vault rewards to depositors
//! - [`engine`]: The [`Engine`] facade
//! - [`report`]: Accrued-rewards report
//! - [`store`]: Storage port, in-memory store and unit of work

pub mod accrual;
pub mod engine;
pub mod epochs;
pub mod market;
pub mod report;
pub mod settlement;
pub mod store;
pub mod streams;
pub mod vault;

pub use engine::{Batch, Engine, EngineConfig, RateConfig};
pub use store::{Ledger, MemoryStore, Store, StoreError, Write};
pub use streams::{CollateralGate, ProgramKey};

use ember_types::{Side, Timestamp};

/// Errors that abort an engine operation. No write of the operation is kept.
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// A referenced record does not exist.
    #[error("missing {kind} {key}")]
    MissingEntity {
        /// Record family.
        kind: &'static str,
        /// Record key.
        key: String,
    },

    /// An operation carried a timestamp earlier than one already processed.
    #[error("timestamp {now} precedes last processed timestamp {last}")]
    TimeRegression {
        /// Last processed timestamp.
        last: Timestamp,
        /// Offending timestamp.
        now: Timestamp,
    },

    /// An accrual window ends before it starts.
    #[error("negative duration in {context}: from {from} to {to}")]
    NegativeDuration {
        /// What was being accrued.
        context: &'static str,
        /// Window start.
        from: Timestamp,
        /// Window end.
        to: Timestamp,
    },

    /// An epoch was configured to start before the engine clock.
    #[error("epoch starting at {start} is already under way at {now}")]
    EpochAlreadyStarted {
        /// Requested start.
        start: Timestamp,
        /// Engine clock.
        now: Timestamp,
    },

    /// An epoch window is empty or inverted.
    #[error("invalid epoch window [{start}, {end})")]
    InvalidEpochWindow {
        /// Requested start.
        start: Timestamp,
        /// Requested end.
        end: Timestamp,
    },

    /// An epoch overlaps the last configured epoch.
    #[error("epoch starting at {start} overlaps epoch {tail} ending at {tail_end}")]
    EpochOverlap {
        /// Requested start.
        start: Timestamp,
        /// Id of the last configured epoch.
        tail: u64,
        /// End of the last configured epoch.
        tail_end: Timestamp,
    },

    /// Fee shares were minted but no fee recipient was ever set.
    #[error("fee shares minted on {target} without a fee recipient")]
    MissingFeeRecipient {
        /// Market id or vault address.
        target: String,
    },

    /// A decrease exceeds the stake it applies to.
    #[error("{side} shares of {holder} would drop below zero: held {held}, removing {removed}")]
    ShareUnderflow {
        /// Position or vault holder.
        holder: String,
        /// Side the delta applies to.
        side: Side,
        /// Shares held before the delta.
        held: u128,
        /// Shares removed.
        removed: u128,
    },

    /// Arithmetic overflow in accrual computation.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    /// Persisted state contradicts itself.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Storage backend failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A persisted record could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AccrualError>;
