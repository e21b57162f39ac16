//! Persisted records of the accrual engine.
//!
//! Every record is created on first reference and never deleted. Records are
//! addressed by `(KIND, key)`; composite keys are derived with
//! [`crate::Id::derive`] over the identities they join.

use ember_crypto::contexts;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Address, Amount, BySide, Id, Index, Side, Timestamp, INITIAL_INDEX};

/// A record the engine can load and persist.
pub trait Entity: Serialize + DeserializeOwned + Clone {
    /// Record family name, used as the storage namespace.
    const KIND: &'static str;

    /// Storage key within [`Entity::KIND`].
    fn key(&self) -> String;
}

macro_rules! entity {
    ($ty:ty, $kind:literal, |$s:ident| $key:expr) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;

            fn key(&self) -> String {
                let $s = self;
                $key
            }
        }
    };
}

/// Key of a singleton record.
pub const SINGLETON_KEY: &str = "singleton";

// ---------------------------------------------------------------------------
// Composite keys
// ---------------------------------------------------------------------------

pub fn position_id(participant: &Address, market: &Id) -> Id {
    Id::derive(contexts::POSITION, &[participant.as_bytes(), market.as_bytes()])
}

pub fn market_epoch_id(market: &Id, epoch: u64) -> Id {
    Id::derive(contexts::MARKET_EPOCH, &[market.as_bytes(), &epoch.to_be_bytes()])
}

pub fn program_id(sender: &Address, reward_token: &Address, distributor: &Address) -> Id {
    Id::derive(
        contexts::REWARD_PROGRAM,
        &[sender.as_bytes(), reward_token.as_bytes(), distributor.as_bytes()],
    )
}

pub fn stream_id(program: &Id, market: &Id) -> Id {
    Id::derive(contexts::REWARD_STREAM, &[program.as_bytes(), market.as_bytes()])
}

/// Checkpoint of a position against a stream or a market epoch.
pub fn position_checkpoint_id(position: &Id, source: &Id) -> Id {
    Id::derive(
        contexts::POSITION_CHECKPOINT,
        &[position.as_bytes(), source.as_bytes()],
    )
}

pub fn program_accrual_id(participant: &Address, program: &Id) -> Id {
    Id::derive(
        contexts::PROGRAM_ACCRUAL,
        &[participant.as_bytes(), program.as_bytes()],
    )
}

pub fn vault_position_id(depositor: &Address, vault: &Address) -> Id {
    Id::derive(
        contexts::VAULT_POSITION,
        &[depositor.as_bytes(), vault.as_bytes()],
    )
}

pub fn vault_reward_checkpoint_id(vault: &Address, program: &Id) -> Id {
    Id::derive(
        contexts::VAULT_REWARD_CHECKPOINT,
        &[vault.as_bytes(), program.as_bytes()],
    )
}

pub fn vault_position_checkpoint_id(vault_position: &Id, program: &Id) -> Id {
    Id::derive(
        contexts::VAULT_POSITION_CHECKPOINT,
        &[vault_position.as_bytes(), program.as_bytes()],
    )
}

pub fn log_record_id(block: u64, log_index: u64) -> Id {
    Id(ember_crypto::blake3::log_id(block, log_index))
}

/// Reserved program under which epoch emissions are booked.
pub fn epoch_program_id() -> Id {
    Id::derive(contexts::EPOCH_PROGRAM, &[b"epochs"])
}

// ---------------------------------------------------------------------------
// Singletons
// ---------------------------------------------------------------------------

/// Head and tail of the linked epoch list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochDirectory {
    pub head: Option<u64>,
    pub tail: Option<u64>,
    pub count: u64,
    /// Epoch containing the last synced timestamp, if any.
    pub current: Option<u64>,
    /// Latest epoch started at or before the last synced timestamp.
    #[serde(default)]
    pub passed: Option<u64>,
}

entity!(EpochDirectory, "epoch_directory", |_s| SINGLETON_KEY.to_string());

/// Last timestamp processed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub last_timestamp: Timestamp,
}

entity!(Clock, "clock", |_s| SINGLETON_KEY.to_string());

/// Recipient of the lending protocol's interest fee shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecipient {
    pub recipient: Address,
}

entity!(FeeRecipient, "fee_recipient", |_s| SINGLETON_KEY.to_string());

// ---------------------------------------------------------------------------
// Epochs
// ---------------------------------------------------------------------------

/// A half-open window `[start, end)` with a flat per-market rate schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub id: u64,
    pub start: Timestamp,
    pub end: Timestamp,
    pub previous: Option<u64>,
    pub next: Option<u64>,
    /// Markets with a configured rate for this epoch.
    pub markets: Vec<Id>,
}

impl Epoch {
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }
}

entity!(Epoch, "epoch", |s| s.id.to_string());

/// Accrual state of one market during one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEpoch {
    pub id: Id,
    pub market: Id,
    pub epoch: u64,
    pub rate_per_second: Amount,
    /// Rewards credited to the supply index.
    pub total_accrued: Amount,
    /// Rewards emitted while the market had no supply.
    pub undistributed: Amount,
    pub global_index: Index,
    pub last_settled: Timestamp,
}

impl MarketEpoch {
    pub fn new(market: Id, epoch: &Epoch, rate_per_second: Amount) -> Self {
        Self {
            id: market_epoch_id(&market, epoch.id),
            market,
            epoch: epoch.id,
            rate_per_second,
            total_accrued: 0,
            undistributed: 0,
            global_index: INITIAL_INDEX,
            last_settled: epoch.start,
        }
    }
}

entity!(MarketEpoch, "market_epoch", |s| s.id.to_string());

// ---------------------------------------------------------------------------
// Markets and streams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: Id,
    pub loan_token: Address,
    pub collateral_token: Address,
    pub total_shares: BySide<Amount>,
    /// Last timestamp the epoch catch-up observed.
    pub last_check: Timestamp,
    /// Epoch whose accrual is in progress.
    pub current_epoch: Option<u64>,
    /// Most recent fully settled epoch, the resume point of the catch-up walk.
    pub last_epoch: Option<u64>,
    /// Sum of epoch rewards credited to this market.
    pub epoch_rewards_accrued: Amount,
    pub streams: Vec<Id>,
    pub created_at: Timestamp,
}

impl Market {
    pub fn new(id: Id, loan_token: Address, collateral_token: Address, now: Timestamp) -> Self {
        Self {
            id,
            loan_token,
            collateral_token,
            total_shares: BySide::default(),
            last_check: now,
            current_epoch: None,
            last_epoch: None,
            epoch_rewards_accrued: 0,
            streams: Vec::new(),
            created_at: now,
        }
    }
}

entity!(Market, "market", |s| s.id.to_string());

/// A reward emitter, identified by who funds it and what it pays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardProgram {
    pub id: Id,
    pub sender: Address,
    pub reward_token: Address,
    pub distributor: Address,
    pub markets: Vec<Id>,
}

entity!(RewardProgram, "reward_program", |s| s.id.to_string());

/// Continuous annualized emission of one program on one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardStream {
    pub id: Id,
    pub program: Id,
    pub market: Id,
    pub rate_per_year: BySide<Amount>,
    pub index: BySide<Index>,
    pub distributed: BySide<Amount>,
    pub last_update: Timestamp,
    /// When the current rates took effect.
    pub available_at: Timestamp,
}

impl RewardStream {
    pub fn new(program: Id, market: Id, now: Timestamp) -> Self {
        Self {
            id: stream_id(&program, &market),
            program,
            market,
            rate_per_year: BySide::default(),
            index: BySide::splat(INITIAL_INDEX),
            distributed: BySide::default(),
            last_update: now,
            available_at: now,
        }
    }
}

entity!(RewardStream, "reward_stream", |s| s.id.to_string());

// ---------------------------------------------------------------------------
// Participants and positions
// ---------------------------------------------------------------------------

/// Anyone holding market shares or vault shares. Vaults are participants too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: Address,
    /// Markets with a position.
    pub markets: Vec<Id>,
    /// Vaults with a deposit.
    pub vaults: Vec<Address>,
    /// Programs with a [`ProgramAccrual`] record.
    pub programs: Vec<Id>,
}

impl Participant {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            markets: Vec::new(),
            vaults: Vec::new(),
            programs: Vec::new(),
        }
    }
}

entity!(Participant, "participant", |s| s.address.to_string());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: Id,
    pub participant: Address,
    pub market: Id,
    pub shares: BySide<Amount>,
    pub last_settled: Timestamp,
    /// Earliest epoch that may still owe this position rewards.
    pub epoch_hint: Option<u64>,
}

impl Position {
    pub fn new(participant: Address, market: Id, now: Timestamp) -> Self {
        Self {
            id: position_id(&participant, &market),
            participant,
            market,
            shares: BySide::default(),
            last_settled: now,
            epoch_hint: None,
        }
    }
}

entity!(Position, "position", |s| s.id.to_string());

/// A position's last seen index on one stream or market epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCheckpoint {
    pub id: Id,
    pub position: Id,
    pub source: Id,
    pub last_index: BySide<Index>,
    pub accrued: BySide<Amount>,
}

impl PositionCheckpoint {
    pub fn new(position: Id, source: Id) -> Self {
        Self {
            id: position_checkpoint_id(&position, &source),
            position,
            source,
            last_index: BySide::splat(INITIAL_INDEX),
            accrued: BySide::default(),
        }
    }
}

entity!(PositionCheckpoint, "position_checkpoint", |s| s.id.to_string());

/// Running total a participant accrued from one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramAccrual {
    pub id: Id,
    pub participant: Address,
    pub program: Id,
    /// Accrued through the participant's own market positions.
    pub accrued: BySide<Amount>,
    /// Accrued through vault deposits.
    pub from_vaults: Amount,
}

impl ProgramAccrual {
    pub fn new(participant: Address, program: Id) -> Self {
        Self {
            id: program_accrual_id(&participant, &program),
            participant,
            program,
            accrued: BySide::default(),
            from_vaults: 0,
        }
    }

    pub fn direct(&self) -> Amount {
        self.accrued.total()
    }

    pub fn total(&self) -> Amount {
        self.direct().saturating_add(self.from_vaults)
    }
}

entity!(ProgramAccrual, "program_accrual", |s| s.id.to_string());

// ---------------------------------------------------------------------------
// Vaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub address: Address,
    pub total_shares: Amount,
    pub fee_recipient: Option<Address>,
    pub created_at: Timestamp,
}

impl Vault {
    pub fn new(address: Address, now: Timestamp) -> Self {
        Self {
            address,
            total_shares: 0,
            fee_recipient: None,
            created_at: now,
        }
    }
}

entity!(Vault, "vault", |s| s.address.to_string());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPosition {
    pub id: Id,
    pub depositor: Address,
    pub vault: Address,
    pub shares: Amount,
}

impl VaultPosition {
    pub fn new(depositor: Address, vault: Address) -> Self {
        Self {
            id: vault_position_id(&depositor, &vault),
            depositor,
            vault,
            shares: 0,
        }
    }
}

entity!(VaultPosition, "vault_position", |s| s.id.to_string());

/// Vault-scoped index over what the vault accrued from one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRewardCheckpoint {
    pub id: Id,
    pub vault: Address,
    pub program: Id,
    pub last_index: Index,
    /// Vault's program total already folded into `last_index`.
    pub accrued: Amount,
    /// Rewards that arrived while the vault had no shares.
    pub stranded: Amount,
}

impl VaultRewardCheckpoint {
    pub fn new(vault: Address, program: Id) -> Self {
        Self {
            id: vault_reward_checkpoint_id(&vault, &program),
            vault,
            program,
            last_index: INITIAL_INDEX,
            accrued: 0,
            stranded: 0,
        }
    }
}

entity!(VaultRewardCheckpoint, "vault_reward_checkpoint", |s| s.id.to_string());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPositionCheckpoint {
    pub id: Id,
    pub vault_position: Id,
    pub depositor: Address,
    pub vault: Address,
    pub program: Id,
    pub last_index: Index,
    pub accrued: Amount,
}

impl VaultPositionCheckpoint {
    pub fn new(position: &VaultPosition, program: Id) -> Self {
        Self {
            id: vault_position_checkpoint_id(&position.id, &program),
            vault_position: position.id,
            depositor: position.depositor,
            vault: position.vault,
            program,
            last_index: INITIAL_INDEX,
            accrued: 0,
        }
    }
}

entity!(VaultPositionCheckpoint, "vault_position_checkpoint", |s| s.id.to_string());

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// A share or rate movement caused by one log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Position {
        market: Id,
        participant: Address,
        side: Side,
        delta: i128,
    },
    /// Interest fee shares minted to the protocol fee recipient.
    ProtocolFee { market: Id, shares: Amount },
    /// `from = None` mints, `to = None` burns.
    VaultShares {
        vault: Address,
        from: Option<Address>,
        to: Option<Address>,
        shares: Amount,
    },
    VaultFee { vault: Address, shares: Amount },
    Rates {
        program: Id,
        market: Id,
        rate_per_year: BySide<Amount>,
    },
}

/// History entry of an applied log, written with the log's other records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Id,
    pub block: u64,
    pub log_index: u64,
    pub timestamp: Timestamp,
    pub source: Address,
    pub event: String,
    pub changes: Vec<Change>,
}

entity!(LogRecord, "log", |s| s.id.to_string());
