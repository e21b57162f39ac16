//! Integration test crate for the ember reward engine.
//!
//! The library part is a small harness shared by the scenarios in `tests/`:
//! fixed participants, schedule setup and record lookups.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p ember-integration-tests
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ember_engine::{Engine, EngineConfig, MemoryStore, RateConfig, Store};
use ember_types::entities::{
    market_epoch_id, program_accrual_id, Epoch, MarketEpoch, ProgramAccrual,
};
use ember_types::{Address, Amount, Id, Timestamp};

pub const MARKET: Id = Id([0x4d; 32]);
pub const LOAN_TOKEN: Address = Address([0x10; 20]);
pub const COLLATERAL_TOKEN: Address = Address([0x20; 20]);
pub const PROTOCOL: Address = Address([0xb0; 20]);
pub const VAULT: Address = Address([0x77; 20]);
pub const ALICE: Address = Address([0xa1; 20]);
pub const BOB: Address = Address([0xb2; 20]);
pub const CAROL: Address = Address([0xc3; 20]);

/// `(start, end, rate_per_second)` of one epoch on [`MARKET`].
pub type EpochSpec = (Timestamp, Timestamp, Amount);

/// In-memory engine with the default collateral gate.
pub fn memory_engine() -> Engine<MemoryStore> {
    Engine::new(MemoryStore::new(), EngineConfig::default())
}

/// Configure `epochs` for [`MARKET`] and create the market at `t = 0`.
pub fn with_schedule<S: Store>(engine: &mut Engine<S>, epochs: &[EpochSpec]) -> Vec<Epoch> {
    let configured = epochs
        .iter()
        .map(|&(start, end, rate)| {
            engine
                .configure_epoch(
                    start,
                    end,
                    &[RateConfig {
                        market: MARKET,
                        rate_per_second: rate,
                    }],
                )
                .expect("configure epoch")
        })
        .collect();
    engine
        .create_market(MARKET, LOAN_TOKEN, COLLATERAL_TOKEN, 0)
        .expect("create market");
    configured
}

pub fn market_epoch<S: Store>(engine: &Engine<S>, epoch: &Epoch) -> MarketEpoch {
    engine
        .get::<MarketEpoch>(&market_epoch_id(&MARKET, epoch.id).to_string())
        .expect("load market epoch")
        .expect("market epoch exists")
}

/// A participant's accrual record for `program`, without settling.
pub fn program_accrual<S: Store>(
    engine: &Engine<S>,
    participant: &Address,
    program: &Id,
) -> Option<ProgramAccrual> {
    engine
        .get::<ProgramAccrual>(&program_accrual_id(participant, program).to_string())
        .expect("load program accrual")
}

/// A fresh database path under the system temp directory.
pub fn temp_db_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("ember-{name}-{}-{nanos}.db", std::process::id()))
}

/// Remove a database file together with its WAL companions.
pub fn remove_db(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(file));
    }
}
