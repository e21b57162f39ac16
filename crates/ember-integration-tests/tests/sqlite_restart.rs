//! Integration test: engine state and ingest progress survive restarts.
//!
//! 1. Accrue against a file-backed SQLite store, reopen, keep accruing
//! 2. The persisted clock still rejects regressions after a restart
//! 3. Replaying the same event log twice applies every log once and keeps
//!    its history entry

use ember_db::{Cursor, SqliteStore};
use ember_engine::{AccrualError, Engine, EngineConfig, RateConfig};
use ember_indexer::config::{EpochConfig, EpochRate};
use ember_indexer::{schedule, Ingestor};
use ember_integration_tests::{
    remove_db, temp_db_path, with_schedule, ALICE, BOB, COLLATERAL_TOKEN, LOAN_TOKEN, MARKET,
    PROTOCOL, VAULT,
};
use ember_types::entities::{log_record_id, Change, LogRecord};
use ember_types::events::{Event, EventEnvelope};
use ember_types::{Address, Side, Timestamp};

fn open(path: &std::path::Path) -> Engine<SqliteStore> {
    Engine::new(SqliteStore::open(path).expect("open db"), EngineConfig::default())
}

#[test]
fn accrual_resumes_after_reopen() {
    let path = temp_db_path("resume");
    {
        let mut engine = open(&path);
        with_schedule(&mut engine, &[(0, 100, 10), (100, 200, 5)]);
        engine
            .on_balance_change(MARKET, ALICE, Side::Supply, 100, 0)
            .expect("supply");
        assert_eq!(engine.accrued_rewards(ALICE, None, 50).expect("query"), 500);
    }
    {
        let mut engine = open(&path);
        assert_eq!(engine.clock().expect("clock"), 50);
        assert!(matches!(
            engine.on_balance_change(MARKET, BOB, Side::Supply, 1, 40),
            Err(AccrualError::TimeRegression { last: 50, now: 40 })
        ));
        engine
            .on_balance_change(MARKET, BOB, Side::Supply, 100, 150)
            .expect("bob");
        assert_eq!(engine.accrued_rewards(ALICE, None, 250).expect("alice"), 1_375);
        assert_eq!(engine.accrued_rewards(BOB, None, 250).expect("bob"), 125);
    }
    remove_db(&path);
}

fn envelope(block: u64, timestamp: Timestamp, event: Event) -> EventEnvelope {
    EventEnvelope {
        block,
        log_index: 0,
        timestamp,
        source: if matches!(event, Event::VaultDeposit { .. }) { VAULT } else { PROTOCOL },
        event,
    }
}

fn supply(on_behalf: Address, shares: u128) -> Event {
    Event::Supply {
        market: MARKET,
        on_behalf,
        shares,
    }
}

fn ndjson(events: &[EventEnvelope]) -> String {
    events
        .iter()
        .map(|e| serde_json::to_string(e).expect("encode"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn replay_is_applied_once() {
    let path = temp_db_path("replay");
    let schedule_config = vec![EpochConfig {
        start: 0,
        end: 100,
        rates: vec![EpochRate {
            market: MARKET,
            rate_per_second: 10,
        }],
    }];
    let mut log = vec![
        envelope(
            1,
            0,
            Event::CreateMarket {
                market: MARKET,
                loan_token: LOAN_TOKEN,
                collateral_token: COLLATERAL_TOKEN,
            },
        ),
        envelope(2, 0, Event::CreateVault { vault: VAULT }),
        envelope(3, 0, supply(ALICE, 30)),
        envelope(4, 0, supply(VAULT, 10)),
        envelope(5, 0, Event::VaultDeposit { owner: BOB, shares: 1 }),
    ];

    {
        let mut engine = open(&path);
        assert_eq!(schedule::apply(&mut engine, &schedule_config).expect("schedule"), 1);
        let mut ingestor = Ingestor::new(engine).with_lending_protocol(PROTOCOL);
        let summary = ingestor.replay(ndjson(&log).as_bytes()).expect("replay");
        assert_eq!(summary.applied, 5);
    }

    log.push(envelope(
        6,
        100,
        Event::Withdraw {
            market: MARKET,
            on_behalf: ALICE,
            shares: 30,
        },
    ));
    {
        let mut engine = open(&path);
        assert_eq!(schedule::apply(&mut engine, &schedule_config).expect("schedule"), 0);
        assert_eq!(
            engine.store().cursor().expect("cursor"),
            Some(Cursor {
                block: 5,
                log_index: 0
            })
        );
        let mut ingestor = Ingestor::new(engine).with_lending_protocol(PROTOCOL);
        let summary = ingestor.replay(ndjson(&log).as_bytes()).expect("replay");
        assert_eq!(summary.already_applied, 5);
        assert_eq!(summary.applied, 1);

        let engine = ingestor.engine_mut();
        let withdrawal: LogRecord = engine
            .get(&log_record_id(6, 0).to_string())
            .expect("get")
            .expect("history entry");
        assert_eq!(
            withdrawal.changes,
            vec![Change::Position {
                market: MARKET,
                participant: ALICE,
                side: Side::Supply,
                delta: -30,
            }]
        );
        assert!(engine
            .get::<LogRecord>(&log_record_id(3, 0).to_string())
            .expect("get")
            .is_some());
        assert_eq!(engine.accrued_rewards(ALICE, None, 100).expect("alice"), 750);
        assert_eq!(engine.accrued_rewards(BOB, None, 100).expect("bob"), 250);
        let report = engine.rewards_report().expect("report");
        assert_eq!(report.as_of, 100);
        assert_eq!(report.markets[0].epoch_rewards_accrued, 1_000);
    }
    remove_db(&path);
}

#[test]
fn schedule_rates_reach_the_market() {
    let path = temp_db_path("schedule");
    {
        let mut engine = open(&path);
        engine
            .configure_epoch(
                0,
                10,
                &[RateConfig {
                    market: MARKET,
                    rate_per_second: 1,
                }],
            )
            .expect("epoch");
        engine
            .create_market(MARKET, LOAN_TOKEN, COLLATERAL_TOKEN, 0)
            .expect("market");
        engine
            .on_balance_change(MARKET, ALICE, Side::Supply, 1, 0)
            .expect("supply");
    }
    let mut engine = open(&path);
    let epochs = engine.epochs().expect("epochs");
    assert_eq!(epochs.len(), 1);
    assert_eq!(epochs[0].markets, vec![MARKET]);
    assert_eq!(engine.accrued_rewards(ALICE, None, 10).expect("alice"), 10);
    remove_db(&path);
}
