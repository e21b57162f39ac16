//! ember-indexer: replay an event log and print accrued rewards.
//!
//! Usage: `ember-indexer [EVENTS]`, where `EVENTS` is an NDJSON file or `-`
//! for stdin. Without `EVENTS` only the report is printed.

use std::fs::File;
use std::io::{self, BufReader};

use ember_db::SqliteStore;
use ember_engine::Engine;
use ember_indexer::{schedule, IndexerConfig, Ingestor};
use tracing::info;

fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = IndexerConfig::load()?;

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.logging.level.parse()?),
        )
        .init();

    // 2. Open database
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::open(&db_path)?;
    info!(path = %db_path.display(), "database opened");

    // 3. Epoch schedule
    let mut engine = Engine::new(store, config.engine_config());
    schedule::apply(&mut engine, &config.epochs)?;

    // 4. Replay
    let mut ingestor = Ingestor::new(engine);
    if let Some(markets) = &config.rewards.eligible_markets {
        ingestor = ingestor.with_eligible_markets(markets.iter().copied());
    }
    if let Some(protocol) = config.ingest.lending_protocol {
        ingestor = ingestor.with_lending_protocol(protocol);
    }
    match std::env::args().nth(1).as_deref() {
        Some("-") => {
            ingestor.replay(io::stdin().lock())?;
        }
        Some(path) => {
            ingestor.replay(BufReader::new(File::open(path)?))?;
        }
        None => {}
    }

    // 5. Report
    let report = ingestor.engine_mut().rewards_report()?;
    serde_json::to_writer_pretty(io::stdout().lock(), &report)?;
    println!();
    Ok(())
}
