//! # ember-indexer
//!
//! Replays decoded lending-protocol logs through the reward engine.
//!
//! ## Modules
//!
//! - [`config`]: `config.toml` loading
//! - [`schedule`]: epoch schedule synchronisation
//! - [`ingest`]: event log decoding and dispatch

pub mod config;
pub mod ingest;
pub mod schedule;

pub use config::IndexerConfig;
pub use ingest::{IngestError, Ingestor, Outcome, ReplaySummary};
