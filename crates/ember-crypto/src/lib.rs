//! # ember-crypto
//!
//! Deterministic identifier derivation for the ember reward engine.
//!
//! Every persisted record is addressed by a 32-byte key derived from the
//! identities it joins (participant and market, program and market, ...).
//! Keys are domain-separated BLAKE3 derivations over length-prefixed fields,
//! so two different joins can never produce the same key.
//!
//! ## Modules
//!
//! - [`blake3`]: Domain-separated BLAKE3 hashing and composite keys

pub mod blake3;

pub use crate::blake3::{composite_id, contexts};
