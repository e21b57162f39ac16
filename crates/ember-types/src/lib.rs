//! # ember-types
//!
//! Shared domain types used across the ember workspace: identifiers, the
//! per-side share/index records, fixed-point constants, the persisted entity
//! records of the accrual engine and the ingestion event payloads.

pub mod entities;
pub mod events;
pub mod ids;
pub mod index;
pub mod side;

pub use ids::{Address, Id};
pub use index::Index;
pub use side::{BySide, Side};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Token amounts and share counts.
pub type Amount = u128;

/// Fixed-point unit of every reward index (10^36).
pub const SCALE: u128 = 10u128.pow(36);

/// Value every freshly created index starts from.
pub const INITIAL_INDEX: Index = Index::from_u128(SCALE);

/// Seconds per (non-leap) year. Stream rates are annualized over this.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Errors raised while parsing or decoding shared types.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// Hex string could not be decoded.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Decoded byte string had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Decimal integer could not be parsed.
    #[error("invalid decimal integer: {0}")]
    Decimal(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TypesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_is_ten_to_the_36() {
        assert_eq!(SCALE.to_string().len(), 37);
        assert_eq!(INITIAL_INDEX.to_string(), SCALE.to_string());
    }
}
