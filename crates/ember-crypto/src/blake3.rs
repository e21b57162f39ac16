//! Domain-separated BLAKE3 hashing for entity keys.
//!
//! ## Modes
//!
//! - [`hash`]: Pure hashing of opaque bytes (log identities)
//! - [`derive_key`]: Context-bound derivation, the basis of composite keys
//! - [`composite_id`]: Key for a record joining several identities
//!
//! Each record family has its own registered context string. Deriving a key
//! with an unregistered context is a programming error.

/// Registered BLAKE3 context strings, one per record family.
pub mod contexts {
    pub const POSITION: &str = "ember v1 position";
    pub const MARKET_EPOCH: &str = "ember v1 market-epoch";
    pub const REWARD_PROGRAM: &str = "ember v1 reward-program";
    pub const REWARD_STREAM: &str = "ember v1 reward-stream";
    pub const POSITION_CHECKPOINT: &str = "ember v1 position-checkpoint";
    pub const PROGRAM_ACCRUAL: &str = "ember v1 program-accrual";
    pub const VAULT_POSITION: &str = "ember v1 vault-position";
    pub const VAULT_REWARD_CHECKPOINT: &str = "ember v1 vault-reward-checkpoint";
    pub const VAULT_POSITION_CHECKPOINT: &str = "ember v1 vault-position-checkpoint";
    pub const EPOCH_PROGRAM: &str = "ember v1 epoch-program";
    pub const SINGLETON: &str = "ember v1 singleton";
    pub const LOG_ID: &str = "ember v1 log-id";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[
        POSITION,
        MARKET_EPOCH,
        REWARD_PROGRAM,
        REWARD_STREAM,
        POSITION_CHECKPOINT,
        PROGRAM_ACCRUAL,
        VAULT_POSITION,
        VAULT_REWARD_CHECKPOINT,
        VAULT_POSITION_CHECKPOINT,
        EPOCH_PROGRAM,
        SINGLETON,
        LOG_ID,
    ];
}

/// Plain BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    ::blake3::hash(data).into()
}

/// BLAKE3 in key-derivation mode under `context`.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    debug_assert!(is_registered_context(context), "unregistered context {context}");
    ::blake3::derive_key(context, material)
}

pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.iter().any(|c| *c == context)
}

/// Length-prefixed concatenation: each field is preceded by its length as a
/// little-endian `u32`, so no two field lists share an encoding.
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    fields
        .iter()
        .flat_map(|field| {
            let len = u32::try_from(field.len()).unwrap_or(u32::MAX);
            len.to_le_bytes().into_iter().chain(field.iter().copied())
        })
        .collect()
}

/// Derive the key of a record that joins `fields` under `context`.
///
/// Field order matters: `(participant, market)` and `(market, participant)`
/// are different keys.
pub fn composite_id(context: &str, fields: &[&[u8]]) -> [u8; 32] {
    derive_key(context, &encode_multi_field(fields))
}

/// Identity of an ingested log, from its chain position.
pub fn log_id(block: u64, log_index: u64) -> [u8; 32] {
    composite_id(contexts::LOG_ID, &[&block.to_be_bytes(), &log_index.to_be_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_share_prefix_and_are_distinct() {
        for (i, ctx) in contexts::ALL_CONTEXTS.iter().enumerate() {
            assert!(ctx.starts_with("ember v1 "), "bad prefix: {ctx}");
            assert!(!contexts::ALL_CONTEXTS[i + 1..].contains(ctx), "duplicate: {ctx}");
        }
    }

    #[test]
    fn test_hash_matches_blake3() {
        assert_eq!(hash(b"ember"), *::blake3::hash(b"ember").as_bytes());
        assert_ne!(hash(b"market"), hash(b"vault"));
    }

    #[test]
    fn test_context_separates_record_families() {
        let material = [0u8; 32];
        assert_ne!(
            derive_key(contexts::POSITION, &material),
            derive_key(contexts::VAULT_POSITION, &material)
        );
        assert!(!is_registered_context("ember v2 position"));
    }

    #[test]
    fn test_composite_id_field_order() {
        let user = [1u8; 20];
        let market = [2u8; 32];
        let ab = composite_id(contexts::POSITION, &[&user, &market]);
        let ba = composite_id(contexts::POSITION, &[&market, &user]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_composite_id_no_concat_ambiguity() {
        // "ab" ++ "c" must not collide with "a" ++ "bc"
        let left = composite_id(contexts::REWARD_PROGRAM, &[b"ab", b"c"]);
        let right = composite_id(contexts::REWARD_PROGRAM, &[b"a", b"bc"]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_length_prefix_layout() {
        let encoded = encode_multi_field(&[b"abc", b""]);
        assert_eq!(encoded, [3, 0, 0, 0, b'a', b'b', b'c', 0, 0, 0, 0]);
        assert!(encode_multi_field(&[]).is_empty());
    }

    #[test]
    fn test_log_id_depends_on_position() {
        assert_ne!(log_id(7, 0), log_id(7, 1));
        assert_ne!(log_id(7, 1), log_id(1, 7));
    }
}
