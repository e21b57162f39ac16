//! Account addresses and 32-byte record identifiers.
//!
//! Both render as lowercase `0x`-prefixed hex and parse with or without the
//! prefix. They serialize as hex strings so that persisted records and event
//! logs stay human readable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::TypesError;

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], TypesError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped)?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| TypesError::InvalidLength {
        expected: N,
        actual,
    })
}

macro_rules! hex_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            pub const ZERO: Self = Self([0u8; $len]);

            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_fixed::<$len>(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// A 20-byte account address (participant, vault, token, distributor).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

/// A 32-byte identifier: market ids and derived record keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id(pub [u8; 32]);

hex_bytes!(Address, 20);
hex_bytes!(Id, 32);

impl Id {
    /// Derive the key of a record joining `fields` under a registered context.
    pub fn derive(context: &str, fields: &[&[u8]]) -> Self {
        Self(ember_crypto::composite_id(context, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip_with_and_without_prefix() {
        let text = "0x00000000000000000000000000000000000000ab";
        let a: Address = text.parse().expect("parse");
        assert_eq!(a.to_string(), text);
        let b: Address = text.trim_start_matches("0x").parse().expect("parse");
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = "0xabcd".parse::<Id>().expect_err("short id");
        assert!(matches!(
            err,
            TypesError::InvalidLength {
                expected: 32,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_serializes_as_hex_string() {
        let id = Id([0x11; 32]);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"0x{}\"", "11".repeat(32)));
        let back: Id = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address([1; 20]).is_zero());
    }
}
