//! Strongly-typed identifiers for chat-group rows.
//!
//! The external store keys everything by signed 64-bit integers; these
//! newtypes keep a group ID from being passed where a message ID belongs.

use serde::{Deserialize, Serialize};

/// Identifier of a user (the actor who asked the question and owns the quota).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Identifier of a chat group (conversation).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(i64);

/// Identifier of a group member (the AI participant answering).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(i64);

/// Identifier of a message row (question or answer).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

macro_rules! impl_i64_newtype {
    ($t:ty) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Zero is the wire default for an absent identifier.
            pub const fn is_zero(&self) -> bool {
                self.0 == 0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_i64_newtype!(UserId);
impl_i64_newtype!(GroupId);
impl_i64_newtype!(MemberId);
impl_i64_newtype!(MessageId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_integers() {
        let json = serde_json::to_string(&GroupId::new(42)).unwrap();
        assert_eq!(json, "42");

        let back: UserId = serde_json::from_str("7").unwrap();
        assert_eq!(back, UserId::new(7));
        assert_eq!(i64::from(back), 7);
    }

    #[test]
    fn default_is_zero() {
        assert!(MessageId::default().is_zero());
        assert!(!MemberId::new(3).is_zero());
    }
}
