//! Compare-and-swap tokens.
//!
//! A [`Cas`] is issued by the store on every successful write and returned on every read.
//! Presenting it on the next conditional write proves that the caller has seen the latest
//! version of the document. Tokens are opaque: they can be compared for equality, but no
//! ordering between two tokens carries meaning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique value created per mutation of a document.
///
/// Is not guaranteed to be unique across documents. Can be used in a compare and swap loop
/// to safely mutate a document concurrently.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cas(u64);

impl Cas {
    /// Wraps a raw token value issued by a backend.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token value, for backends that need to put it on the wire.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Cas {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_fixed_width_hex() {
        assert_eq!(Cas::new(0x2a).to_string(), "0x000000000000002a");
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&Cas::new(7)).unwrap();
        assert_eq!(json, "7");

        let back: Cas = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Cas::from(7));
    }
}
