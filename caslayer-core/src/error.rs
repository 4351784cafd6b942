//! Error types and result types for key-value store operations.
//!
//! Every fallible operation in this workspace returns [`KvStoreResult<T>`]. The variants
//! are split so that callers can match on exactly the failure they know how to recover
//! from: the CAS retry loop only ever recovers [`KvStoreError::CasMismatch`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::cas::Cas;

/// Represents all possible errors that can occur when interacting with a key-value store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KvStoreError {
    /// The requested document does not exist.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    /// A document with the given key already exists.
    #[error("Document already exists: {0}")]
    DocumentAlreadyExists(String),
    /// A conditional write presented a CAS that is no longer current.
    ///
    /// Someone else wrote the document between the caller's read and its write.
    #[error("CAS mismatch on {key}: expected {expected}, current {actual}")]
    CasMismatch {
        key: String,
        expected: Cas,
        actual: Cas,
    },
    /// A CAS retry loop consumed its whole attempt budget without committing.
    #[error("Retries exhausted on {key} after {attempts} attempt(s)")]
    RetryExhausted { key: String, attempts: u32 },
    /// The store could not be reached or the request failed in flight.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Serialization/deserialization error when converting between value formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The stored value does not have the shape the operation requires.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A configuration value was rejected before any work started.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl KvStoreError {
    /// Returns `true` for a stale-CAS rejection, the only error a CAS loop retries.
    pub fn is_cas_mismatch(&self) -> bool {
        matches!(self, KvStoreError::CasMismatch { .. })
    }

    /// Returns `true` if the error reports a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvStoreError::DocumentNotFound(_))
    }
}

/// A specialized `Result` type for key-value store operations.
pub type KvStoreResult<T> = Result<T, KvStoreError>;

impl From<BsonError> for KvStoreError {
    fn from(err: BsonError) -> Self {
        KvStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for KvStoreError {
    fn from(err: SerdeJsonError) -> Self {
        KvStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cas_mismatch_is_classified_as_such() {
        let mismatch = KvStoreError::CasMismatch {
            key: "ctr".to_string(),
            expected: Cas::new(1),
            actual: Cas::new(2),
        };

        assert!(mismatch.is_cas_mismatch());
        assert!(!KvStoreError::DocumentNotFound("ctr".to_string()).is_cas_mismatch());
        assert!(!KvStoreError::Transport("reset".to_string()).is_cas_mismatch());
        assert!(
            !KvStoreError::RetryExhausted { key: "ctr".to_string(), attempts: 3 }.is_cas_mismatch()
        );
    }

    #[test]
    fn messages_name_the_key() {
        let err = KvStoreError::RetryExhausted { key: "ctr".to_string(), attempts: 5 };
        assert_eq!(err.to_string(), "Retries exhausted on ctr after 5 attempt(s)");

        assert!(KvStoreError::DocumentNotFound("ctr".to_string()).is_not_found());
    }

    #[test]
    fn json_errors_become_serialization_errors() {
        let err: KvStoreError = serde_json::from_str::<u64>("not a number").unwrap_err().into();
        assert!(matches!(err, KvStoreError::Serialization(_)));
    }
}
