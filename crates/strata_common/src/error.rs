use thiserror::Error;

/// Convenience alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Top-level error type for every engine operation.
///
/// Two kinds deliberately never appear here:
/// - lock exhaustion is not an error: mutators proceed without the lease and
///   the miss is only visible in the engine counters;
/// - corruption observed on the read path degrades to an absent item at the
///   facade; `CorruptData` is surfaced only where the caller asked for the
///   raw entry (registry-level reads).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store rejected a write for quota reasons.
    #[error("backing store is full")]
    StorageFull,

    /// Encryption key missing, ciphertext malformed, or authentication
    /// failed on decrypt. Never retried.
    #[error("crypto failure: {0}")]
    CryptoFail(String),

    /// Marker present but metadata or chunks missing/malformed.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// A migration adapter failed; items processed before the failure are
    /// kept, items after it are skipped.
    #[error("schema migration failed: {0}")]
    SchemaMigration(String),

    /// Mutating call after `destroy()`.
    #[error("engine instance has been destroyed")]
    InstanceDestroyed,

    /// Import called with a snapshot that carries no data section.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// JSON encode/decode failure outside the read-degradation path.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any non-quota fault from the backing provider, surfaced unchanged.
    #[error("backing store fault: {0}")]
    Provider(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    /// Whether a read-path failure of this kind degrades to "item absent"
    /// instead of propagating to the caller.
    pub fn degrades_on_read(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptData(_) | StoreError::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(StoreError::StorageFull.to_string(), "backing store is full");
        assert_eq!(
            StoreError::CryptoFail("tag mismatch".into()).to_string(),
            "crypto failure: tag mismatch"
        );
        assert_eq!(
            StoreError::InstanceDestroyed.to_string(),
            "engine instance has been destroyed"
        );
    }

    #[test]
    fn test_from_serde_json() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: StoreError = bad.unwrap_err().into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn test_read_degradation_classification() {
        assert!(StoreError::CorruptData("x".into()).degrades_on_read());
        assert!(!StoreError::CryptoFail("x".into()).degrades_on_read());
        assert!(!StoreError::StorageFull.degrades_on_read());
    }
}
