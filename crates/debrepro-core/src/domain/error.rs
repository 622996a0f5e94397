//! Domain-level error taxonomy for debrepro.

/// Errors raised while constructing domain values.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("invalid build timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid snapshot id: {0}")]
    InvalidSnapshotId(String),

    #[error("invalid snapshot set: {0}")]
    InvalidSnapshotSet(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),
}

/// Result type for domain construction.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_display() {
        let err = DomainError::InvalidTimestamp("2017-13-01".to_string());
        assert!(err.to_string().contains("invalid build timestamp"));

        let err = DomainError::InvalidSnapshotSet("empty".to_string());
        assert_eq!(err.to_string(), "invalid snapshot set: empty");
    }
}
