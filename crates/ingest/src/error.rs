use collector_core::{DomainError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing measurement id")]
    MissingMeasurementId,
    #[error("no active measurement {0}")]
    NoActiveMeasurement(String),
    #[error("no active stage in measurement {0}")]
    NoActiveStage(String),
    #[error("measurement {0} is still active")]
    ActiveMeasurement(String),
    #[error("invalid domain: {0}")]
    InvalidDomain(#[from] DomainError),
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("batch insert failed: {0:#}")]
    BatchInsert(anyhow::Error),
    #[error("database error: {0:#}")]
    Database(anyhow::Error),
    #[error("unresolved batch: {0}")]
    Resolver(String),
    #[error("cancelled")]
    Cancelled,
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::MissingMeasurementId => ErrorKind::MissingMeasurementId,
            StoreError::NoActiveMeasurement(_) => ErrorKind::NoActiveMeasurement,
            StoreError::NoActiveStage(_) => ErrorKind::NoActiveStage,
            StoreError::ActiveMeasurement(_) => ErrorKind::ActiveMeasurement,
            StoreError::InvalidDomain(_) => ErrorKind::InvalidDomain,
            StoreError::InvalidCertificate(_) => ErrorKind::InvalidCertificate,
            StoreError::BatchInsert(_) => ErrorKind::BatchInsert,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Database(_) | StoreError::Resolver(_) | StoreError::Poisoned => ErrorKind::Internal,
        }
    }

    /// True when only the offending observation failed and the stream may continue.
    pub fn is_entry_error(&self) -> bool {
        self.kind().is_per_entry()
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_errors_do_not_end_streams() {
        assert!(StoreError::InvalidDomain(DomainError::Empty).is_entry_error());
        assert!(StoreError::InvalidCertificate("short".into()).is_entry_error());
        assert!(!StoreError::BatchInsert(anyhow::anyhow!("disk full")).is_entry_error());
        assert_eq!(StoreError::Resolver("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn batch_insert_message_includes_cause_chain() {
        let e = anyhow::anyhow!("UNIQUE constraint failed").context("insert tld");
        let msg = StoreError::BatchInsert(e).to_string();
        assert!(msg.contains("insert tld") && msg.contains("UNIQUE"));
    }
}
