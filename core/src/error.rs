use std::fmt;

/// Error kinds raised by the ingestion core, independent of the crate that raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingMeasurementId,
    NoActiveMeasurement,
    NoActiveStage,
    ActiveMeasurement,
    InvalidDomain,
    InvalidCertificate,
    AssertionFailure,
    BatchInsert,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MissingMeasurementId => "missing measurement id",
            ErrorKind::NoActiveMeasurement => "no active measurement",
            ErrorKind::NoActiveStage => "no active stage",
            ErrorKind::ActiveMeasurement => "active measurement",
            ErrorKind::InvalidDomain => "invalid domain",
            ErrorKind::InvalidCertificate => "invalid certificate",
            ErrorKind::AssertionFailure => "assertion failure",
            ErrorKind::BatchInsert => "batch insert",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Failures scoped to a single observation; the stream carries on after them.
    pub const fn is_per_entry(self) -> bool {
        matches!(self, ErrorKind::InvalidDomain | ErrorKind::InvalidCertificate)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
