//! Core utilities and shared types for the collector: domain decomposition,
//! anonymization, error kinds, timestamps and the client flow-control window.

pub mod anonymize;
pub mod domain;
pub mod error;
pub mod timestamp;
pub mod window;

pub use anonymize::Anonymizer;
pub use domain::{Domain, DomainError, Label, Level};
pub use error::ErrorKind;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
