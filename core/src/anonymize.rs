use crate::domain::Level;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

pub type LabelFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Labeling policy with one function per hierarchy level. The default is the identity.
#[derive(Clone)]
pub struct Anonymizer {
    tld: LabelFn,
    public_suffix: LabelFn,
    apex: LabelFn,
    fqdn: LabelFn,
}

impl Anonymizer {
    pub fn identity() -> Self {
        let id: LabelFn = Arc::new(|s: &str| s.to_string());
        Anonymizer { tld: id.clone(), public_suffix: id.clone(), apex: id.clone(), fqdn: id }
    }

    /// Hex SHA-256 of `salt || label` at every level.
    pub fn salted_sha256(salt: impl Into<String>) -> Self {
        let salt = salt.into();
        let f: LabelFn = Arc::new(move |s: &str| {
            let mut h = Sha256::new();
            h.update(salt.as_bytes());
            h.update(s.as_bytes());
            hex::encode(h.finalize())
        });
        Anonymizer { tld: f.clone(), public_suffix: f.clone(), apex: f.clone(), fqdn: f }
    }

    pub fn per_level(tld: LabelFn, public_suffix: LabelFn, apex: LabelFn, fqdn: LabelFn) -> Self {
        Anonymizer { tld, public_suffix, apex, fqdn }
    }

    /// Same function at every level; it receives the level it is applied to.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Level, &str) -> String + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let at = |level: Level| -> LabelFn {
            let f = f.clone();
            Arc::new(move |s: &str| f(level, s))
        };
        Anonymizer { tld: at(Level::Tld), public_suffix: at(Level::PublicSuffix), apex: at(Level::Apex), fqdn: at(Level::Fqdn) }
    }

    pub fn label(&self, level: Level, plain: &str) -> String {
        match level {
            Level::Tld => (self.tld)(plain),
            Level::PublicSuffix => (self.public_suffix)(plain),
            Level::Apex => (self.apex)(plain),
            Level::Fqdn => (self.fqdn)(plain),
        }
    }
}

impl Default for Anonymizer {
    fn default() -> Self {
        Anonymizer::identity()
    }
}

impl fmt::Debug for Anonymizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anonymizer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_by_default() {
        let a = Anonymizer::default();
        assert_eq!(a.label(Level::Fqdn, "www.a.com"), "www.a.com");
    }

    #[test]
    fn salted_hash_depends_on_salt() {
        let a = Anonymizer::salted_sha256("s1");
        let b = Anonymizer::salted_sha256("s2");
        let x = a.label(Level::Apex, "a.com");
        assert_eq!(x.len(), 64);
        assert_eq!(x, a.label(Level::Apex, "a.com"));
        assert_ne!(x, b.label(Level::Apex, "a.com"));
    }

    #[test]
    fn per_level_functions_are_independent() {
        let keep: LabelFn = Arc::new(|s: &str| s.to_string());
        let upper: LabelFn = Arc::new(|s: &str| s.to_uppercase());
        let a = Anonymizer::per_level(keep.clone(), keep.clone(), keep, upper);
        assert_eq!(a.label(Level::Tld, "com"), "com");
        assert_eq!(a.label(Level::Fqdn, "www.a.com"), "WWW.A.COM");
    }
}
