//! Split a raw name into the tld / public suffix / apex / fqdn hierarchy.

use crate::anonymize::Anonymizer;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("empty domain name")]
    Empty,
    #[error("domain name too long ({0} bytes)")]
    TooLong(usize),
    #[error("invalid label {label:?} in {name:?}")]
    InvalidLabel { name: String, label: String },
    #[error("{name:?} has no {level} level")]
    MissingLevel { name: String, level: Level },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Tld,
    PublicSuffix,
    Apex,
    Fqdn,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Tld, Level::PublicSuffix, Level::Apex, Level::Fqdn];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Levels from the tld up to and including `self`.
    pub fn upto(self) -> impl Iterator<Item = Level> {
        Level::ALL.into_iter().take(self.index() + 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Tld => "tld",
            Level::PublicSuffix => "public suffix",
            Level::Apex => "apex",
            Level::Fqdn => "fqdn",
        };
        f.write_str(s)
    }
}

/// One level of a decomposed name. `anon` stays empty until an anonymizer runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Label {
    pub plain: String,
    pub anon: String,
}

impl Label {
    fn new(plain: impl Into<String>) -> Self {
        Label { plain: plain.into(), anon: String::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub tld: Label,
    pub public_suffix: Option<Label>,
    pub apex: Option<Label>,
    pub fqdn: Option<Label>,
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\*|[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?)$").expect("static label pattern")
    })
}

impl Domain {
    /// Decompose `raw`. Pure: the same input always yields the same labels.
    pub fn parse(raw: &str) -> Result<Domain, DomainError> {
        let name = raw.trim().to_lowercase();
        let name = name.strip_suffix('.').unwrap_or(&name).to_string();
        if name.is_empty() {
            return Err(DomainError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(DomainError::TooLong(name.len()));
        }
        let labels: Vec<&str> = name.split('.').collect();
        if let Some(bad) = labels.iter().find(|l| !label_re().is_match(l)) {
            return Err(DomainError::InvalidLabel { name: name.clone(), label: bad.to_string() });
        }

        let tld = Label::new(labels[labels.len() - 1]);
        if labels.len() == 1 {
            return Ok(Domain { tld, public_suffix: None, apex: None, fqdn: None });
        }

        let suffix = psl::suffix_str(&name).unwrap_or(tld.plain.as_str()).to_string();
        if suffix == name {
            return Ok(Domain { tld, public_suffix: Some(Label::new(suffix)), apex: None, fqdn: None });
        }

        let suffix_labels = suffix.split('.').count();
        let sld = labels[labels.len() - suffix_labels - 1];
        let apex = format!("{sld}.{suffix}");
        Ok(Domain {
            tld,
            public_suffix: Some(Label::new(suffix)),
            apex: Some(Label::new(apex)),
            fqdn: Some(Label::new(name)),
        })
    }

    /// Fill the `anon` form of every present level.
    pub fn anonymize(&mut self, anonymizer: &Anonymizer) {
        for level in Level::ALL {
            if let Some(label) = self.level_mut(level) {
                label.anon = anonymizer.label(level, &label.plain);
            }
        }
    }

    pub fn anonymized(mut self, anonymizer: &Anonymizer) -> Domain {
        self.anonymize(anonymizer);
        self
    }

    pub fn level(&self, level: Level) -> Option<&Label> {
        match level {
            Level::Tld => Some(&self.tld),
            Level::PublicSuffix => self.public_suffix.as_ref(),
            Level::Apex => self.apex.as_ref(),
            Level::Fqdn => self.fqdn.as_ref(),
        }
    }

    fn level_mut(&mut self, level: Level) -> Option<&mut Label> {
        match level {
            Level::Tld => Some(&mut self.tld),
            Level::PublicSuffix => self.public_suffix.as_mut(),
            Level::Apex => self.apex.as_mut(),
            Level::Fqdn => self.fqdn.as_mut(),
        }
    }

    /// The deepest present level.
    pub fn depth(&self) -> Level {
        Level::ALL.into_iter().rev().find(|l| self.level(*l).is_some()).unwrap_or(Level::Tld)
    }

    /// Like [`Domain::level`], but a missing level is an error.
    pub fn require(&self, level: Level) -> Result<&Label, DomainError> {
        self.level(level).ok_or_else(|| DomainError::MissingLevel {
            name: self.deepest_plain().to_string(),
            level,
        })
    }

    fn deepest_plain(&self) -> &str {
        self.level(self.depth()).map(|l| l.plain.as_str()).unwrap_or_default()
    }
}
