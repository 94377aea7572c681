use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// A certificate-transparency log, identified by its url.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CtLog {
    pub url: String,
    pub description: String,
}

/// One entry read from a CT log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtEntry {
    pub cert_der: Vec<u8>,
    pub is_precert: bool,
    pub index: i64,
    pub timestamp: OffsetDateTime,
    pub log: CtLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Registration,
    Expiration,
    FirstSeen,
}

impl ZoneKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Registration => "REGISTRATION",
            ZoneKind::Expiration => "EXPIRATION",
            ZoneKind::FirstSeen => "FIRST_SEEN",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REGISTRATION" => Ok(ZoneKind::Registration),
            "EXPIRATION" => Ok(ZoneKind::Expiration),
            "FIRST_SEEN" => Ok(ZoneKind::FirstSeen),
            other => Err(format!("unknown zone entry type {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_kind_parses_case_insensitively() {
        assert_eq!("first_seen".parse::<ZoneKind>(), Ok(ZoneKind::FirstSeen));
        assert_eq!(ZoneKind::Expiration.to_string(), "EXPIRATION");
        assert!("DELETED".parse::<ZoneKind>().is_err());
    }
}
