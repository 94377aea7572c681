use time::OffsetDateTime;

pub type Id = i64;

/// Every table with a surrogate id handed out by the ingest process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Measurement,
    Stage,
    Tld,
    TldAnon,
    PublicSuffix,
    PublicSuffixAnon,
    Apex,
    ApexAnon,
    Fqdn,
    FqdnAnon,
    Log,
    Certificate,
    CertificateToFqdn,
    LogEntry,
    RecordType,
    PassiveEntry,
    EntradaEntry,
    ZonefileEntry,
}

impl Table {
    pub const ALL: [Table; 18] = [
        Table::Measurement,
        Table::Stage,
        Table::Tld,
        Table::TldAnon,
        Table::PublicSuffix,
        Table::PublicSuffixAnon,
        Table::Apex,
        Table::ApexAnon,
        Table::Fqdn,
        Table::FqdnAnon,
        Table::Log,
        Table::Certificate,
        Table::CertificateToFqdn,
        Table::LogEntry,
        Table::RecordType,
        Table::PassiveEntry,
        Table::EntradaEntry,
        Table::ZonefileEntry,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Table::Measurement => "measurement",
            Table::Stage => "stage",
            Table::Tld => "tld",
            Table::TldAnon => "tld_anon",
            Table::PublicSuffix => "public_suffix",
            Table::PublicSuffixAnon => "public_suffix_anon",
            Table::Apex => "apex",
            Table::ApexAnon => "apex_anon",
            Table::Fqdn => "fqdn",
            Table::FqdnAnon => "fqdn_anon",
            Table::Log => "log",
            Table::Certificate => "certificate",
            Table::CertificateToFqdn => "certificate_to_fqdn",
            Table::LogEntry => "log_entry",
            Table::RecordType => "record_type",
            Table::PassiveEntry => "passive_entry",
            Table::EntradaEntry => "entrada_entry",
            Table::ZonefileEntry => "zonefile_entry",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub id: Id,
    pub muid: String,
    pub description: String,
    pub host: String,
    pub start: OffsetDateTime,
    pub end: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub id: Id,
    pub measurement_id: Id,
    pub sequence: i64,
    pub start: OffsetDateTime,
    pub stop: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tld {
    pub id: Id,
    pub tld: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TldAnon {
    pub id: Id,
    pub tld: String,
    pub tld_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicSuffix {
    pub id: Id,
    pub suffix: String,
    pub tld_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicSuffixAnon {
    pub id: Id,
    pub suffix: String,
    pub public_suffix_id: Id,
    pub tld_anon_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apex {
    pub id: Id,
    pub apex: String,
    pub tld_id: Id,
    pub public_suffix_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApexAnon {
    pub id: Id,
    pub apex: String,
    pub apex_id: Id,
    pub tld_anon_id: Id,
    pub public_suffix_anon_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fqdn {
    pub id: Id,
    pub fqdn: String,
    pub tld_id: Id,
    pub public_suffix_id: Id,
    pub apex_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FqdnAnon {
    pub id: Id,
    pub fqdn: String,
    pub fqdn_id: Id,
    pub tld_anon_id: Id,
    pub public_suffix_anon_id: Id,
    pub apex_anon_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub id: Id,
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub id: Id,
    pub sha256_fingerprint: String,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateToFqdn {
    pub id: Id,
    pub certificate_id: Id,
    pub fqdn_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: Id,
    pub index: i64,
    pub timestamp: OffsetDateTime,
    pub is_precert: bool,
    pub certificate_id: Id,
    pub log_id: Id,
    pub stage_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    pub id: Id,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveEntry {
    pub id: Id,
    pub fqdn_id: Id,
    pub record_type_id: Id,
    pub first_seen: OffsetDateTime,
    pub stage_id: Id,
}

/// Moves an existing passive entry's `first_seen` back in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveUpdate {
    pub id: Id,
    pub first_seen: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntradaEntry {
    pub id: Id,
    pub fqdn_anon_id: Id,
    pub first_seen: OffsetDateTime,
    pub last_seen: OffsetDateTime,
    pub stage_id: Id,
}

/// `None` on an axis is stored as 0: unobserved on that axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonefileEntry {
    pub id: Id,
    pub apex_id: Id,
    pub registered: Option<OffsetDateTime>,
    pub expired: Option<OffsetDateTime>,
    pub first_seen: Option<OffsetDateTime>,
    pub stage_id: Id,
}

/// Rows of one commit, in dependency order.
#[derive(Debug, Clone, Default)]
pub struct Inserts {
    pub tld: Vec<Tld>,
    pub tld_anon: Vec<TldAnon>,
    pub public_suffix: Vec<PublicSuffix>,
    pub public_suffix_anon: Vec<PublicSuffixAnon>,
    pub apex: Vec<Apex>,
    pub apex_anon: Vec<ApexAnon>,
    pub fqdn: Vec<Fqdn>,
    pub fqdn_anon: Vec<FqdnAnon>,
    pub log: Vec<Log>,
    pub certificate: Vec<Certificate>,
    pub certificate_to_fqdn: Vec<CertificateToFqdn>,
    pub log_entry: Vec<LogEntry>,
    pub record_type: Vec<RecordType>,
    pub passive_entry: Vec<PassiveEntry>,
    pub passive_update: Vec<PassiveUpdate>,
    pub entrada_entry: Vec<EntradaEntry>,
    pub zonefile_entry: Vec<ZonefileEntry>,
}

impl Inserts {
    /// (table, rows) pairs; updates are reported under their table.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("tld", self.tld.len()),
            ("tld_anon", self.tld_anon.len()),
            ("public_suffix", self.public_suffix.len()),
            ("public_suffix_anon", self.public_suffix_anon.len()),
            ("apex", self.apex.len()),
            ("apex_anon", self.apex_anon.len()),
            ("fqdn", self.fqdn.len()),
            ("fqdn_anon", self.fqdn_anon.len()),
            ("log", self.log.len()),
            ("certificate", self.certificate.len()),
            ("certificate_to_fqdn", self.certificate_to_fqdn.len()),
            ("log_entry", self.log_entry.len()),
            ("record_type", self.record_type.len()),
            ("passive_entry", self.passive_entry.len()),
            ("passive_entry_update", self.passive_update.len()),
            ("entrada_entry", self.entrada_entry.len()),
            ("zonefile_entry", self.zonefile_entry.len()),
        ]
    }

    pub fn len(&self) -> usize {
        self.counts().iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
