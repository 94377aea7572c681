//! Pending observations between two commits.
//!
//! Names are staged per hierarchy level and variant, keyed by the name itself.
//! `create` records that the name was not cached when staged; repeated staging
//! ORs it, so a row any observation asked for is never skipped.

use crate::cache::HierarchyCache;
use crate::entry::ZoneKind;
use crate::node::Variant;
use collector_core::{Domain, Level};
use obs_sqlite::Id;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct StagedName {
    pub domain: Domain,
    pub create: bool,
}

#[derive(Debug, Clone)]
pub struct StagedCert {
    pub der: Vec<u8>,
    /// Distinct plain fqdns taken from the SANs.
    pub fqdns: Vec<String>,
    pub create: bool,
}

#[derive(Debug, Clone)]
pub struct StagedLogEntry {
    pub fingerprint: String,
    pub log_url: String,
    pub index: i64,
    pub timestamp: OffsetDateTime,
    pub is_precert: bool,
    pub stage_id: Id,
}

#[derive(Debug, Clone)]
pub struct StagedPassive {
    pub fqdn: String,
    pub record_type: String,
    pub first_seen: OffsetDateTime,
    pub stage_id: Id,
}

#[derive(Debug, Clone)]
pub struct StagedEntrada {
    pub fqdn_anon: String,
    pub first_seen: OffsetDateTime,
    pub last_seen: OffsetDateTime,
    pub stage_id: Id,
}

#[derive(Debug, Clone)]
pub struct StagedZone {
    pub apex: String,
    pub kind: ZoneKind,
    pub timestamp: OffsetDateTime,
    pub stage_id: Id,
}

#[derive(Debug, Default)]
pub struct Batch {
    pub(crate) names: [[BTreeMap<String, StagedName>; 4]; 2],
    pub(crate) logs: BTreeMap<String, String>,
    pub(crate) certs: BTreeMap<String, StagedCert>,
    pub(crate) record_types: BTreeSet<String>,
    pub(crate) log_entries: Vec<StagedLogEntry>,
    pub(crate) passive: Vec<StagedPassive>,
    passive_index: HashMap<(String, String), usize>,
    /// Passive observations submitted, including ones merged into an existing slot.
    passive_seen: usize,
    pub(crate) entrada: Vec<StagedEntrada>,
    pub(crate) zone: Vec<StagedZone>,
}

impl Batch {
    /// Stage every level of `domain` from the tld down to `depth`.
    pub fn stage_domain(&mut self, cache: &HierarchyCache, variant: Variant, domain: &Domain, depth: Level) {
        for level in depth.upto() {
            let Some(name) = variant.name(domain, level) else { continue };
            let create = !cache.has_node(variant, level, name);
            self.names[variant.index()][level.index()]
                .entry(name.to_string())
                .and_modify(|s| s.create |= create)
                .or_insert_with(|| StagedName { domain: domain.clone(), create });
        }
    }

    pub fn stage_log(&mut self, url: &str, description: &str) {
        self.logs.entry(url.to_string()).or_insert_with(|| description.to_string());
    }

    /// A certificate seen twice in one batch keeps its first SAN list.
    pub fn stage_cert(&mut self, cache: &HierarchyCache, fingerprint: &str, der: &[u8], fqdns: Vec<String>) {
        let create = !cache.has_certificate(fingerprint);
        self.certs
            .entry(fingerprint.to_string())
            .and_modify(|c| c.create |= create)
            .or_insert_with(|| StagedCert { der: der.to_vec(), fqdns, create });
    }

    pub fn push_log_entry(&mut self, e: StagedLogEntry) {
        self.log_entries.push(e);
    }

    /// Repeated (fqdn, type) observations collapse onto the earliest timestamp.
    pub fn push_passive(&mut self, e: StagedPassive) {
        self.passive_seen += 1;
        self.record_types.insert(e.record_type.clone());
        let key = (e.fqdn.clone(), e.record_type.clone());
        match self.passive_index.get(&key) {
            Some(&i) => {
                let cur = &mut self.passive[i];
                if e.first_seen < cur.first_seen {
                    cur.first_seen = e.first_seen;
                }
            }
            None => {
                self.passive_index.insert(key, self.passive.len());
                self.passive.push(e);
            }
        }
    }

    pub fn push_entrada(&mut self, e: StagedEntrada) {
        self.entrada.push(e);
    }

    pub fn push_zone(&mut self, e: StagedZone) {
        self.zone.push(e);
    }

    /// Staged observations; this is what a batch size is measured in.
    pub fn len(&self) -> usize {
        self.zone.len() + self.log_entries.len() + self.passive_seen + self.entrada.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self, batch_size: usize) -> bool {
        self.len() >= batch_size.max(1)
    }

    pub fn reset(&mut self) {
        *self = Batch::default();
    }

    pub(crate) fn staged(&self, variant: Variant, level: Level) -> &BTreeMap<String, StagedName> {
        &self.names[variant.index()][level.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn t(ms: i64) -> OffsetDateTime {
        collector_core::timestamp::from_unix_ms(ms).unwrap()
    }

    fn passive(q: &str, rt: &str, ms: i64) -> StagedPassive {
        StagedPassive { fqdn: q.into(), record_type: rt.into(), first_seen: t(ms), stage_id: 1 }
    }

    #[test]
    fn create_flag_is_ored() {
        let mut cache = HierarchyCache::new(8);
        let d = Domain::parse("www.a.com").unwrap();
        let mut b = Batch::default();
        b.stage_domain(&cache, Variant::Public, &d, Level::Fqdn);
        cache.put_node(Variant::Public, Level::Apex, "a.com".into(), Node { id: 1, ..Default::default() });
        b.stage_domain(&cache, Variant::Public, &d, Level::Fqdn);
        assert!(b.staged(Variant::Public, Level::Apex)["a.com"].create);

        let mut b = Batch::default();
        b.stage_domain(&cache, Variant::Public, &d, Level::Fqdn);
        assert!(!b.staged(Variant::Public, Level::Apex)["a.com"].create);
        assert!(b.staged(Variant::Public, Level::Fqdn)["www.a.com"].create);
    }

    #[test]
    fn depth_limits_staged_levels() {
        let cache = HierarchyCache::new(8);
        let d = Domain::parse("www.example.org").unwrap();
        let mut b = Batch::default();
        b.stage_domain(&cache, Variant::Public, &d, Level::Apex);
        assert_eq!(b.staged(Variant::Public, Level::Apex).len(), 1);
        assert!(b.staged(Variant::Public, Level::Fqdn).is_empty());
        assert!(b.staged(Variant::Anon, Level::Tld).is_empty());
    }

    #[test]
    fn passive_keeps_minimum_per_key() {
        let mut b = Batch::default();
        b.push_passive(passive("a.com", "A", 10));
        b.push_passive(passive("a.com", "A", 5));
        b.push_passive(passive("a.com", "AAAA", 10));
        b.push_passive(passive("a.com", "A", 7));
        assert_eq!(b.passive.len(), 2);
        assert_eq!(b.len(), 4);
        assert_eq!(b.passive[0].first_seen, t(5));
        assert_eq!(b.record_types.len(), 2);
    }

    #[test]
    fn full_and_reset() {
        let mut b = Batch::default();
        let z = StagedZone { apex: "a.com".into(), kind: ZoneKind::FirstSeen, timestamp: t(1), stage_id: 1 };
        b.push_zone(z.clone());
        assert!(!b.is_full(2));
        b.push_zone(z);
        assert!(b.is_full(2));
        b.reset();
        assert!(b.is_empty());
    }
}
