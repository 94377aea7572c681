use crate::node::{Node, Variant};
use collector_core::Level;
use lru::LruCache;
use obs_sqlite::Id;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use time::OffsetDateTime;

/// Committed state of one passive entry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassiveRecord {
    pub id: Id,
    pub first_seen: OffsetDateTime,
}

/// Record-type id -> row, for every passive row of one fqdn.
pub type PassiveRows = HashMap<Id, PassiveRecord>;

/// Rows a successful commit makes visible to later lookups.
#[derive(Debug, Default)]
pub struct Admission {
    pub nodes: Vec<(Variant, Level, String, Node)>,
    pub logs: Vec<(String, Id)>,
    pub certificates: Vec<(String, Id)>,
    pub record_types: Vec<(String, Id)>,
    /// Complete passive rows of every fqdn the commit touched.
    pub passive: Vec<(Id, PassiveRows)>,
}

/// Bounded read-through cache of committed rows. Holds nothing a commit has
/// not written, so any entry may be evicted at any time.
pub struct HierarchyCache {
    nodes: [[LruCache<String, Node>; 4]; 2],
    logs: LruCache<String, Id>,
    certificates: LruCache<String, Id>,
    record_types: LruCache<String, Id>,
    passive: LruCache<Id, PassiveRows>,
}

impl HierarchyCache {
    /// `capacity` bounds each map separately.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        HierarchyCache {
            nodes: std::array::from_fn(|_| std::array::from_fn(|_| LruCache::new(cap))),
            logs: LruCache::new(cap),
            certificates: LruCache::new(cap),
            record_types: LruCache::new(cap),
            passive: LruCache::new(cap),
        }
    }

    fn level(&mut self, variant: Variant, level: Level) -> &mut LruCache<String, Node> {
        &mut self.nodes[variant.index()][level.index()]
    }

    pub fn node(&mut self, variant: Variant, level: Level, name: &str) -> Option<Node> {
        self.level(variant, level).get(name).copied()
    }

    /// Membership test that leaves recency untouched.
    pub fn has_node(&self, variant: Variant, level: Level, name: &str) -> bool {
        self.nodes[variant.index()][level.index()].contains(name)
    }

    pub fn put_node(&mut self, variant: Variant, level: Level, name: String, node: Node) {
        self.level(variant, level).put(name, node);
    }

    pub fn log(&mut self, url: &str) -> Option<Id> {
        self.logs.get(url).copied()
    }

    pub fn put_log(&mut self, url: String, id: Id) {
        self.logs.put(url, id);
    }

    pub fn certificate(&mut self, fingerprint: &str) -> Option<Id> {
        self.certificates.get(fingerprint).copied()
    }

    pub fn has_certificate(&self, fingerprint: &str) -> bool {
        self.certificates.contains(fingerprint)
    }

    pub fn put_certificate(&mut self, fingerprint: String, id: Id) {
        self.certificates.put(fingerprint, id);
    }

    pub fn record_type(&mut self, name: &str) -> Option<Id> {
        self.record_types.get(name).copied()
    }

    pub fn put_record_type(&mut self, name: String, id: Id) {
        self.record_types.put(name, id);
    }

    pub fn passive(&mut self, fqdn_id: Id) -> Option<&PassiveRows> {
        self.passive.get(&fqdn_id)
    }

    pub fn admit(&mut self, a: Admission) {
        for (variant, level, name, node) in a.nodes {
            self.put_node(variant, level, name, node);
        }
        for (url, id) in a.logs {
            self.put_log(url, id);
        }
        for (fp, id) in a.certificates {
            self.put_certificate(fp, id);
        }
        for (name, id) in a.record_types {
            self.put_record_type(name, id);
        }
        for (fqdn_id, rows) in a.passive {
            self.passive.put(fqdn_id, rows);
        }
    }

    /// Entries per map, public levels first.
    pub fn sizes(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.nodes.iter().flatten().map(|c| c.len()).collect();
        out.extend([self.logs.len(), self.certificates.len(), self.record_types.len(), self.passive.len()]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: Id) -> Node {
        Node { id, ..Default::default() }
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut c = HierarchyCache::new(2);
        c.put_node(Variant::Public, Level::Apex, "a.com".into(), node(1));
        c.put_node(Variant::Public, Level::Apex, "b.com".into(), node(2));
        assert_eq!(c.node(Variant::Public, Level::Apex, "a.com").map(|n| n.id), Some(1));
        c.put_node(Variant::Public, Level::Apex, "c.com".into(), node(3));
        assert!(!c.has_node(Variant::Public, Level::Apex, "b.com"));
        assert!(c.has_node(Variant::Public, Level::Apex, "a.com"));
    }

    #[test]
    fn variants_and_levels_are_separate_namespaces() {
        let mut c = HierarchyCache::new(8);
        c.put_node(Variant::Public, Level::Tld, "com".into(), node(1));
        assert!(c.node(Variant::Anon, Level::Tld, "com").is_none());
        assert!(c.node(Variant::Public, Level::PublicSuffix, "com").is_none());
    }

    #[test]
    fn admit_replaces_passive_rows() {
        let mut c = HierarchyCache::new(4);
        let t = OffsetDateTime::UNIX_EPOCH;
        let mut rows = PassiveRows::new();
        rows.insert(7, PassiveRecord { id: 1, first_seen: t });
        c.admit(Admission { passive: vec![(3, rows)], ..Default::default() });
        assert_eq!(c.passive(3).and_then(|r| r.get(&7)).map(|r| r.id), Some(1));
        assert!(c.passive(4).is_none());
    }

    #[test]
    fn sizes_cover_every_map() {
        let mut c = HierarchyCache::new(4);
        c.put_node(Variant::Public, Level::Tld, "com".into(), node(1));
        c.put_node(Variant::Anon, Level::Fqdn, "x".into(), node(2));
        c.put_certificate("ab".into(), 3);
        let sizes = c.sizes();
        assert_eq!(sizes.len(), 12);
        assert_eq!(sizes[0], 1);
        assert_eq!(sizes[7], 1);
        assert_eq!(sizes[9], 1);
        assert_eq!(sizes.iter().sum::<usize>(), 3);
    }

    #[test]
    fn zero_capacity_still_holds_one() {
        let mut c = HierarchyCache::new(0);
        c.put_log("L".into(), 1);
        assert_eq!(c.log("L"), Some(1));
    }
}
