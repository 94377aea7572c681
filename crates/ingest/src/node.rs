//! Uniform view of a committed hierarchy row, public or anonymized.

use collector_core::{Domain, Level};
use obs_sqlite::*;

/// Which of the two parallel hierarchies a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Public,
    Anon,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Public, Variant::Anon];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// The name `domain` contributes at `level` in this hierarchy.
    pub fn name<'a>(self, domain: &'a Domain, level: Level) -> Option<&'a str> {
        domain.level(level).map(|l| match self {
            Variant::Public => l.plain.as_str(),
            Variant::Anon => l.anon.as_str(),
        })
    }

    pub const fn table(self, level: Level) -> Table {
        match (self, level) {
            (Variant::Public, Level::Tld) => Table::Tld,
            (Variant::Public, Level::PublicSuffix) => Table::PublicSuffix,
            (Variant::Public, Level::Apex) => Table::Apex,
            (Variant::Public, Level::Fqdn) => Table::Fqdn,
            (Variant::Anon, Level::Tld) => Table::TldAnon,
            (Variant::Anon, Level::PublicSuffix) => Table::PublicSuffixAnon,
            (Variant::Anon, Level::Apex) => Table::ApexAnon,
            (Variant::Anon, Level::Fqdn) => Table::FqdnAnon,
        }
    }
}

/// Ids of one hierarchy row. `parents` is indexed by [`Level::index`] and
/// holds 0 at and below the row's own level; parents of an anonymized row
/// are anonymized rows. `public_id` is 0 for public rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Node {
    pub id: Id,
    pub parents: [Id; 3],
    pub public_id: Id,
}

impl Node {
    pub fn parent(&self, level: Level) -> Id {
        self.parents.get(level.index()).copied().unwrap_or(0)
    }
}

impl From<&Tld> for Node {
    fn from(r: &Tld) -> Self {
        Node { id: r.id, parents: [0; 3], public_id: 0 }
    }
}

impl From<&TldAnon> for Node {
    fn from(r: &TldAnon) -> Self {
        Node { id: r.id, parents: [0; 3], public_id: r.tld_id }
    }
}

impl From<&PublicSuffix> for Node {
    fn from(r: &PublicSuffix) -> Self {
        Node { id: r.id, parents: [r.tld_id, 0, 0], public_id: 0 }
    }
}

impl From<&PublicSuffixAnon> for Node {
    fn from(r: &PublicSuffixAnon) -> Self {
        Node { id: r.id, parents: [r.tld_anon_id, 0, 0], public_id: r.public_suffix_id }
    }
}

impl From<&Apex> for Node {
    fn from(r: &Apex) -> Self {
        Node { id: r.id, parents: [r.tld_id, r.public_suffix_id, 0], public_id: 0 }
    }
}

impl From<&ApexAnon> for Node {
    fn from(r: &ApexAnon) -> Self {
        Node { id: r.id, parents: [r.tld_anon_id, r.public_suffix_anon_id, 0], public_id: r.apex_id }
    }
}

impl From<&Fqdn> for Node {
    fn from(r: &Fqdn) -> Self {
        Node { id: r.id, parents: [r.tld_id, r.public_suffix_id, r.apex_id], public_id: 0 }
    }
}

impl From<&FqdnAnon> for Node {
    fn from(r: &FqdnAnon) -> Self {
        Node {
            id: r.id,
            parents: [r.tld_anon_id, r.public_suffix_anon_id, r.apex_anon_id],
            public_id: r.fqdn_id,
        }
    }
}

/// Fetch committed rows of one hierarchy table by name.
pub fn fetch(db: &Db, variant: Variant, level: Level, names: &[String]) -> anyhow::Result<Vec<(String, Node)>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(String, Node)> = match (variant, level) {
        (Variant::Public, Level::Tld) => db.tlds_by_name(names)?.iter().map(|r| (r.tld.clone(), Node::from(r))).collect(),
        (Variant::Public, Level::PublicSuffix) => {
            db.public_suffixes_by_name(names)?.iter().map(|r| (r.suffix.clone(), Node::from(r))).collect()
        }
        (Variant::Public, Level::Apex) => db.apexes_by_name(names)?.iter().map(|r| (r.apex.clone(), Node::from(r))).collect(),
        (Variant::Public, Level::Fqdn) => db.fqdns_by_name(names)?.iter().map(|r| (r.fqdn.clone(), Node::from(r))).collect(),
        (Variant::Anon, Level::Tld) => db.tld_anons_by_name(names)?.iter().map(|r| (r.tld.clone(), Node::from(r))).collect(),
        (Variant::Anon, Level::PublicSuffix) => {
            db.public_suffix_anons_by_name(names)?.iter().map(|r| (r.suffix.clone(), Node::from(r))).collect()
        }
        (Variant::Anon, Level::Apex) => db.apex_anons_by_name(names)?.iter().map(|r| (r.apex.clone(), Node::from(r))).collect(),
        (Variant::Anon, Level::Fqdn) => db.fqdn_anons_by_name(names)?.iter().map(|r| (r.fqdn.clone(), Node::from(r))).collect(),
    };
    Ok(rows)
}

/// Append the insertable row for a freshly allocated node.
pub fn push_row(inserts: &mut Inserts, variant: Variant, level: Level, name: &str, n: &Node) {
    let name = name.to_string();
    let [tld, ps, apex] = n.parents;
    match (variant, level) {
        (Variant::Public, Level::Tld) => inserts.tld.push(Tld { id: n.id, tld: name }),
        (Variant::Public, Level::PublicSuffix) => {
            inserts.public_suffix.push(PublicSuffix { id: n.id, suffix: name, tld_id: tld })
        }
        (Variant::Public, Level::Apex) => {
            inserts.apex.push(Apex { id: n.id, apex: name, tld_id: tld, public_suffix_id: ps })
        }
        (Variant::Public, Level::Fqdn) => inserts.fqdn.push(Fqdn {
            id: n.id,
            fqdn: name,
            tld_id: tld,
            public_suffix_id: ps,
            apex_id: apex,
        }),
        (Variant::Anon, Level::Tld) => inserts.tld_anon.push(TldAnon { id: n.id, tld: name, tld_id: n.public_id }),
        (Variant::Anon, Level::PublicSuffix) => inserts.public_suffix_anon.push(PublicSuffixAnon {
            id: n.id,
            suffix: name,
            public_suffix_id: n.public_id,
            tld_anon_id: tld,
        }),
        (Variant::Anon, Level::Apex) => inserts.apex_anon.push(ApexAnon {
            id: n.id,
            apex: name,
            apex_id: n.public_id,
            tld_anon_id: tld,
            public_suffix_anon_id: ps,
        }),
        (Variant::Anon, Level::Fqdn) => inserts.fqdn_anon.push(FqdnAnon {
            id: n.id,
            fqdn: name,
            fqdn_id: n.public_id,
            tld_anon_id: tld,
            public_suffix_anon_id: ps,
            apex_anon_id: apex,
        }),
    }
}
