//! Turns a staged batch into concrete rows.
//!
//! Every staged name is resolved to an id from the cache, then the database,
//! and otherwise allocated; observations are then rewritten against those ids.
//! Nothing here writes to the database, and the cache only receives rows that
//! were already committed. Rows created by this batch are handed back in an
//! [`Admission`] for the caller to admit once the transaction commits.

use crate::batch::Batch;
use crate::cache::{Admission, HierarchyCache, PassiveRecord, PassiveRows};
use crate::entry::ZoneKind;
use crate::error::{Result, StoreError};
use crate::ids::IdAllocator;
use crate::node::{self, Node, Variant};
use collector_core::Level;
use obs_sqlite::*;
use std::collections::{BTreeSet, HashMap};

pub struct Resolved {
    pub inserts: Inserts,
    pub admission: Admission,
}

type Known = [[HashMap<String, Node>; 4]; 2];

fn db_err(e: anyhow::Error) -> StoreError {
    StoreError::Database(e)
}

fn missing(what: &str, key: &str) -> StoreError {
    StoreError::Resolver(format!("no id for {what} {key:?}"))
}

pub fn resolve(batch: &Batch, cache: &mut HierarchyCache, db: &Db, ids: &mut IdAllocator) -> Result<Resolved> {
    let mut inserts = Inserts::default();
    let mut admission = Admission::default();

    let known = resolve_hierarchy(batch, cache, db, ids, &mut inserts, &mut admission)?;
    let logs = resolve_logs(batch, cache, db, ids, &mut inserts, &mut admission)?;
    let certs = resolve_certs(batch, cache, db, ids, &known, &mut inserts, &mut admission)?;
    let record_types = resolve_record_types(batch, cache, db, ids, &mut inserts, &mut admission)?;

    let fqdns = &known[Variant::Public.index()][Level::Fqdn.index()];
    let apexes = &known[Variant::Public.index()][Level::Apex.index()];
    let anon_fqdns = &known[Variant::Anon.index()][Level::Fqdn.index()];

    for e in &batch.log_entries {
        let certificate_id = *certs.get(&e.fingerprint).ok_or_else(|| missing("certificate", &e.fingerprint))?;
        let log_id = *logs.get(&e.log_url).ok_or_else(|| missing("log", &e.log_url))?;
        inserts.log_entry.push(LogEntry {
            id: ids.next(Table::LogEntry),
            index: e.index,
            timestamp: e.timestamp,
            is_precert: e.is_precert,
            certificate_id,
            log_id,
            stage_id: e.stage_id,
        });
    }

    resolve_passive(batch, cache, db, ids, fqdns, &record_types, &mut inserts, &mut admission)?;

    for e in &batch.entrada {
        let fqdn_anon_id = anon_fqdns.get(&e.fqdn_anon).ok_or_else(|| missing("anonymized fqdn", &e.fqdn_anon))?.id;
        inserts.entrada_entry.push(EntradaEntry {
            id: ids.next(Table::EntradaEntry),
            fqdn_anon_id,
            first_seen: e.first_seen,
            last_seen: e.last_seen,
            stage_id: e.stage_id,
        });
    }

    for e in &batch.zone {
        let apex_id = apexes.get(&e.apex).ok_or_else(|| missing("apex", &e.apex))?.id;
        let (registered, expired, first_seen) = match e.kind {
            ZoneKind::Registration => (Some(e.timestamp), None, None),
            ZoneKind::Expiration => (None, Some(e.timestamp), None),
            ZoneKind::FirstSeen => (None, None, Some(e.timestamp)),
        };
        inserts.zonefile_entry.push(ZonefileEntry {
            id: ids.next(Table::ZonefileEntry),
            apex_id,
            registered,
            expired,
            first_seen,
            stage_id: e.stage_id,
        });
    }

    check(&inserts)?;
    Ok(Resolved { inserts, admission })
}

/// Public levels first so anonymized rows can point back at them, then
/// tld to fqdn within each variant so parents always resolve first.
fn resolve_hierarchy(
    batch: &Batch,
    cache: &mut HierarchyCache,
    db: &Db,
    ids: &mut IdAllocator,
    inserts: &mut Inserts,
    admission: &mut Admission,
) -> Result<Known> {
    let mut known: Known = Default::default();
    for variant in Variant::ALL {
        for level in Level::ALL {
            let staged = batch.staged(variant, level);
            if staged.is_empty() {
                continue;
            }
            let mut lookup = Vec::new();
            for (name, s) in staged {
                if !s.create {
                    if let Some(n) = cache.node(variant, level, name) {
                        known[variant.index()][level.index()].insert(name.clone(), n);
                        continue;
                    }
                }
                lookup.push(name.clone());
            }
            for (name, n) in node::fetch(db, variant, level, &lookup).map_err(db_err)? {
                cache.put_node(variant, level, name.clone(), n);
                known[variant.index()][level.index()].insert(name, n);
            }
            for name in lookup {
                if known[variant.index()][level.index()].contains_key(&name) {
                    continue;
                }
                let domain = &staged[&name].domain;
                let mut n = Node { id: 0, parents: [0; 3], public_id: 0 };
                for parent in Level::ALL.into_iter().take(level.index()) {
                    let pname = variant.name(domain, parent).ok_or_else(|| missing("parent of", &name))?;
                    let p = known[variant.index()][parent.index()].get(pname).ok_or_else(|| missing(&format!("{parent}"), pname))?;
                    n.parents[parent.index()] = p.id;
                }
                consistent(&known[variant.index()], domain, variant, level, &n)?;
                if variant == Variant::Anon {
                    let plain = Variant::Public.name(domain, level).ok_or_else(|| missing("public row of", &name))?;
                    n.public_id = known[Variant::Public.index()][level.index()]
                        .get(plain)
                        .ok_or_else(|| missing("public row of", &name))?
                        .id;
                }
                n.id = ids.next(variant.table(level));
                node::push_row(inserts, variant, level, &name, &n);
                admission.nodes.push((variant, level, name.clone(), n));
                known[variant.index()][level.index()].insert(name, n);
            }
        }
    }
    Ok(known)
}

/// Every ancestor of a new row must share the row's own view of the levels above it.
fn consistent(
    known: &[HashMap<String, Node>; 4],
    domain: &collector_core::Domain,
    variant: Variant,
    level: Level,
    n: &Node,
) -> Result<()> {
    for parent in Level::ALL.into_iter().take(level.index()) {
        let Some(p) = variant.name(domain, parent).and_then(|name| known[parent.index()].get(name)) else {
            return Err(missing(&format!("{parent}"), variant.name(domain, level).unwrap_or_default()));
        };
        for above in Level::ALL.into_iter().take(parent.index()) {
            if p.parent(above) != n.parent(above) {
                return Err(StoreError::Resolver(format!(
                    "{level} {:?} disagrees with its {parent} on the {above} id",
                    variant.name(domain, level).unwrap_or_default()
                )));
            }
        }
    }
    Ok(())
}

fn resolve_logs(
    batch: &Batch,
    cache: &mut HierarchyCache,
    db: &Db,
    ids: &mut IdAllocator,
    inserts: &mut Inserts,
    admission: &mut Admission,
) -> Result<HashMap<String, Id>> {
    let mut known = HashMap::new();
    let mut lookup = Vec::new();
    for url in batch.logs.keys() {
        match cache.log(url) {
            Some(id) => {
                known.insert(url.clone(), id);
            }
            None => lookup.push(url.clone()),
        }
    }
    for (url, id) in db.log_ids_by_url(&lookup).map_err(db_err)? {
        cache.put_log(url.clone(), id);
        known.insert(url, id);
    }
    for url in lookup {
        if known.contains_key(&url) {
            continue;
        }
        let id = ids.next(Table::Log);
        let description = batch.logs.get(&url).cloned().unwrap_or_default();
        inserts.log.push(Log { id, url: url.clone(), description });
        admission.logs.push((url.clone(), id));
        known.insert(url, id);
    }
    Ok(known)
}

/// `CertificateToFqdn` rows are written only alongside a new certificate row.
#[allow(clippy::too_many_arguments)]
fn resolve_certs(
    batch: &Batch,
    cache: &mut HierarchyCache,
    db: &Db,
    ids: &mut IdAllocator,
    hierarchy: &Known,
    inserts: &mut Inserts,
    admission: &mut Admission,
) -> Result<HashMap<String, Id>> {
    let fqdns = &hierarchy[Variant::Public.index()][Level::Fqdn.index()];
    let mut known = HashMap::new();
    let mut lookup = Vec::new();
    for (fp, c) in &batch.certs {
        if !c.create {
            if let Some(id) = cache.certificate(fp) {
                known.insert(fp.clone(), id);
                continue;
            }
        }
        lookup.push(fp.clone());
    }
    for (fp, id) in db.certificate_ids_by_fingerprint(&lookup).map_err(db_err)? {
        cache.put_certificate(fp.clone(), id);
        known.insert(fp, id);
    }
    for fp in lookup {
        if known.contains_key(&fp) {
            continue;
        }
        let Some(c) = batch.certs.get(&fp) else { continue };
        let id = ids.next(Table::Certificate);
        inserts.certificate.push(Certificate { id, sha256_fingerprint: fp.clone(), raw: c.der.clone() });
        for fqdn in &c.fqdns {
            let fqdn_id = fqdns.get(fqdn).ok_or_else(|| missing("fqdn", fqdn))?.id;
            inserts.certificate_to_fqdn.push(CertificateToFqdn {
                id: ids.next(Table::CertificateToFqdn),
                certificate_id: id,
                fqdn_id,
            });
        }
        admission.certificates.push((fp.clone(), id));
        known.insert(fp, id);
    }
    Ok(known)
}

fn resolve_record_types(
    batch: &Batch,
    cache: &mut HierarchyCache,
    db: &Db,
    ids: &mut IdAllocator,
    inserts: &mut Inserts,
    admission: &mut Admission,
) -> Result<HashMap<String, Id>> {
    let mut known = HashMap::new();
    let mut lookup = Vec::new();
    for name in &batch.record_types {
        match cache.record_type(name) {
            Some(id) => {
                known.insert(name.clone(), id);
            }
            None => lookup.push(name.clone()),
        }
    }
    for (name, id) in db.record_type_ids_by_name(&lookup).map_err(db_err)? {
        cache.put_record_type(name.clone(), id);
        known.insert(name, id);
    }
    for name in lookup {
        if known.contains_key(&name) {
            continue;
        }
        let id = ids.next(Table::RecordType);
        inserts.record_type.push(RecordType { id, kind: name.clone() });
        admission.record_types.push((name.clone(), id));
        known.insert(name, id);
    }
    Ok(known)
}

/// Passive rows are keyed by (fqdn, record type). A staged observation either
/// creates the row, moves an existing `first_seen` back, or changes nothing.
#[allow(clippy::too_many_arguments)]
fn resolve_passive(
    batch: &Batch,
    cache: &mut HierarchyCache,
    db: &Db,
    ids: &mut IdAllocator,
    fqdns: &HashMap<String, Node>,
    record_types: &HashMap<String, Id>,
    inserts: &mut Inserts,
    admission: &mut Admission,
) -> Result<()> {
    if batch.passive.is_empty() {
        return Ok(());
    }
    let mut staged = Vec::with_capacity(batch.passive.len());
    for e in &batch.passive {
        let fqdn_id = fqdns.get(&e.fqdn).ok_or_else(|| missing("fqdn", &e.fqdn))?.id;
        let rt_id = *record_types.get(&e.record_type).ok_or_else(|| missing("record type", &e.record_type))?;
        staged.push((fqdn_id, rt_id, e));
    }

    let touched: BTreeSet<Id> = staged.iter().map(|(f, _, _)| *f).collect();
    let mut view: HashMap<Id, PassiveRows> = HashMap::new();
    let mut lookup = Vec::new();
    for fqdn_id in touched {
        match cache.passive(fqdn_id) {
            Some(rows) => {
                view.insert(fqdn_id, rows.clone());
            }
            None => {
                view.insert(fqdn_id, PassiveRows::new());
                lookup.push(fqdn_id);
            }
        }
    }
    for row in db.passive_entries_by_fqdn(&lookup).map_err(db_err)? {
        view.entry(row.fqdn_id)
            .or_default()
            .insert(row.record_type_id, PassiveRecord { id: row.id, first_seen: row.first_seen });
    }

    for (fqdn_id, rt_id, e) in staged {
        let rows = view.entry(fqdn_id).or_default();
        match rows.get_mut(&rt_id) {
            Some(rec) if e.first_seen < rec.first_seen => {
                rec.first_seen = e.first_seen;
                inserts.passive_update.push(PassiveUpdate { id: rec.id, first_seen: e.first_seen });
            }
            Some(_) => {}
            None => {
                let id = ids.next(Table::PassiveEntry);
                inserts.passive_entry.push(PassiveEntry {
                    id,
                    fqdn_id,
                    record_type_id: rt_id,
                    first_seen: e.first_seen,
                    stage_id: e.stage_id,
                });
                rows.insert(rt_id, PassiveRecord { id, first_seen: e.first_seen });
            }
        }
    }
    admission.passive.extend(view);
    Ok(())
}

/// Last line of defence before the transaction: no row may carry a zero reference.
fn check(ins: &Inserts) -> Result<()> {
    let zero = |table: &str, id: Id| StoreError::Resolver(format!("{table} row {id} has an unresolved reference"));
    for r in &ins.public_suffix {
        if r.tld_id == 0 {
            return Err(zero("public_suffix", r.id));
        }
    }
    for r in &ins.apex {
        if r.tld_id == 0 || r.public_suffix_id == 0 {
            return Err(zero("apex", r.id));
        }
    }
    for r in &ins.fqdn {
        if r.tld_id == 0 || r.public_suffix_id == 0 || r.apex_id == 0 {
            return Err(zero("fqdn", r.id));
        }
    }
    for r in &ins.tld_anon {
        if r.tld_id == 0 {
            return Err(zero("tld_anon", r.id));
        }
    }
    for r in &ins.public_suffix_anon {
        if r.public_suffix_id == 0 || r.tld_anon_id == 0 {
            return Err(zero("public_suffix_anon", r.id));
        }
    }
    for r in &ins.apex_anon {
        if r.apex_id == 0 || r.tld_anon_id == 0 || r.public_suffix_anon_id == 0 {
            return Err(zero("apex_anon", r.id));
        }
    }
    for r in &ins.fqdn_anon {
        if r.fqdn_id == 0 || r.tld_anon_id == 0 || r.public_suffix_anon_id == 0 || r.apex_anon_id == 0 {
            return Err(zero("fqdn_anon", r.id));
        }
    }
    for r in &ins.log_entry {
        if r.certificate_id == 0 || r.log_id == 0 || r.stage_id == 0 {
            return Err(zero("log_entry", r.id));
        }
    }
    for r in &ins.passive_entry {
        if r.fqdn_id == 0 || r.record_type_id == 0 || r.stage_id == 0 {
            return Err(zero("passive_entry", r.id));
        }
    }
    for r in &ins.entrada_entry {
        if r.fqdn_anon_id == 0 || r.stage_id == 0 {
            return Err(zero("entrada_entry", r.id));
        }
    }
    for r in &ins.zonefile_entry {
        if r.apex_id == 0 || r.stage_id == 0 {
            return Err(zero("zonefile_entry", r.id));
        }
    }
    Ok(())
}
