use crate::models::*;
use crate::Db;
use anyhow::{bail, Result};
use collector_core::timestamp::{opt_to_unix_ms, to_unix_ms};
use rusqlite::{params, Transaction};
use time::OffsetDateTime;
use tracing::debug;

/// Returned (wrapped in `anyhow`) when the cancel hook fires mid-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("batch write interrupted")
    }
}

impl std::error::Error for Interrupted {}

impl Db {
    pub fn insert_measurement(&self, m: &Measurement) -> Result<()> {
        self.conn.execute(
            "INSERT INTO measurement(id, muid, description, host, start_time, end_time) VALUES (?,?,?,?,?,?)",
            params![m.id, m.muid, m.description, m.host, to_unix_ms(m.start), m.end.map(to_unix_ms)],
        )?;
        Ok(())
    }

    pub fn finish_measurement(&self, id: Id, end: OffsetDateTime) -> Result<()> {
        let n = self.conn.execute("UPDATE measurement SET end_time=? WHERE id=?", params![to_unix_ms(end), id])?;
        if n != 1 {
            bail!("measurement {id} not found");
        }
        Ok(())
    }

    pub fn insert_stage(&self, s: &Stage) -> Result<()> {
        self.conn.execute(
            "INSERT INTO stage(id, measurement_id, stage, start_time, stop_time) VALUES (?,?,?,?,?)",
            params![s.id, s.measurement_id, s.sequence, to_unix_ms(s.start), s.stop.map(to_unix_ms)],
        )?;
        Ok(())
    }

    pub fn finish_stage(&self, id: Id, stop: OffsetDateTime) -> Result<()> {
        let n = self.conn.execute("UPDATE stage SET stop_time=? WHERE id=?", params![to_unix_ms(stop), id])?;
        if n != 1 {
            bail!("stage {id} not found");
        }
        Ok(())
    }

    /// Writes every row of `rows` in one transaction. `cancelled` is polled
    /// before the transaction opens and between tables; when it reports true
    /// the transaction is rolled back and an [`Interrupted`] error returned.
    pub fn write_batch(&mut self, rows: &Inserts, cancelled: impl Fn() -> bool) -> Result<()> {
        if cancelled() {
            return Err(Interrupted.into());
        }
        let tx = self.conn.transaction()?;
        let check = || -> Result<()> {
            if cancelled() {
                return Err(Interrupted.into());
            }
            Ok(())
        };

        write_hierarchy(&tx, rows)?;
        check()?;
        write_ct(&tx, rows)?;
        check()?;
        write_passive(&tx, rows)?;
        check()?;
        write_entrada(&tx, rows)?;
        write_zonefile(&tx, rows)?;
        check()?;

        tx.commit()?;
        debug!(rows = rows.len(), "batch committed");
        Ok(())
    }
}

fn write_hierarchy(tx: &Transaction<'_>, rows: &Inserts) -> Result<()> {
    let mut stmt = tx.prepare_cached("INSERT INTO tld(id, tld) VALUES (?,?)")?;
    for r in &rows.tld {
        stmt.execute(params![r.id, r.tld])?;
    }
    let mut stmt = tx.prepare_cached("INSERT INTO tld_anon(id, tld, tld_id) VALUES (?,?,?)")?;
    for r in &rows.tld_anon {
        stmt.execute(params![r.id, r.tld, r.tld_id])?;
    }
    let mut stmt = tx.prepare_cached("INSERT INTO public_suffix(id, suffix, tld_id) VALUES (?,?,?)")?;
    for r in &rows.public_suffix {
        stmt.execute(params![r.id, r.suffix, r.tld_id])?;
    }
    let mut stmt =
        tx.prepare_cached("INSERT INTO public_suffix_anon(id, suffix, public_suffix_id, tld_anon_id) VALUES (?,?,?,?)")?;
    for r in &rows.public_suffix_anon {
        stmt.execute(params![r.id, r.suffix, r.public_suffix_id, r.tld_anon_id])?;
    }
    let mut stmt = tx.prepare_cached("INSERT INTO apex(id, apex, tld_id, public_suffix_id) VALUES (?,?,?,?)")?;
    for r in &rows.apex {
        stmt.execute(params![r.id, r.apex, r.tld_id, r.public_suffix_id])?;
    }
    let mut stmt = tx.prepare_cached(
        "INSERT INTO apex_anon(id, apex, apex_id, tld_anon_id, public_suffix_anon_id) VALUES (?,?,?,?,?)",
    )?;
    for r in &rows.apex_anon {
        stmt.execute(params![r.id, r.apex, r.apex_id, r.tld_anon_id, r.public_suffix_anon_id])?;
    }
    let mut stmt =
        tx.prepare_cached("INSERT INTO fqdn(id, fqdn, tld_id, public_suffix_id, apex_id) VALUES (?,?,?,?,?)")?;
    for r in &rows.fqdn {
        stmt.execute(params![r.id, r.fqdn, r.tld_id, r.public_suffix_id, r.apex_id])?;
    }
    let mut stmt = tx.prepare_cached(
        "INSERT INTO fqdn_anon(id, fqdn, fqdn_id, tld_anon_id, public_suffix_anon_id, apex_anon_id) VALUES (?,?,?,?,?,?)",
    )?;
    for r in &rows.fqdn_anon {
        stmt.execute(params![r.id, r.fqdn, r.fqdn_id, r.tld_anon_id, r.public_suffix_anon_id, r.apex_anon_id])?;
    }
    Ok(())
}

fn write_ct(tx: &Transaction<'_>, rows: &Inserts) -> Result<()> {
    let mut stmt = tx.prepare_cached("INSERT INTO log(id, url, description) VALUES (?,?,?)")?;
    for r in &rows.log {
        stmt.execute(params![r.id, r.url, r.description])?;
    }
    let mut stmt = tx.prepare_cached("INSERT INTO certificate(id, sha256_fingerprint, raw) VALUES (?,?,?)")?;
    for r in &rows.certificate {
        stmt.execute(params![r.id, r.sha256_fingerprint, r.raw])?;
    }
    let mut stmt = tx.prepare_cached("INSERT INTO certificate_to_fqdn(id, certificate_id, fqdn_id) VALUES (?,?,?)")?;
    for r in &rows.certificate_to_fqdn {
        stmt.execute(params![r.id, r.certificate_id, r.fqdn_id])?;
    }
    let mut stmt = tx.prepare_cached(
        "INSERT INTO log_entry(id, idx, timestamp, is_precert, certificate_id, log_id, stage_id) VALUES (?,?,?,?,?,?,?)",
    )?;
    for r in &rows.log_entry {
        stmt.execute(params![
            r.id,
            r.index,
            to_unix_ms(r.timestamp),
            if r.is_precert { 1i64 } else { 0i64 },
            r.certificate_id,
            r.log_id,
            r.stage_id
        ])?;
    }
    Ok(())
}

fn write_passive(tx: &Transaction<'_>, rows: &Inserts) -> Result<()> {
    let mut stmt = tx.prepare_cached("INSERT INTO record_type(id, type) VALUES (?,?)")?;
    for r in &rows.record_type {
        stmt.execute(params![r.id, r.kind])?;
    }
    let mut stmt = tx.prepare_cached(
        "INSERT INTO passive_entry(id, fqdn_id, record_type_id, first_seen, stage_id) VALUES (?,?,?,?,?)",
    )?;
    for r in &rows.passive_entry {
        stmt.execute(params![r.id, r.fqdn_id, r.record_type_id, to_unix_ms(r.first_seen), r.stage_id])?;
    }
    let mut stmt = tx.prepare_cached("UPDATE passive_entry SET first_seen=? WHERE id=?")?;
    for r in &rows.passive_update {
        stmt.execute(params![to_unix_ms(r.first_seen), r.id])?;
    }
    Ok(())
}

fn write_entrada(tx: &Transaction<'_>, rows: &Inserts) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO entrada_entry(id, fqdn_anon_id, first_seen, last_seen, stage_id) VALUES (?,?,?,?,?)",
    )?;
    for r in &rows.entrada_entry {
        stmt.execute(params![r.id, r.fqdn_anon_id, to_unix_ms(r.first_seen), to_unix_ms(r.last_seen), r.stage_id])?;
    }
    Ok(())
}

fn write_zonefile(tx: &Transaction<'_>, rows: &Inserts) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO zonefile_entry(id, apex_id, registered, expired, first_seen, stage_id) VALUES (?,?,?,?,?,?)",
    )?;
    for r in &rows.zonefile_entry {
        stmt.execute(params![
            r.id,
            r.apex_id,
            opt_to_unix_ms(r.registered),
            opt_to_unix_ms(r.expired),
            opt_to_unix_ms(r.first_seen),
            r.stage_id
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_core::timestamp::from_unix_ms;

    fn seeded() -> Db {
        let db = Db::open_in_memory().unwrap();
        let t0 = from_unix_ms(1_000).unwrap();
        db.insert_measurement(&Measurement {
            id: 1,
            muid: "m".into(),
            description: "d".into(),
            host: "h".into(),
            start: t0,
            end: None,
        })
        .unwrap();
        db.insert_stage(&Stage { id: 1, measurement_id: 1, sequence: 1, start: t0, stop: None }).unwrap();
        db
    }

    fn hierarchy() -> Inserts {
        Inserts {
            tld: vec![Tld { id: 1, tld: "uk".into() }],
            public_suffix: vec![PublicSuffix { id: 1, suffix: "co.uk".into(), tld_id: 1 }],
            apex: vec![Apex { id: 1, apex: "example.co.uk".into(), tld_id: 1, public_suffix_id: 1 }],
            fqdn: vec![Fqdn { id: 1, fqdn: "www.example.co.uk".into(), tld_id: 1, public_suffix_id: 1, apex_id: 1 }],
            ..Default::default()
        }
    }

    #[test]
    fn writes_hierarchy_and_passive_update() {
        let mut db = seeded();
        let mut rows = hierarchy();
        rows.record_type.push(RecordType { id: 1, kind: "A".into() });
        rows.passive_entry.push(PassiveEntry {
            id: 1,
            fqdn_id: 1,
            record_type_id: 1,
            first_seen: from_unix_ms(500).unwrap(),
            stage_id: 1,
        });
        db.write_batch(&rows, || false).unwrap();
        assert_eq!(db.count(Table::Fqdn).unwrap(), 1);
        assert_eq!(db.max_id(Table::PassiveEntry).unwrap(), 1);

        let upd = Inserts {
            passive_update: vec![PassiveUpdate { id: 1, first_seen: from_unix_ms(100).unwrap() }],
            ..Default::default()
        };
        db.write_batch(&upd, || false).unwrap();
        let got = db.passive_entries_by_fqdn(&[1]).unwrap();
        assert_eq!(to_unix_ms(got[0].first_seen), 100);
    }

    #[test]
    fn cancel_rolls_back() {
        let mut db = seeded();
        let calls = std::cell::Cell::new(0);
        let err = db
            .write_batch(&hierarchy(), || {
                calls.set(calls.get() + 1);
                calls.get() > 1
            })
            .unwrap_err();
        assert!(err.downcast_ref::<Interrupted>().is_some());
        assert_eq!(db.count(Table::Tld).unwrap(), 0);
    }

    #[test]
    fn constraint_violation_leaves_nothing() {
        let mut db = seeded();
        db.write_batch(&hierarchy(), || false).unwrap();
        // same tld name under a new id
        let dup = Inserts { tld: vec![Tld { id: 2, tld: "com".into() }, Tld { id: 3, tld: "uk".into() }], ..Default::default() };
        assert!(db.write_batch(&dup, || false).is_err());
        assert_eq!(db.count(Table::Tld).unwrap(), 1);
    }

    #[test]
    fn zonefile_axes_default_to_zero() {
        let mut db = seeded();
        let mut rows = hierarchy();
        rows.zonefile_entry.push(ZonefileEntry {
            id: 1,
            apex_id: 1,
            registered: Some(from_unix_ms(7_000).unwrap()),
            expired: None,
            first_seen: None,
            stage_id: 1,
        });
        db.write_batch(&rows, || false).unwrap();
        let z = db.zonefile_entries().unwrap();
        assert_eq!(z.len(), 1);
        assert_eq!(z[0].expired, None);
        assert_eq!(z[0].registered.map(to_unix_ms), Some(7_000));
    }
}
