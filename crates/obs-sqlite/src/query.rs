use crate::models::*;
use crate::Db;
use anyhow::Result;
use collector_core::timestamp;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};
use time::OffsetDateTime;

/// Keys per `IN (...)` statement, well under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;

pub(crate) fn ts(ms: i64) -> rusqlite::Result<OffsetDateTime> {
    timestamp::from_unix_ms(ms).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))
}

fn opt_ts(ms: Option<i64>) -> rusqlite::Result<Option<OffsetDateTime>> {
    match ms {
        Some(ms) => timestamp::opt_from_unix_ms(ms)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e))),
        None => Ok(None),
    }
}

fn select_in<K, T, F>(conn: &Connection, prefix: &str, keys: &[K], mut map: F) -> Result<Vec<T>>
where
    K: ToSql,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut out = Vec::with_capacity(keys.len());
    for chunk in keys.chunks(IN_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("{prefix} ({placeholders})");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), &mut map)?;
        for r in rows {
            out.push(r?);
        }
    }
    Ok(out)
}

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(1) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    /// Largest id in `table`, 0 when empty.
    pub fn max_id(&self, table: Table) -> Result<Id> {
        let sql = format!("SELECT COALESCE(MAX(id), 0) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    pub fn tlds_by_name(&self, names: &[String]) -> Result<Vec<Tld>> {
        select_in(&self.conn, "SELECT id, tld FROM tld WHERE tld IN", names, |r| {
            Ok(Tld { id: r.get(0)?, tld: r.get(1)? })
        })
    }

    pub fn tld_anons_by_name(&self, names: &[String]) -> Result<Vec<TldAnon>> {
        select_in(&self.conn, "SELECT id, tld, tld_id FROM tld_anon WHERE tld IN", names, |r| {
            Ok(TldAnon { id: r.get(0)?, tld: r.get(1)?, tld_id: r.get(2)? })
        })
    }

    pub fn public_suffixes_by_name(&self, names: &[String]) -> Result<Vec<PublicSuffix>> {
        select_in(&self.conn, "SELECT id, suffix, tld_id FROM public_suffix WHERE suffix IN", names, |r| {
            Ok(PublicSuffix { id: r.get(0)?, suffix: r.get(1)?, tld_id: r.get(2)? })
        })
    }

    pub fn public_suffix_anons_by_name(&self, names: &[String]) -> Result<Vec<PublicSuffixAnon>> {
        select_in(
            &self.conn,
            "SELECT id, suffix, public_suffix_id, tld_anon_id FROM public_suffix_anon WHERE suffix IN",
            names,
            |r| Ok(PublicSuffixAnon { id: r.get(0)?, suffix: r.get(1)?, public_suffix_id: r.get(2)?, tld_anon_id: r.get(3)? }),
        )
    }

    pub fn apexes_by_name(&self, names: &[String]) -> Result<Vec<Apex>> {
        select_in(&self.conn, "SELECT id, apex, tld_id, public_suffix_id FROM apex WHERE apex IN", names, |r| {
            Ok(Apex { id: r.get(0)?, apex: r.get(1)?, tld_id: r.get(2)?, public_suffix_id: r.get(3)? })
        })
    }

    pub fn apex_anons_by_name(&self, names: &[String]) -> Result<Vec<ApexAnon>> {
        select_in(
            &self.conn,
            "SELECT id, apex, apex_id, tld_anon_id, public_suffix_anon_id FROM apex_anon WHERE apex IN",
            names,
            |r| {
                Ok(ApexAnon {
                    id: r.get(0)?,
                    apex: r.get(1)?,
                    apex_id: r.get(2)?,
                    tld_anon_id: r.get(3)?,
                    public_suffix_anon_id: r.get(4)?,
                })
            },
        )
    }

    pub fn fqdns_by_name(&self, names: &[String]) -> Result<Vec<Fqdn>> {
        select_in(
            &self.conn,
            "SELECT id, fqdn, tld_id, public_suffix_id, apex_id FROM fqdn WHERE fqdn IN",
            names,
            |r| Ok(Fqdn { id: r.get(0)?, fqdn: r.get(1)?, tld_id: r.get(2)?, public_suffix_id: r.get(3)?, apex_id: r.get(4)? }),
        )
    }

    pub fn fqdn_anons_by_name(&self, names: &[String]) -> Result<Vec<FqdnAnon>> {
        select_in(
            &self.conn,
            "SELECT id, fqdn, fqdn_id, tld_anon_id, public_suffix_anon_id, apex_anon_id FROM fqdn_anon WHERE fqdn IN",
            names,
            |r| {
                Ok(FqdnAnon {
                    id: r.get(0)?,
                    fqdn: r.get(1)?,
                    fqdn_id: r.get(2)?,
                    tld_anon_id: r.get(3)?,
                    public_suffix_anon_id: r.get(4)?,
                    apex_anon_id: r.get(5)?,
                })
            },
        )
    }

    pub fn log_ids_by_url(&self, urls: &[String]) -> Result<Vec<(String, Id)>> {
        select_in(&self.conn, "SELECT url, id FROM log WHERE url IN", urls, |r| Ok((r.get(0)?, r.get(1)?)))
    }

    pub fn certificate_ids_by_fingerprint(&self, fingerprints: &[String]) -> Result<Vec<(String, Id)>> {
        select_in(
            &self.conn,
            "SELECT sha256_fingerprint, id FROM certificate WHERE sha256_fingerprint IN",
            fingerprints,
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
    }

    pub fn record_type_ids_by_name(&self, names: &[String]) -> Result<Vec<(String, Id)>> {
        select_in(&self.conn, "SELECT type, id FROM record_type WHERE type IN", names, |r| Ok((r.get(0)?, r.get(1)?)))
    }

    pub fn passive_entries_by_fqdn(&self, fqdn_ids: &[Id]) -> Result<Vec<PassiveEntry>> {
        select_in(
            &self.conn,
            "SELECT id, fqdn_id, record_type_id, first_seen, stage_id FROM passive_entry WHERE fqdn_id IN",
            fqdn_ids,
            |r| {
                Ok(PassiveEntry {
                    id: r.get(0)?,
                    fqdn_id: r.get(1)?,
                    record_type_id: r.get(2)?,
                    first_seen: ts(r.get(3)?)?,
                    stage_id: r.get(4)?,
                })
            },
        )
    }

    pub fn entrada_entries(&self) -> Result<Vec<EntradaEntry>> {
        let mut stmt = self.conn.prepare("SELECT id, fqdn_anon_id, first_seen, last_seen, stage_id FROM entrada_entry ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(EntradaEntry {
                id: r.get(0)?,
                fqdn_anon_id: r.get(1)?,
                first_seen: ts(r.get(2)?)?,
                last_seen: ts(r.get(3)?)?,
                stage_id: r.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn zonefile_entries(&self) -> Result<Vec<ZonefileEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, apex_id, registered, expired, first_seen, stage_id FROM zonefile_entry ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(ZonefileEntry {
                id: r.get(0)?,
                apex_id: r.get(1)?,
                registered: opt_ts(r.get(2)?)?,
                expired: opt_ts(r.get(3)?)?,
                first_seen: opt_ts(r.get(4)?)?,
                stage_id: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn measurement_by_muid(&self, muid: &str) -> Result<Option<Measurement>> {
        let m = self
            .conn
            .query_row(
                "SELECT id, muid, description, host, start_time, end_time FROM measurement WHERE muid=?",
                [muid],
                |r| {
                    Ok(Measurement {
                        id: r.get(0)?,
                        muid: r.get(1)?,
                        description: r.get(2)?,
                        host: r.get(3)?,
                        start: ts(r.get(4)?)?,
                        end: r.get::<_, Option<i64>>(5)?.map(ts).transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(m)
    }

    pub fn stages_of(&self, measurement_id: Id) -> Result<Vec<Stage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, measurement_id, stage, start_time, stop_time FROM stage WHERE measurement_id=? ORDER BY stage",
        )?;
        let rows = stmt.query_map(params![measurement_id], |r| {
            Ok(Stage {
                id: r.get(0)?,
                measurement_id: r.get(1)?,
                sequence: r.get(2)?,
                start: ts(r.get(3)?)?,
                stop: r.get::<_, Option<i64>>(4)?.map(ts).transpose()?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
