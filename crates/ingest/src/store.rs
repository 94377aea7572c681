use crate::batch::{Batch, StagedEntrada, StagedLogEntry, StagedPassive, StagedZone};
use crate::cache::HierarchyCache;
use crate::cert;
use crate::entry::{CtEntry, ZoneKind};
use crate::error::{Result, StoreError};
use crate::ids::IdAllocator;
use crate::measurement::Measurements;
use crate::node::Variant;
use crate::resolve::{resolve, Resolved};
use collector_core::{Anonymizer, Domain, Level};
use obs_sqlite::{Db, Interrupted};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Staged observations that trigger a commit.
    pub batch_size: usize,
    /// Capacity of each cache map.
    pub cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { batch_size: 1000, cache_size: 10_000 }
    }
}

struct Inner {
    db: Db,
    cache: HierarchyCache,
    batch: Batch,
    ids: IdAllocator,
    measurements: Measurements,
    anonymizer: Anonymizer,
    config: StoreConfig,
}

/// The ingestion store. Every public method holds one store-wide lock for
/// its whole duration, including any commit it triggers.
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    /// Takes a migrated database and restores the id counters from it; the
    /// returned store is ready to accept calls.
    pub fn open(db: Db, config: StoreConfig, anonymizer: Anonymizer) -> Result<Store> {
        let ids = IdAllocator::restore(&db).map_err(StoreError::Database)?;
        debug!(?config, "store ready");
        Ok(Store {
            inner: Mutex::new(Inner {
                db,
                cache: HierarchyCache::new(config.cache_size),
                batch: Batch::default(),
                ids,
                measurements: Measurements::default(),
                anonymizer,
                config,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn start_measurement(&self, _ctx: &CancellationToken, description: &str, host: &str) -> Result<String> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        inner.measurements.start(&inner.db, &mut inner.ids, description, host)
    }

    /// Flushes staged rows, then closes the current stage and the measurement.
    pub fn stop_measurement(&self, ctx: &CancellationToken, muid: &str) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        inner.measurements.check_active(muid)?;
        inner.commit(ctx)?;
        inner.measurements.stop(&inner.db, muid)
    }

    pub fn start_stage(&self, _ctx: &CancellationToken, muid: &str) -> Result<i64> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        inner.measurements.start_stage(&inner.db, &mut inner.ids, muid)
    }

    pub fn stop_stage(&self, ctx: &CancellationToken, muid: &str) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        inner.measurements.check_open_stage(muid)?;
        inner.commit(ctx)?;
        inner.measurements.stop_stage(&inner.db, muid)
    }

    /// Stage a CT log entry. SANs that are not full names are skipped; a
    /// certificate that does not parse fails only this entry.
    pub fn store_log_entry(&self, ctx: &CancellationToken, muid: &str, entry: CtEntry) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let stage_id = inner.measurements.stage_id(muid)?;
        let parsed = cert::parse(&entry.cert_der)?;

        let mut seen = BTreeSet::new();
        let mut fqdns = Vec::new();
        for san in &parsed.sans {
            let domain = match Domain::parse(san) {
                Ok(d) => d,
                Err(e) => {
                    warn!(san = %san, error = %e, "skipping certificate name");
                    continue;
                }
            };
            let Some(fqdn) = domain.fqdn.as_ref().map(|l| l.plain.clone()) else {
                debug!(san = %san, "skipping suffix-only certificate name");
                continue;
            };
            if seen.insert(fqdn.clone()) {
                inner.batch.stage_domain(&inner.cache, Variant::Public, &domain, Level::Fqdn);
                fqdns.push(fqdn);
            }
        }

        inner.batch.stage_log(&entry.log.url, &entry.log.description);
        inner.batch.stage_cert(&inner.cache, &parsed.fingerprint, &entry.cert_der, fqdns);
        inner.batch.push_log_entry(StagedLogEntry {
            fingerprint: parsed.fingerprint,
            log_url: entry.log.url,
            index: entry.index,
            timestamp: entry.timestamp,
            is_precert: entry.is_precert,
            stage_id,
        });
        inner.conditional_post_hooks(ctx)
    }

    pub fn store_passive_entry(
        &self,
        ctx: &CancellationToken,
        muid: &str,
        query: &str,
        query_type: &str,
        timestamp: OffsetDateTime,
    ) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let stage_id = inner.measurements.stage_id(muid)?;
        let domain = Domain::parse(query)?;
        let fqdn = domain.require(Level::Fqdn)?.plain.clone();
        inner.batch.stage_domain(&inner.cache, Variant::Public, &domain, Level::Fqdn);
        inner.batch.push_passive(StagedPassive {
            fqdn,
            record_type: query_type.trim().to_ascii_uppercase(),
            first_seen: timestamp,
            stage_id,
        });
        inner.conditional_post_hooks(ctx)
    }

    /// Entrada observations are kept on the anonymized hierarchy; the public
    /// rows are staged too so every anonymized row can point back to one.
    pub fn store_entrada_entry(
        &self,
        ctx: &CancellationToken,
        muid: &str,
        fqdn: &str,
        first_seen: OffsetDateTime,
        last_seen: OffsetDateTime,
    ) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let stage_id = inner.measurements.stage_id(muid)?;
        let domain = Domain::parse(fqdn)?.anonymized(&inner.anonymizer);
        let fqdn_anon = domain.require(Level::Fqdn)?.anon.clone();
        inner.batch.stage_domain(&inner.cache, Variant::Public, &domain, Level::Fqdn);
        inner.batch.stage_domain(&inner.cache, Variant::Anon, &domain, Level::Fqdn);
        inner.batch.push_entrada(StagedEntrada { fqdn_anon, first_seen, last_seen, stage_id });
        inner.conditional_post_hooks(ctx)
    }

    pub fn store_zone_entry(
        &self,
        ctx: &CancellationToken,
        muid: &str,
        timestamp: OffsetDateTime,
        apex: &str,
        kind: ZoneKind,
    ) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let stage_id = inner.measurements.stage_id(muid)?;
        let domain = Domain::parse(apex)?;
        let apex = domain.require(Level::Apex)?.plain.clone();
        inner.batch.stage_domain(&inner.cache, Variant::Public, &domain, Level::Apex);
        inner.batch.push_zone(StagedZone { apex, kind, timestamp, stage_id });
        inner.conditional_post_hooks(ctx)
    }

    /// Commit whatever is staged, full or not.
    pub fn flush(&self, ctx: &CancellationToken) -> Result<()> {
        self.lock()?.commit(ctx)
    }

    pub fn active_measurements(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.measurements.active())
    }

    pub fn is_active(&self, muid: &str) -> Result<bool> {
        Ok(self.lock()?.measurements.contains(muid))
    }

    /// Observations staged since the last commit.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.batch.len())
    }

    /// Read access to the database under the store lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&Db) -> R) -> Result<R> {
        Ok(f(&self.lock()?.db))
    }
}

impl Inner {
    fn conditional_post_hooks(&mut self, ctx: &CancellationToken) -> Result<()> {
        if self.batch.is_full(self.config.batch_size) {
            self.commit(ctx)?;
        }
        Ok(())
    }

    /// Resolve, write and admit the staged batch. The batch is cleared either
    /// way; on failure the id counters go back to where they were.
    fn commit(&mut self, ctx: &CancellationToken) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let snapshot = self.ids.clone();
        let staged = self.batch.len();
        let result = self.write(ctx);
        self.batch.reset();
        match result {
            Ok(resolved) => {
                self.cache.admit(resolved.admission);
                debug!(staged, counts = ?resolved.inserts.counts(), cache = ?self.cache.sizes(), "batch committed");
                Ok(())
            }
            Err(e) => {
                self.ids = snapshot;
                warn!(staged, error = %e, "batch discarded");
                Err(e)
            }
        }
    }

    fn write(&mut self, ctx: &CancellationToken) -> Result<Resolved> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let resolved = resolve(&self.batch, &mut self.cache, &self.db, &mut self.ids)?;
        self.db.write_batch(&resolved.inserts, || ctx.is_cancelled()).map_err(|e| {
            if e.downcast_ref::<Interrupted>().is_some() {
                StoreError::Cancelled
            } else {
                StoreError::BatchInsert(e)
            }
        })?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(batch_size: usize) -> Store {
        let db = Db::open_in_memory().unwrap();
        Store::open(db, StoreConfig { batch_size, cache_size: 64 }, Anonymizer::identity()).unwrap()
    }

    #[test]
    fn observations_need_an_open_stage() {
        let s = store(10);
        let ctx = CancellationToken::new();
        let t = OffsetDateTime::UNIX_EPOCH;
        assert!(matches!(
            s.store_passive_entry(&ctx, "", "a.com", "A", t),
            Err(StoreError::MissingMeasurementId)
        ));
        let muid = s.start_measurement(&ctx, "d", "h").unwrap();
        s.stop_stage(&ctx, &muid).unwrap();
        assert!(matches!(
            s.store_passive_entry(&ctx, &muid, "a.com", "A", t),
            Err(StoreError::NoActiveStage(_))
        ));
    }

    #[test]
    fn invalid_domains_stage_nothing() {
        let s = store(10);
        let ctx = CancellationToken::new();
        let muid = s.start_measurement(&ctx, "d", "h").unwrap();
        let t = OffsetDateTime::UNIX_EPOCH;
        assert!(matches!(s.store_zone_entry(&ctx, &muid, t, "co.uk", ZoneKind::Registration), Err(StoreError::InvalidDomain(_))));
        assert!(matches!(s.store_passive_entry(&ctx, &muid, "a..com", "A", t), Err(StoreError::InvalidDomain(_))));
        assert_eq!(s.pending().unwrap(), 0);
    }

    #[test]
    fn cancelled_commit_discards_batch() {
        let s = store(10);
        let ctx = CancellationToken::new();
        let muid = s.start_measurement(&ctx, "d", "h").unwrap();
        s.store_passive_entry(&ctx, &muid, "a.com", "A", OffsetDateTime::UNIX_EPOCH).unwrap();
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(matches!(s.flush(&cancelled), Err(StoreError::Cancelled)));
        assert_eq!(s.pending().unwrap(), 0);
        let n = s.inspect(|db| db.count(obs_sqlite::Table::Fqdn).unwrap()).unwrap();
        assert_eq!(n, 0);
        // the measurement stays open after a failed commit
        assert!(s.is_active(&muid).unwrap());
    }
}
