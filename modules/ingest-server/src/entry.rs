use collector_core::timestamp::from_unix_ms;
use ingest::{CtEntry, CtLog, Store, ZoneKind};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use wire::{EntradaEntry, LogEntry, PassiveEntry, StreamEntry, ZoneEntry, ZoneType};

use crate::ServeError;

/// A wire entry the store knows how to ingest.
pub trait Ingest: StreamEntry {
    fn ingest(self, store: &Store, ctx: &CancellationToken, muid: &str) -> Result<(), ServeError>;
}

fn ts(ms: i64) -> Result<OffsetDateTime, ServeError> {
    from_unix_ms(ms).map_err(ServeError::Timestamp)
}

impl Ingest for LogEntry {
    fn ingest(self, store: &Store, ctx: &CancellationToken, muid: &str) -> Result<(), ServeError> {
        let entry = CtEntry {
            cert_der: self.cert_der,
            is_precert: self.is_precert,
            index: self.index,
            timestamp: ts(self.timestamp_ms)?,
            log: CtLog { url: self.log.url, description: self.log.description },
        };
        Ok(store.store_log_entry(ctx, muid, entry)?)
    }
}

impl Ingest for PassiveEntry {
    fn ingest(self, store: &Store, ctx: &CancellationToken, muid: &str) -> Result<(), ServeError> {
        let t = ts(self.timestamp_ms)?;
        Ok(store.store_passive_entry(ctx, muid, &self.query, &self.query_type, t)?)
    }
}

impl Ingest for EntradaEntry {
    fn ingest(self, store: &Store, ctx: &CancellationToken, muid: &str) -> Result<(), ServeError> {
        let first = ts(self.timestamp_ms)?;
        let last = ts(self.last_seen_ms.unwrap_or(self.timestamp_ms))?;
        Ok(store.store_entrada_entry(ctx, muid, &self.fqdn, first, last)?)
    }
}

impl Ingest for ZoneEntry {
    fn ingest(self, store: &Store, ctx: &CancellationToken, muid: &str) -> Result<(), ServeError> {
        let kind = match self.kind {
            ZoneType::Registration => ZoneKind::Registration,
            ZoneType::Expiration => ZoneKind::Expiration,
            ZoneType::FirstSeen => ZoneKind::FirstSeen,
        };
        let t = ts(self.timestamp_ms)?;
        Ok(store.store_zone_entry(ctx, muid, t, &self.apex, kind)?)
    }
}
