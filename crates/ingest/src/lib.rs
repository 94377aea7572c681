//! Ingestion engine: batch staging, hierarchy resolution and the commit path
//! behind the collector's RPC endpoints.

pub mod batch;
pub mod cache;
pub mod cert;
pub mod entry;
pub mod error;
pub mod ids;
pub mod measurement;
pub mod node;
pub mod resolve;
pub mod store;

pub use entry::{CtEntry, CtLog, ZoneKind};
pub use error::{Result, StoreError};
pub use store::{Store, StoreConfig};
