//! SQLite persistence for the observation store: schema, batched writes, lookups.

mod open;
mod models;
mod insert;
mod query;
mod schema;

pub use open::Db;
pub use models::*;
pub use insert::*;
pub use schema::MIGRATIONS;
