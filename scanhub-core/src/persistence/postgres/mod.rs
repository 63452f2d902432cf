//! PostgreSQL implementations of the persistence ports.
//!
//! Enum fields are stored as their canonical SCREAMING_SNAKE_CASE text;
//! the compound atomic operations run inside explicit transactions with a
//! `FOR UPDATE` lock on the rows that carry the invariant.

mod catalog;
mod jobs;
mod results;
mod scans;
mod versions;
mod waivers;

pub use catalog::PostgresCatalogStore;
pub use jobs::PostgresTaskBroker;
pub use results::PostgresResultStore;
pub use scans::PostgresScanStore;
pub use versions::PostgresVersionStore;
pub use waivers::PostgresWaiverStore;

use std::str::FromStr;

use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::error::{HubError, Result};

/// Parse an enum column stored as text.
pub(crate) fn parse_enum<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|err| {
        HubError::Internal(format!("corrupt {column} column: {err}"))
    })
}

/// Decode a JSONB column into a typed value.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    row: &PgRow,
    column: &str,
) -> Result<T> {
    let value: serde_json::Value = row.try_get(column)?;
    Ok(serde_json::from_value(value)?)
}
