//! PostgreSQL implementations of the store and catalog capabilities.
//!
//! Uses runtime SQL queries (unchecked) to avoid requiring DATABASE_URL at compile time.

pub mod catalog;
pub mod run;

pub use catalog::PgCatalog;
pub use run::PgStore;

use procura_utils::ProcuraError;

/// Attaches a message to a database error, like `anyhow::Context`.
pub(crate) trait PersistenceContext<T> {
    fn persistence_context(self, message: &str) -> Result<T, ProcuraError>;
}

impl<T> PersistenceContext<T> for Result<T, sqlx::Error> {
    fn persistence_context(self, message: &str) -> Result<T, ProcuraError> {
        self.map_err(|e| ProcuraError::persistence(format!("{}: {}", message, e)))
    }
}

/// Enum columns are stored as their serde names.
pub(crate) fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String, ProcuraError> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, ProcuraError> {
    serde_json::from_str(&format!("\"{}\"", value))
        .map_err(|e| ProcuraError::persistence(format!("Unknown stored value '{}': {}", value, e)))
}
