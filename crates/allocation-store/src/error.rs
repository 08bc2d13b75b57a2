//! Store errors

use thiserror::Error;

/// Errors that can occur when reading ranges or touching the assignment ledger
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness or serialization conflict with another writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A scope lock could not be acquired in time
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data could not be interpreted (e.g., unparseable address)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Range configuration file is malformed
    #[error("Invalid range configuration: {0}")]
    Config(String),
}

/// SQLSTATE codes that mean "another transaction got there first"
const RETRYABLE_SQLSTATES: &[&str] = &[
    "23505", // unique_violation
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

impl StoreError {
    /// Whether retrying the whole transaction may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::LockTimeout(_))
    }

    /// Classify a driver error, turning concurrency failures into `Conflict`/`LockTimeout`
    pub(crate) fn from_db(context: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                if code == "55P03" {
                    return StoreError::LockTimeout(format!("{}: {}", context, db_err.message()));
                }
                if RETRYABLE_SQLSTATES.contains(&code.as_ref()) {
                    return StoreError::Conflict(format!("{}: {}", context, db_err.message()));
                }
            }
        }
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return StoreError::LockTimeout(format!("{}: connection pool timed out", context));
        }
        StoreError::Database(err)
    }
}
