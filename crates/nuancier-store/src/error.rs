use nuancier_shared::ParseEnumError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The referenced group / color / image / user does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Rejected input: empty name, malformed or foreign reorder list, ...
    #[error("Validation error: {0}")]
    Validation(String),

    /// A color with the same name (case-insensitive) already exists in the
    /// target group scope.
    #[error("A color named {name:?} already exists in this group")]
    DuplicateName { name: String },

    /// A concurrent writer kept winning the race for a unique slug, or a
    /// unique constraint failed for a reason the caller cannot fix.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The write would break an account-level guarantee (last admin, ...).
    #[error("{0}")]
    IntegrityGuard(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

impl From<ParseEnumError> for StoreError {
    fn from(e: ParseEnumError) -> Self {
        StoreError::Validation(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map `QueryReturnedNoRows` to [`StoreError::NotFound`] for `entity`.
pub(crate) fn not_found(entity: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(entity),
        other => StoreError::Sqlite(other),
    }
}

/// The SQLite message of a UNIQUE constraint failure, if `err` is one.
///
/// Column constraints report `UNIQUE constraint failed: table.column`,
/// expression indexes report `UNIQUE constraint failed: index 'name'`.
pub(crate) fn unique_violation(err: &StoreError) -> Option<&str> {
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, msg))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Some(msg.as_deref().unwrap_or(""))
        }
        _ => None,
    }
}
