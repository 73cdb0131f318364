//! Error types for schema and store operations.

use std::fmt;

use rusqlite::ffi;
use thiserror::Error;

/// The constraint a store-level rejection was raised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    PrimaryKey,
    NotNull,
    ForeignKey,
    Check,
    Trigger,
    Other,
}

impl ConstraintKind {
    fn from_extended_code(code: i32) -> Self {
        match code {
            ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::PrimaryKey,
            ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
            ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
            ffi::SQLITE_CONSTRAINT_TRIGGER => ConstraintKind::Trigger,
            _ => ConstraintKind::Other,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::NotNull => "not-null",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Check => "check",
            ConstraintKind::Trigger => "trigger",
            ConstraintKind::Other => "constraint",
        };
        f.write_str(name)
    }
}

/// All errors raised by the catalog, the statement builders and the store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("{kind} constraint violated: {message}")]
    ConstraintViolation {
        kind: ConstraintKind,
        message: String,
    },

    #[error("unknown table: '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("value for column '{column}' does not fit NUMERIC({precision}, {scale})")]
    NumericOverflow {
        column: String,
        precision: u8,
        scale: u8,
    },

    #[error("column '{0}' cannot be updated")]
    ImmutableColumn(String),

    #[error("update on '{0}' sets no columns")]
    EmptyUpdate(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The violated constraint, if this is a store-level constraint rejection.
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            Error::ConstraintViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation {
                    kind: ConstraintKind::from_extended_code(failure.extended_code),
                    message: message.unwrap_or_else(|| failure.to_string()),
                }
            }
            other => Error::Database(other),
        }
    }
}

/// A specialized Result type for catalog and store operations.
pub type Result<T> = std::result::Result<T, Error>;
