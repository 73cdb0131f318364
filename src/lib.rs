//! Schema catalog and SQLite store for the cookie shop tables.
//!
//! # Intention
//!
//! - Declare the `cookies`, `users`, `orders` and `line_items` tables as a
//!   typed metadata catalog.
//! - Materialize the catalog in a SQLite file, idempotently.
//! - Render and execute simple insert/update/select/delete statements against
//!   the catalog, with client-side defaults and value coercion.
//!
//! # Architectural Boundaries
//!
//! - Only schema and SQLite code belongs here.
//! - No query engine, no migrations, no transaction management.

pub mod clock;
pub mod config;
pub mod cookies;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod statement;

pub use clock::{ClockSource, MonotonicClock, SystemClock};
pub use config::Settings;
pub use error::{ConstraintKind, Error, Result};
pub use schema::{
    ColumnConstraint, ColumnDefinition, DataType, DefaultValue, ForeignKey, ForeignKeyAction,
    IndexDefinition, Schema, TableDefinition,
};
pub use sqlite::{
    CrudOperation, CrudOutcome, Params, Query, QueryOperator, Row, SqlQuery, SqliteConfig,
    SqliteService, Value,
};
pub use statement::{Delete, Insert, Select, Update};
