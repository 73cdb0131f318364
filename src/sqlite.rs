use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql};
use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::clock::{self, ClockSource, MonotonicClock, SystemClock};
use crate::error::{Error, Result};
use crate::schema::{ColumnDefinition, DataType, Schema};
use crate::statement::{Delete, Insert, Select, Update};

/// Path that opens a private in-memory database instead of a file.
pub const MEMORY_PATH: &str = ":memory:";

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    /// Fixed-point value of a NUMERIC column, already at the column's scale.
    Decimal(Decimal),
    /// Naive UTC timestamp of a DATETIME column.
    #[serde(serialize_with = "serialize_timestamp")]
    Timestamp(NaiveDateTime),
}

/// Timestamps serialize in the layout the store holds them in.
fn serialize_timestamp<S: Serializer>(
    ts: &NaiveDateTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&clock::format_timestamp(ts))
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Read a stored value back according to the column's declared type.
    pub(crate) fn decode(value: ValueRef<'_>, column: &ColumnDefinition) -> Result<Value> {
        let corrupted = |reason: String| Error::InvalidValue {
            column: column.name.clone(),
            reason,
        };
        let text = |bytes: &[u8]| {
            std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| corrupted(format!("invalid utf-8: {e}")))
        };
        let value = match (column.data_type, value) {
            (_, ValueRef::Null) => Value::Null,
            (DataType::Numeric { scale, .. }, ValueRef::Integer(i)) => {
                Value::Decimal(rescale(Decimal::from(i), scale))
            }
            (DataType::Numeric { scale, .. }, ValueRef::Real(r)) => {
                let d = decimal_from_f64(r).ok_or_else(|| corrupted(format!("'{r}' is not a number")))?;
                Value::Decimal(rescale(d, scale))
            }
            (DataType::Numeric { scale, .. }, ValueRef::Text(bytes)) => {
                let s = text(bytes)?;
                let d = parse_decimal(&s).ok_or_else(|| corrupted(format!("'{s}' is not a number")))?;
                Value::Decimal(rescale(d, scale))
            }
            (DataType::DateTime, ValueRef::Text(bytes)) => {
                let s = text(bytes)?;
                let ts = clock::parse_timestamp(&s)
                    .ok_or_else(|| corrupted(format!("'{s}' is not a timestamp")))?;
                Value::Timestamp(ts)
            }
            (_, ValueRef::Integer(i)) => Value::Integer(i),
            (_, ValueRef::Real(r)) => Value::Real(r),
            (_, ValueRef::Text(bytes)) => Value::Text(text(bytes)?),
            (_, ValueRef::Blob(bytes)) => Value::Blob(bytes.to_vec()),
        };
        Ok(value)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(SqlValue::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Decimal(d) => ToSqlOutput::Owned(SqlValue::Text(d.to_string())),
            Value::Timestamp(ts) => ToSqlOutput::Owned(SqlValue::Text(clock::format_timestamp(ts))),
        };
        Ok(output)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

pub(crate) fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text.trim()).ok()
}

/// Goes through the shortest round-trip text form so `0.1` stays `0.1`.
pub(crate) fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        parse_decimal(&value.to_string())
    } else {
        None
    }
}

/// Round half away from zero to `scale` fractional digits and pad to exactly that many.
pub(crate) fn rescale(value: Decimal, scale: u8) -> Decimal {
    let scale = u32::from(scale);
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// A row read back from the store, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Parameter bindings for SQL queries
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params {
    pub values: BTreeMap<String, Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a named value
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }
}

/// SQL Query with typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Run `f` with the params in the `&[(":name", &value)]` form rusqlite binds.
    fn with_bound<T>(
        &self,
        f: impl FnOnce(&[(&str, &dyn ToSql)]) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let names: Vec<String> = self.params.values.keys().map(|k| format!(":{k}")).collect();
        let bound: Vec<(&str, &dyn ToSql)> = names
            .iter()
            .zip(self.params.values.values())
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        f(&bound)
    }
}

/// Query operators for building advanced queries
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Like(String),
    In(Vec<Value>),
}

/// Conjunction of per-field conditions, rendered in field-name order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Query {
    pub conditions: BTreeMap<String, QueryOperator>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_condition(mut self, field: &str, op: QueryOperator) -> Self {
        self.conditions.insert(field.to_string(), op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// CRUD operation types
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOperation {
    pub table: String,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOperation {
    pub table: String,
    pub query: Query,
    pub fields: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order_by: Option<Vec<(String, bool)>>, // (field, is_ascending)
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub table: String,
    pub query: Query,
    pub updates: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOperation {
    pub table: String,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrudOperation {
    Create(CreateOperation),
    Read(ReadOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
}

impl CrudOperation {
    pub fn table(&self) -> &str {
        match self {
            CrudOperation::Create(op) => &op.table,
            CrudOperation::Read(op) => &op.table,
            CrudOperation::Update(op) => &op.table,
            CrudOperation::Delete(op) => &op.table,
        }
    }
}

/// Result of [`SqliteService::execute_crud`].
#[derive(Debug, Clone, PartialEq)]
pub enum CrudOutcome {
    /// Rowid of the new row, and the row itself when the table has a rowid key.
    Inserted { rowid: i64, row: Option<Row> },
    Rows(Vec<Row>),
    Affected(usize),
}

/// SQLite Service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    /// Schema definition for the database
    pub schema: Schema,
    /// Whether the connection enforces foreign keys
    pub foreign_keys: bool,
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<String>, schema: Schema) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
            foreign_keys: true,
        }
    }

    pub fn in_memory(schema: Schema) -> Self {
        Self::new(MEMORY_PATH, schema)
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

/// A connection to one SQLite store plus the schema it holds.
pub struct SqliteService<C: ClockSource = SystemClock> {
    config: SqliteConfig,
    connection: Connection,
    clock: MonotonicClock<C>,
}

impl SqliteService<SystemClock> {
    /// Open the store described by `config` using wall-clock timestamps.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: ClockSource> SqliteService<C> {
    pub fn with_clock(config: SqliteConfig, source: C) -> Result<Self> {
        info!(
            path = %config.db_path,
            foreign_keys = config.foreign_keys,
            "opening sqlite store"
        );
        let connection = if config.db_path == MEMORY_PATH {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.db_path)?
        };
        connection.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        Ok(Self {
            config,
            connection,
            clock: MonotonicClock::with_source(source),
        })
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.config.schema
    }

    /// The underlying connection, for statements the builders do not cover.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn clock(&self) -> &MonotonicClock<C> {
        &self.clock
    }

    pub fn foreign_keys_enabled(&self) -> Result<bool> {
        let enabled = self
            .connection
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        Ok(enabled)
    }

    /// Ensure every table of the schema exists. Safe to call on an initialized store.
    pub fn create_all(&self) -> Result<()> {
        let schema = &self.config.schema;
        schema.validate()?;
        let script = schema.create_script();
        debug!(%script, "applying schema");
        self.connection.execute_batch(&script)?;
        info!(tables = schema.tables.len(), "schema ready");
        Ok(())
    }

    /// Names of the user tables present in the store, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.connection.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Execute a compiled statement, returning the number of changed rows.
    pub fn execute(&self, query: &SqlQuery) -> Result<usize> {
        debug!(sql = %query.statement, "executing statement");
        let mut stmt = self.connection.prepare_cached(&query.statement)?;
        let changed = query.with_bound(|params| stmt.execute(params))?;
        Ok(changed)
    }

    /// Run a compiled SELECT whose result columns are exactly `columns`.
    pub fn query_rows(&self, query: &SqlQuery, columns: &[&ColumnDefinition]) -> Result<Vec<Row>> {
        debug!(sql = %query.statement, "querying rows");
        let mut stmt = self.connection.prepare_cached(&query.statement)?;
        let raw = query.with_bound(|params| {
            let mut rows = stmt.query(params)?;
            let mut raw = Vec::new();
            while let Some(row) = rows.next()? {
                let values = (0..columns.len())
                    .map(|i| row.get_ref(i).map(SqlValue::from))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                raw.push(values);
            }
            Ok(raw)
        })?;

        raw.into_iter()
            .map(|values| {
                columns
                    .iter()
                    .zip(values.iter())
                    .map(|(column, value)| {
                        Ok((column.name.clone(), Value::decode(value.into(), column)?))
                    })
                    .collect::<Result<Row>>()
            })
            .collect()
    }

    /// Insert one row and return its rowid.
    pub fn insert(&self, insert: &Insert<'_>) -> Result<i64> {
        let query = insert.compile(&self.clock)?;
        self.execute(&query)?;
        Ok(self.connection.last_insert_rowid())
    }

    pub fn update(&self, update: &Update<'_>) -> Result<usize> {
        let query = update.compile(&self.clock)?;
        self.execute(&query)
    }

    pub fn select(&self, select: &Select<'_>) -> Result<Vec<Row>> {
        let query = select.compile()?;
        let columns = select.result_columns()?;
        self.query_rows(&query, &columns)
    }

    pub fn delete(&self, delete: &Delete<'_>) -> Result<usize> {
        let query = delete.compile()?;
        self.execute(&query)
    }

    /// Perform a CRUD operation against a table of the configured schema.
    pub fn execute_crud(&self, op: CrudOperation) -> Result<CrudOutcome> {
        let table = self.config.schema.require_table(op.table())?;
        match op {
            CrudOperation::Create(create) => {
                let insert = create
                    .data
                    .into_iter()
                    .fold(Insert::new(table), |insert, (column, value)| {
                        insert.value(column, value)
                    });
                let rowid = self.insert(&insert)?;
                let row = match table.rowid_column() {
                    Some(key) => {
                        let query = Query::new()
                            .with_condition(&key.name, QueryOperator::Equal(Value::Integer(rowid)));
                        self.select(&Select::new(table).filter(query))?.into_iter().next()
                    }
                    None => None,
                };
                Ok(CrudOutcome::Inserted { rowid, row })
            }
            CrudOperation::Read(read) => {
                let mut select = Select::new(table).filter(read.query);
                if let Some(fields) = read.fields {
                    select = select.fields(fields);
                }
                for (field, ascending) in read.order_by.unwrap_or_default() {
                    select = select.order_by(field, ascending);
                }
                if let Some(limit) = read.limit {
                    select = select.limit(limit);
                }
                if let Some(offset) = read.offset {
                    select = select.offset(offset);
                }
                Ok(CrudOutcome::Rows(self.select(&select)?))
            }
            CrudOperation::Update(update) => {
                let update = update
                    .updates
                    .into_iter()
                    .fold(Update::new(table), |update, (column, value)| {
                        update.set(column, value)
                    })
                    .filter(update.query);
                Ok(CrudOutcome::Affected(self.update(&update)?))
            }
            CrudOperation::Delete(delete) => {
                let delete = Delete::new(table).filter(delete.query);
                Ok(CrudOutcome::Affected(self.delete(&delete)?))
            }
        }
    }
}
