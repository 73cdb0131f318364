//! Table metadata catalog and its DDL rendering.
//!
//! A [`Schema`] is an ordered list of [`TableDefinition`]s. Every statement it
//! renders uses `IF NOT EXISTS`, so applying the same schema twice is a no-op.

use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};

/// Schema definition for the SQLite database
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up a table, failing with [`Error::UnknownTable`].
    pub fn require_table(&self, name: &str) -> Result<&TableDefinition> {
        self.table(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Check that every key, index and reference names something declared.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "table '{}' declared twice",
                    table.name
                )));
            }
            table.validate()?;
            for fk in &table.foreign_keys {
                let target = self.table(&fk.foreign_table).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "{}.{} references unknown table '{}'",
                        table.name, fk.column, fk.foreign_table
                    ))
                })?;
                if target.column_def(&fk.foreign_column).is_none() {
                    return Err(Error::InvalidSchema(format!(
                        "{}.{} references unknown column {}.{}",
                        table.name, fk.column, fk.foreign_table, fk.foreign_column
                    )));
                }
            }
        }
        Ok(())
    }

    /// All DDL statements of the schema as one batch, tables in declaration order.
    pub fn create_script(&self) -> String {
        self.tables
            .iter()
            .flat_map(TableDefinition::create_statements)
            .map(|stmt| format!("{stmt};\n"))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDefinition>,
    /// Table-level CHECK expressions.
    pub checks: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Append a column. Columns carrying [`ColumnConstraint::PrimaryKey`] join
    /// the table's primary key.
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        if column.has(ColumnConstraint::PrimaryKey) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.checks.push(expr.into());
        self
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with [`Error::UnknownColumn`].
    pub fn require_column(&self, name: &str) -> Result<&ColumnDefinition> {
        self.column_def(name).ok_or_else(|| Error::UnknownColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// The single INTEGER primary key column, which SQLite aliases to the rowid.
    pub fn rowid_column(&self) -> Option<&ColumnDefinition> {
        match self.primary_key.as_slice() {
            [only] => self
                .column_def(only)
                .filter(|c| c.data_type == DataType::Integer),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "column {}.{} declared twice",
                    self.name, column.name
                )));
            }
        }
        let referenced = self
            .foreign_keys
            .iter()
            .map(|fk| &fk.column)
            .chain(self.indexes.iter().flat_map(|i| &i.columns));
        for column in referenced {
            if !names.contains(column.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "table '{}' has no column '{}'",
                    self.name, column
                )));
            }
        }
        Ok(())
    }

    /// DDL for this table: the table itself, its indexes and its triggers.
    pub fn create_statements(&self) -> Vec<String> {
        let mut statements = vec![self.create_table_sql()];
        statements.extend(self.indexes.iter().map(|i| i.create_sql(&self.name)));
        statements.extend(self.trigger_statements());
        statements
    }

    fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.definition_sql(self.primary_key.contains(&c.name)))
            .collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        for column in self.columns.iter().filter(|c| c.has(ColumnConstraint::Unique)) {
            parts.push(format!("UNIQUE ({})", column.name));
        }
        parts.extend(self.foreign_keys.iter().map(ForeignKey::definition_sql));
        parts.extend(self.checks.iter().map(|expr| format!("CHECK ({expr})")));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            parts.join(",\n    ")
        )
    }

    fn trigger_statements(&self) -> Vec<String> {
        let mut triggers = Vec::new();
        for column in &self.columns {
            if column.has(ColumnConstraint::Immutable) {
                triggers.push(format!(
                    "CREATE TRIGGER IF NOT EXISTS {table}_{col}_immutable\n\
                     BEFORE UPDATE OF {col} ON {table} FOR EACH ROW\n\
                     WHEN NEW.{col} IS NOT OLD.{col}\n\
                     BEGIN\n    SELECT RAISE(ABORT, '{col} is immutable');\nEND",
                    table = self.name,
                    col = column.name,
                ));
            }
            // The rowid primary key already auto-increments.
            if column.has(ColumnConstraint::AutoIncrement)
                && !self.primary_key.contains(&column.name)
            {
                triggers.push(format!(
                    "CREATE TRIGGER IF NOT EXISTS {table}_{col}_autoincrement\n\
                     AFTER INSERT ON {table} FOR EACH ROW\n\
                     WHEN NEW.{col} IS NULL\n\
                     BEGIN\n    UPDATE {table} SET {col} = \
                     (SELECT COALESCE(MAX({col}), 0) + 1 FROM {table}) \
                     WHERE rowid = NEW.rowid;\nEND",
                    table = self.name,
                    col = column.name,
                ));
            }
            // Writers that leave the column untouched get the store's clock,
            // never earlier than the previous value.
            if let Some(value @ DefaultValue::CurrentTimestamp) = &column.on_update {
                triggers.push(format!(
                    "CREATE TRIGGER IF NOT EXISTS {table}_{col}_touch\n\
                     AFTER UPDATE ON {table} FOR EACH ROW\n\
                     WHEN NEW.{col} IS OLD.{col}\n\
                     BEGIN\n    UPDATE {table} SET {col} = \
                     max({now}, COALESCE(OLD.{col}, {now})) \
                     WHERE rowid = NEW.rowid;\nEND",
                    table = self.name,
                    col = column.name,
                    now = value.sql(),
                ));
            }
        }
        triggers
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
    /// Value assigned by every update that does not set the column: compiled
    /// updates fill it client-side, a store trigger covers the rest.
    pub on_update: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
            on_update: None,
        }
    }

    pub fn constraint(mut self, constraint: ColumnConstraint) -> Self {
        if !self.has(constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    pub fn primary_key(self) -> Self {
        self.constraint(ColumnConstraint::PrimaryKey)
    }

    pub fn not_null(self) -> Self {
        self.constraint(ColumnConstraint::NotNull)
    }

    pub fn unique(self) -> Self {
        self.constraint(ColumnConstraint::Unique)
    }

    pub fn with_default(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn on_update(mut self, value: DefaultValue) -> Self {
        self.on_update = Some(value);
        self
    }

    pub fn has(&self, constraint: ColumnConstraint) -> bool {
        self.constraints.contains(&constraint)
    }

    /// Whether statement compilation fills this column when it is omitted.
    pub fn has_client_default(&self) -> bool {
        matches!(self.default_value, Some(DefaultValue::CurrentTimestamp))
    }

    fn definition_sql(&self, in_primary_key: bool) -> String {
        let mut sql = format!("{} {}", self.name, self.data_type);
        if in_primary_key || self.has(ColumnConstraint::NotNull) {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.sql());
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    /// Length is declarative only; SQLite does not enforce it.
    Varchar(u32),
    Real,
    Blob,
    Numeric { precision: u8, scale: u8 },
    DateTime,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => f.write_str("INTEGER"),
            DataType::Text => f.write_str("TEXT"),
            DataType::Varchar(len) => write!(f, "VARCHAR({len})"),
            DataType::Real => f.write_str("REAL"),
            DataType::Blob => f.write_str("BLOB"),
            DataType::Numeric { precision, scale } => write!(f, "NUMERIC({precision}, {scale})"),
            DataType::DateTime => f.write_str("DATETIME"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
    /// Filled with `MAX + 1` on insert when left NULL.
    AutoIncrement,
    /// Rejected by the store when an update changes it.
    Immutable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    fn sql(&self) -> String {
        match self {
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Real(r) => r.to_string(),
            DefaultValue::Null => "NULL".to_string(),
            // Padded to the six fractional digits the client writes.
            DefaultValue::CurrentTimestamp => {
                "(strftime('%Y-%m-%d %H:%M:%f', 'now') || '000')".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    /// A reference with no cascade rules.
    pub fn new(
        column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            foreign_table: foreign_table.into(),
            foreign_column: foreign_column.into(),
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    fn definition_sql(&self) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.column, self.foreign_table, self.foreign_column
        );
        if self.on_delete != ForeignKeyAction::NoAction {
            sql.push_str(&format!(" ON DELETE {}", self.on_delete));
        }
        if self.on_update != ForeignKeyAction::NoAction {
            sql.push_str(&format!(" ON UPDATE {}", self.on_update));
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl fmt::Display for ForeignKeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
            ForeignKeyAction::Restrict => "RESTRICT",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    fn create_sql(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            self.columns.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widgets() -> TableDefinition {
        TableDefinition::new("widgets")
            .column(ColumnDefinition::new("widget_id", DataType::Integer).primary_key())
            .column(ColumnDefinition::new("label", DataType::Varchar(20)).not_null().unique())
            .column(
                ColumnDefinition::new("price", DataType::Numeric { precision: 8, scale: 2 })
                    .with_default(DefaultValue::Integer(0)),
            )
            .index(IndexDefinition::new("ix_widgets_label", &["label"]))
    }

    #[test]
    fn renders_table_ddl() {
        let sql = widgets().create_statements().remove(0);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS widgets (\n    \
             widget_id INTEGER NOT NULL,\n    \
             label VARCHAR(20) NOT NULL,\n    \
             price NUMERIC(8, 2) DEFAULT 0,\n    \
             PRIMARY KEY (widget_id),\n    \
             UNIQUE (label)\n)"
        );
    }

    #[test]
    fn renders_index_ddl() {
        let statements = widgets().create_statements();
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS ix_widgets_label ON widgets (label)"
        );
    }

    #[test]
    fn rowid_column_is_single_integer_key() {
        assert_eq!(widgets().rowid_column().map(|c| c.name.as_str()), Some("widget_id"));
        let text_key = TableDefinition::new("tags")
            .column(ColumnDefinition::new("tag", DataType::Text).primary_key());
        assert!(text_key.rowid_column().is_none());
    }

    #[test]
    fn foreign_key_actions_render_when_not_default() {
        let mut fk = ForeignKey::new("widget_id", "widgets", "widget_id");
        assert_eq!(
            fk.definition_sql(),
            "FOREIGN KEY (widget_id) REFERENCES widgets (widget_id)"
        );
        fk.on_delete = ForeignKeyAction::Cascade;
        assert!(fk.definition_sql().ends_with("ON DELETE CASCADE"));
    }

    #[test]
    fn validate_rejects_dangling_reference() {
        let schema = Schema::new().add_table(
            TableDefinition::new("parts")
                .column(ColumnDefinition::new("part_id", DataType::Integer).primary_key())
                .column(ColumnDefinition::new("widget_id", DataType::Integer))
                .foreign_key(ForeignKey::new("widget_id", "widgets", "widget_id")),
        );
        assert!(matches!(schema.validate(), Err(Error::InvalidSchema(_))));

        let schema = schema.add_table(widgets());
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn validate_rejects_index_on_missing_column() {
        let schema = Schema::new()
            .add_table(widgets().index(IndexDefinition::new("ix_widgets_colour", &["colour"])));
        assert!(matches!(schema.validate(), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn immutable_column_gets_guard_trigger() {
        let table = TableDefinition::new("notes")
            .column(ColumnDefinition::new("note_id", DataType::Integer).primary_key())
            .column(
                ColumnDefinition::new("created_on", DataType::DateTime)
                    .constraint(ColumnConstraint::Immutable),
            );
        let statements = table.create_statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].contains("BEFORE UPDATE OF created_on ON notes"));
        assert!(statements[1].contains("RAISE(ABORT, 'created_on is immutable')"));
    }

    #[test]
    fn current_timestamp_default_has_six_fraction_digits() {
        assert_eq!(
            DefaultValue::CurrentTimestamp.sql(),
            "(strftime('%Y-%m-%d %H:%M:%f', 'now') || '000')"
        );
    }

    #[test]
    fn on_update_timestamp_gets_touch_trigger() {
        let table = TableDefinition::new("notes")
            .column(ColumnDefinition::new("note_id", DataType::Integer).primary_key())
            .column(
                ColumnDefinition::new("updated_on", DataType::DateTime)
                    .with_default(DefaultValue::CurrentTimestamp)
                    .on_update(DefaultValue::CurrentTimestamp),
            );
        let statements = table.create_statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[1],
            "CREATE TRIGGER IF NOT EXISTS notes_updated_on_touch\n\
             AFTER UPDATE ON notes FOR EACH ROW\n\
             WHEN NEW.updated_on IS OLD.updated_on\n\
             BEGIN\n    UPDATE notes SET updated_on = \
             max((strftime('%Y-%m-%d %H:%M:%f', 'now') || '000'), \
             COALESCE(OLD.updated_on, (strftime('%Y-%m-%d %H:%M:%f', 'now') || '000'))) \
             WHERE rowid = NEW.rowid;\nEND"
        );
    }
}
