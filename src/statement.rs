//! Statement builders over a [`TableDefinition`].
//!
//! `Display` renders the statement with `:column` placeholders. `compile`
//! resolves the placeholders into [`Params`], coercing each value to its
//! column type and filling client-side defaults (`created_on`, `updated_on`)
//! from a [`ClockSource`].

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::clock::{self, ClockSource};
use crate::error::{Error, Result};
use crate::schema::{ColumnConstraint, ColumnDefinition, DataType, DefaultValue, TableDefinition};
use crate::sqlite::{self, Params, Query, QueryOperator, SqlQuery, Value};

/// Prefix of WHERE-clause placeholders, keeping them apart from SET values.
const FILTER_PREFIX: &str = "w_";

/// `INSERT INTO table (...) VALUES (...)`
#[derive(Debug, Clone)]
pub struct Insert<'a> {
    table: &'a TableDefinition,
    values: Vec<(String, Value)>,
}

impl<'a> Insert<'a> {
    pub fn new(table: &'a TableDefinition) -> Self {
        Self {
            table,
            values: Vec::new(),
        }
    }

    /// Set a column value. A later call for the same column replaces the earlier one.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        self.values.retain(|(name, _)| *name != column);
        self.values.push((column, value.into()));
        self
    }

    pub fn table(&self) -> &TableDefinition {
        self.table
    }

    fn supplied(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Columns the statement writes, in table order.
    fn target_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.table
            .columns
            .iter()
            .filter(|c| self.supplied(&c.name).is_some() || c.has_client_default())
    }

    pub fn compile(&self, clock: &impl ClockSource) -> Result<SqlQuery> {
        for (name, _) in &self.values {
            self.table.require_column(name)?;
        }
        let now = clock.now();
        let mut params = Params::new();
        for column in self.target_columns() {
            let value = match self.supplied(&column.name) {
                Some(value) => coerce(column, value.clone())?,
                None => Value::Timestamp(now),
            };
            params.insert(column.name.clone(), value);
        }
        Ok(SqlQuery::new(&self.to_string()).with_params(params))
    }
}

/// Renders only columns the table declares. [`Insert::compile`] is what
/// reports an unknown supplied column.
impl fmt::Display for Insert<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<&str> = self.target_columns().map(|c| c.name.as_str()).collect();
        if columns.is_empty() {
            return write!(f, "INSERT INTO {} DEFAULT VALUES", self.table.name);
        }
        let placeholders: Vec<String> = columns.iter().map(|c| format!(":{c}")).collect();
        write!(
            f,
            "INSERT INTO {} ({}) VALUES ({})",
            self.table.name,
            columns.join(", "),
            placeholders.join(", ")
        )
    }
}

/// `UPDATE table SET ... WHERE ...`
#[derive(Debug, Clone)]
pub struct Update<'a> {
    table: &'a TableDefinition,
    values: Vec<(String, Value)>,
    query: Query,
}

impl<'a> Update<'a> {
    pub fn new(table: &'a TableDefinition) -> Self {
        Self {
            table,
            values: Vec::new(),
            query: Query::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        self.values.retain(|(name, _)| *name != column);
        self.values.push((column, value.into()));
        self
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Assigned columns in table order, on-update columns included.
    fn assignments(&self) -> Vec<&ColumnDefinition> {
        self.table
            .columns
            .iter()
            .filter(|c| {
                self.values.iter().any(|(name, _)| *name == c.name) || c.on_update.is_some()
            })
            .collect()
    }

    pub fn compile(&self, clock: &impl ClockSource) -> Result<SqlQuery> {
        if self.values.is_empty() {
            return Err(Error::EmptyUpdate(self.table.name.clone()));
        }
        for (name, _) in &self.values {
            let column = self.table.require_column(name)?;
            if column.has(ColumnConstraint::Immutable) {
                return Err(Error::ImmutableColumn(name.clone()));
            }
        }

        let now = clock.now();
        let mut params = Params::new();
        let mut sets = Vec::new();
        for column in self.assignments() {
            let value = match self.values.iter().find(|(name, _)| *name == column.name) {
                Some((_, value)) => coerce(column, value.clone())?,
                None => on_update_value(column, now)?,
            };
            sets.push(format!("{0} = :{0}", column.name));
            params.insert(column.name.clone(), value);
        }

        let mut sql = format!("UPDATE {} SET {}", self.table.name, sets.join(", "));
        sql.push_str(&where_clause(self.table, &self.query, &mut params)?);
        Ok(SqlQuery::new(&sql).with_params(params))
    }
}

/// `SELECT ... FROM table WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
#[derive(Debug, Clone)]
pub struct Select<'a> {
    table: &'a TableDefinition,
    fields: Option<Vec<String>>,
    query: Query,
    order_by: Vec<(String, bool)>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl<'a> Select<'a> {
    pub fn new(table: &'a TableDefinition) -> Self {
        Self {
            table,
            fields: None,
            query: Query::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Restrict the result to these columns, in the given order.
    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The column definitions of the result set, in result order.
    pub fn result_columns(&self) -> Result<Vec<&'a ColumnDefinition>> {
        match &self.fields {
            Some(fields) => fields
                .iter()
                .map(|name| self.table.require_column(name))
                .collect(),
            None => Ok(self.table.columns.iter().collect()),
        }
    }

    pub fn compile(&self) -> Result<SqlQuery> {
        let columns: Vec<&str> = self
            .result_columns()?
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        let mut params = Params::new();
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), self.table.name);
        sql.push_str(&where_clause(self.table, &self.query, &mut params)?);

        if !self.order_by.is_empty() {
            let terms = self
                .order_by
                .iter()
                .map(|(column, ascending)| {
                    self.table.require_column(column)?;
                    Ok(format!("{column} {}", if *ascending { "ASC" } else { "DESC" }))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok(SqlQuery::new(&sql).with_params(params))
    }
}

/// `DELETE FROM table WHERE ...`
#[derive(Debug, Clone)]
pub struct Delete<'a> {
    table: &'a TableDefinition,
    query: Query,
}

impl<'a> Delete<'a> {
    pub fn new(table: &'a TableDefinition) -> Self {
        Self {
            table,
            query: Query::new(),
        }
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn compile(&self) -> Result<SqlQuery> {
        let mut params = Params::new();
        let mut sql = format!("DELETE FROM {}", self.table.name);
        sql.push_str(&where_clause(self.table, &self.query, &mut params)?);
        Ok(SqlQuery::new(&sql).with_params(params))
    }
}

fn where_clause(table: &TableDefinition, query: &Query, params: &mut Params) -> Result<String> {
    if query.is_empty() {
        return Ok(String::new());
    }
    let mut terms = Vec::with_capacity(query.conditions.len());
    for (field, op) in &query.conditions {
        let column = table.require_column(field)?;
        let name = format!("{FILTER_PREFIX}{field}");
        let term = match op {
            QueryOperator::Equal(Value::Null) => format!("{field} IS NULL"),
            QueryOperator::NotEqual(Value::Null) => format!("{field} IS NOT NULL"),
            QueryOperator::Equal(v) => format!("{field} = {}", bind(params, &name, column, v)?),
            QueryOperator::NotEqual(v) => format!("{field} != {}", bind(params, &name, column, v)?),
            QueryOperator::GreaterThan(v) => format!("{field} > {}", bind(params, &name, column, v)?),
            QueryOperator::GreaterThanOrEqual(v) => format!("{field} >= {}", bind(params, &name, column, v)?),
            QueryOperator::LessThan(v) => format!("{field} < {}", bind(params, &name, column, v)?),
            QueryOperator::LessThanOrEqual(v) => format!("{field} <= {}", bind(params, &name, column, v)?),
            QueryOperator::Like(pattern) => {
                params.insert(name.clone(), Value::Text(pattern.clone()));
                format!("{field} LIKE :{name}")
            }
            QueryOperator::In(values) if values.is_empty() => "0".to_string(),
            QueryOperator::In(values) => {
                let mut placeholders = Vec::with_capacity(values.len());
                for (i, value) in values.iter().enumerate() {
                    placeholders.push(bind(params, &format!("{name}_{i}"), column, value)?);
                }
                format!("{field} IN ({})", placeholders.join(", "))
            }
        };
        terms.push(term);
    }
    Ok(format!(" WHERE {}", terms.join(" AND ")))
}

fn bind(params: &mut Params, name: &str, column: &ColumnDefinition, value: &Value) -> Result<String> {
    params.insert(name, coerce(column, value.clone())?);
    Ok(format!(":{name}"))
}

fn on_update_value(column: &ColumnDefinition, now: chrono::NaiveDateTime) -> Result<Value> {
    let value = match &column.on_update {
        Some(DefaultValue::CurrentTimestamp) => Value::Timestamp(now),
        Some(DefaultValue::Integer(i)) => Value::Integer(*i),
        Some(DefaultValue::Real(r)) => Value::Real(*r),
        Some(DefaultValue::Text(s)) => Value::Text(s.clone()),
        Some(DefaultValue::Null) | None => Value::Null,
    };
    coerce(column, value)
}

/// Convert a value into the representation its column stores.
///
/// Text is parsed into numbers and timestamps, so `"12"` binds as `12` for an
/// INTEGER column and `"0.50"` as a decimal for a NUMERIC one.
pub(crate) fn coerce(column: &ColumnDefinition, value: Value) -> Result<Value> {
    let invalid = |value: &Value| Error::InvalidValue {
        column: column.name.clone(),
        reason: format!("{value:?} cannot be stored as {}", column.data_type),
    };
    if value.is_null() {
        return Ok(Value::Null);
    }
    let coerced = match (column.data_type, value) {
        (DataType::Integer, Value::Integer(i)) => Value::Integer(i),
        (DataType::Integer, Value::Boolean(b)) => Value::Integer(i64::from(b)),
        (DataType::Integer, Value::Text(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Value::Integer(i),
            Err(_) => return Err(invalid(&Value::Text(s))),
        },
        (DataType::Integer, Value::Decimal(d)) if d.fract().is_zero() => match d.to_i64() {
            Some(i) => Value::Integer(i),
            None => return Err(invalid(&Value::Decimal(d))),
        },

        (DataType::Text | DataType::Varchar(_), Value::Text(s)) => Value::Text(s),
        (DataType::Text | DataType::Varchar(_), Value::Integer(i)) => Value::Text(i.to_string()),
        (DataType::Text | DataType::Varchar(_), Value::Real(r)) => Value::Text(r.to_string()),
        (DataType::Text | DataType::Varchar(_), Value::Decimal(d)) => Value::Text(d.to_string()),

        (DataType::Real, Value::Real(r)) => Value::Real(r),
        (DataType::Real, Value::Integer(i)) => Value::Real(i as f64),
        (DataType::Real, Value::Decimal(d)) => match d.to_string().parse::<f64>() {
            Ok(r) => Value::Real(r),
            Err(_) => return Err(invalid(&Value::Decimal(d))),
        },
        (DataType::Real, Value::Text(s)) => match s.trim().parse::<f64>() {
            Ok(r) => Value::Real(r),
            Err(_) => return Err(invalid(&Value::Text(s))),
        },

        (DataType::Numeric { precision, scale }, value) => {
            let decimal = match &value {
                Value::Decimal(d) => Some(*d),
                Value::Integer(i) => Some(Decimal::from(*i)),
                Value::Real(r) => sqlite::decimal_from_f64(*r),
                Value::Text(s) => sqlite::parse_decimal(s),
                _ => None,
            };
            let decimal = decimal.ok_or_else(|| invalid(&value))?;
            Value::Decimal(fit_numeric(column, decimal, precision, scale)?)
        }

        (DataType::DateTime, Value::Timestamp(ts)) => Value::Timestamp(ts),
        (DataType::DateTime, Value::Text(s)) => match clock::parse_timestamp(s.trim()) {
            Some(ts) => Value::Timestamp(ts),
            None => return Err(invalid(&Value::Text(s))),
        },

        (DataType::Blob, Value::Blob(b)) => Value::Blob(b),
        (DataType::Blob, Value::Text(s)) => Value::Blob(s.into_bytes()),

        (_, other) => return Err(invalid(&other)),
    };
    Ok(coerced)
}

fn fit_numeric(column: &ColumnDefinition, value: Decimal, precision: u8, scale: u8) -> Result<Decimal> {
    let scaled = sqlite::rescale(value, scale);
    let digits = match scaled.mantissa().unsigned_abs() {
        0 => 1,
        m => m.to_string().len(),
    };
    if digits > usize::from(precision) {
        return Err(Error::NumericOverflow {
            column: column.name.clone(),
            precision,
            scale,
        });
    }
    Ok(scaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    struct FixedClock(NaiveDateTime);

    impl ClockSource for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn clock() -> FixedClock {
        FixedClock(
            NaiveDate::from_ymd_opt(2026, 10, 16)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        )
    }

    fn items() -> TableDefinition {
        TableDefinition::new("items")
            .column(ColumnDefinition::new("item_id", DataType::Integer).primary_key())
            .column(ColumnDefinition::new("label", DataType::Varchar(20)))
            .column(ColumnDefinition::new("count", DataType::Integer))
            .column(ColumnDefinition::new(
                "price",
                DataType::Numeric { precision: 5, scale: 2 },
            ))
            .column(
                ColumnDefinition::new("created_on", DataType::DateTime)
                    .with_default(DefaultValue::CurrentTimestamp)
                    .constraint(ColumnConstraint::Immutable),
            )
            .column(
                ColumnDefinition::new("updated_on", DataType::DateTime)
                    .with_default(DefaultValue::CurrentTimestamp)
                    .on_update(DefaultValue::CurrentTimestamp),
            )
    }

    #[test]
    fn insert_renders_supplied_and_defaulted_columns_in_table_order() {
        let table = items();
        let insert = Insert::new(&table).value("price", "1.5").value("label", "pen");
        assert_eq!(
            insert.to_string(),
            "INSERT INTO items (label, price, created_on, updated_on) \
             VALUES (:label, :price, :created_on, :updated_on)"
        );
    }

    #[test]
    fn insert_compile_coerces_and_fills_defaults() {
        let table = items();
        let query = Insert::new(&table)
            .value("label", "pen")
            .value("count", "12")
            .value("price", "1.5")
            .compile(&clock())
            .unwrap();

        assert_eq!(query.params.get("count"), Some(&Value::Integer(12)));
        let price = query.params.get("price").unwrap().as_decimal().unwrap();
        assert_eq!(price.to_string(), "1.50");
        assert_eq!(
            query.params.get("created_on"),
            query.params.get("updated_on")
        );
        assert_eq!(query.params.get("created_on"), Some(&Value::Timestamp(clock().0)));
    }

    #[test]
    fn insert_rejects_unknown_column() {
        let table = items();
        let err = Insert::new(&table).value("colour", "red").compile(&clock()).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { ref column, .. } if column == "colour"));
    }

    #[test]
    fn insert_text_omits_unknown_column_that_compile_rejects() {
        let table = items();
        let insert = Insert::new(&table).value("label", "pen").value("colour", "red");
        assert!(!insert.to_string().contains("colour"));
        assert!(insert.compile(&clock()).is_err());
    }

    #[test]
    fn insert_rejects_numeric_overflow() {
        let table = items();
        let err = Insert::new(&table).value("price", "1234.5").compile(&clock()).unwrap_err();
        assert!(matches!(err, Error::NumericOverflow { precision: 5, scale: 2, .. }));
    }

    #[test]
    fn insert_rejects_uncoercible_value() {
        let table = items();
        let err = Insert::new(&table).value("count", "a dozen").compile(&clock()).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn update_adds_on_update_columns() {
        let table = items();
        let query = Update::new(&table)
            .set("count", 3)
            .filter(Query::new().with_condition("item_id", QueryOperator::Equal(Value::Integer(7))))
            .compile(&clock())
            .unwrap();
        assert_eq!(
            query.statement,
            "UPDATE items SET count = :count, updated_on = :updated_on WHERE item_id = :w_item_id"
        );
        assert_eq!(query.params.get("w_item_id"), Some(&Value::Integer(7)));
        assert_eq!(query.params.get("updated_on"), Some(&Value::Timestamp(clock().0)));
    }

    #[test]
    fn update_refuses_immutable_column() {
        let table = items();
        let err = Update::new(&table)
            .set("created_on", "2020-01-01 00:00:00")
            .compile(&clock())
            .unwrap_err();
        assert!(matches!(err, Error::ImmutableColumn(ref c) if c == "created_on"));
    }

    #[test]
    fn update_without_values_is_rejected() {
        let table = items();
        let err = Update::new(&table).compile(&clock()).unwrap_err();
        assert!(matches!(err, Error::EmptyUpdate(_)));
    }

    #[test]
    fn select_renders_filters_order_and_paging() {
        let table = items();
        let query = Select::new(&table)
            .fields(["item_id", "label"])
            .filter(
                Query::new()
                    .with_condition("label", QueryOperator::Like("p%".into()))
                    .with_condition(
                        "count",
                        QueryOperator::In(vec![Value::Integer(1), Value::Text("2".into())]),
                    ),
            )
            .order_by("label", false)
            .limit(10)
            .offset(20)
            .compile()
            .unwrap();
        assert_eq!(
            query.statement,
            "SELECT item_id, label FROM items \
             WHERE count IN (:w_count_0, :w_count_1) AND label LIKE :w_label \
             ORDER BY label DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(query.params.get("w_count_1"), Some(&Value::Integer(2)));
    }

    #[test]
    fn select_null_comparison_uses_is() {
        let table = items();
        let query = Select::new(&table)
            .fields(["item_id"])
            .filter(Query::new().with_condition("price", QueryOperator::Equal(Value::Null)))
            .compile()
            .unwrap();
        assert_eq!(query.statement, "SELECT item_id FROM items WHERE price IS NULL");
        assert!(query.params.values.is_empty());
    }

    #[test]
    fn select_with_empty_in_list_matches_nothing() {
        let table = items();
        let query = Select::new(&table)
            .fields(["item_id"])
            .filter(Query::new().with_condition("count", QueryOperator::In(Vec::new())))
            .compile()
            .unwrap();
        assert_eq!(query.statement, "SELECT item_id FROM items WHERE 0");
        assert!(query.params.values.is_empty());
    }

    #[test]
    fn delete_without_filter_targets_whole_table() {
        let table = items();
        assert_eq!(Delete::new(&table).compile().unwrap().statement, "DELETE FROM items");
    }
}
