//! The cookie shop tables.
//!
//! `users` place `orders`; each order has `line_items`, each naming one of the
//! `cookies`. References carry no cascade rules, so removing a referenced user,
//! order or cookie is refused while foreign keys are enforced.

use crate::schema::{
    ColumnConstraint, ColumnDefinition, DataType, DefaultValue, ForeignKey, IndexDefinition, Schema,
    TableDefinition,
};
use crate::statement::Insert;

pub const COOKIES: &str = "cookies";
pub const USERS: &str = "users";
pub const ORDERS: &str = "orders";
pub const LINE_ITEMS: &str = "line_items";

const MONEY: DataType = DataType::Numeric {
    precision: 12,
    scale: 2,
};

/// All four tables, referenced tables before the tables that reference them.
pub fn schema() -> Schema {
    Schema::new()
        .add_table(cookies())
        .add_table(users())
        .add_table(orders())
        .add_table(line_items())
}

pub fn cookies() -> TableDefinition {
    with_timestamps(
        TableDefinition::new(COOKIES)
            .column(ColumnDefinition::new("cookie_id", DataType::Integer).primary_key())
            .column(ColumnDefinition::new("cookie_name", DataType::Varchar(50)))
            .column(ColumnDefinition::new("cookie_recipe_url", DataType::Varchar(255)))
            .column(ColumnDefinition::new("cookie_sku", DataType::Varchar(55)))
            .column(ColumnDefinition::new("quantity", DataType::Integer))
            .column(ColumnDefinition::new("unit_cost", MONEY)),
    )
    .index(IndexDefinition::new("ix_cookies_cookie_name", &["cookie_name"]))
}

/// `password` is stored as given, in plain text.
pub fn users() -> TableDefinition {
    with_timestamps(
        TableDefinition::new(USERS)
            .column(ColumnDefinition::new("user_id", DataType::Integer).primary_key())
            .column(
                ColumnDefinition::new("customer_number", DataType::Integer)
                    .constraint(ColumnConstraint::AutoIncrement),
            )
            .column(
                ColumnDefinition::new("username", DataType::Varchar(15))
                    .not_null()
                    .unique(),
            )
            .column(ColumnDefinition::new("email_address", DataType::Varchar(255)).not_null())
            .column(ColumnDefinition::new("phone", DataType::Varchar(20)).not_null())
            .column(ColumnDefinition::new("password", DataType::Varchar(25)).not_null()),
    )
}

pub fn orders() -> TableDefinition {
    with_timestamps(
        TableDefinition::new(ORDERS)
            .column(ColumnDefinition::new("order_id", DataType::Integer).primary_key())
            .column(ColumnDefinition::new("user_id", DataType::Integer)),
    )
    .foreign_key(ForeignKey::new("user_id", USERS, "user_id"))
}

pub fn line_items() -> TableDefinition {
    TableDefinition::new(LINE_ITEMS)
        .column(ColumnDefinition::new("line_items_id", DataType::Integer).primary_key())
        .column(ColumnDefinition::new("order_id", DataType::Integer))
        .column(ColumnDefinition::new("cookie_id", DataType::Integer))
        .column(ColumnDefinition::new("quantity", DataType::Integer))
        .column(ColumnDefinition::new("extended_cost", MONEY))
        .foreign_key(ForeignKey::new("order_id", ORDERS, "order_id"))
        .foreign_key(ForeignKey::new("cookie_id", COOKIES, "cookie_id"))
}

/// `created_on` is fixed at insert; `updated_on` moves with every update.
fn with_timestamps(table: TableDefinition) -> TableDefinition {
    table
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
        .check("updated_on >= created_on")
}

/// The chocolate chip cookie, with quantity and cost given as text the way a
/// form would submit them.
pub fn chocolate_chip(table: &TableDefinition) -> Insert<'_> {
    Insert::new(table)
        .value("cookie_name", "chocolate chip")
        .value("cookie_recipe_url", "http://some.aweso.me/cookie/recipe.html")
        .value("cookie_sku", "CC01")
        .value("quantity", "12")
        .value("unit_cost", "0.50")
}
