//! Migration: 20250221192157_expenses
//!
//! Expenses belong to a user (deleted with them) and optionally to a
//! category (detached when the category is deleted).

use outlay::migration::schema::{
    ColumnDescriptor, ColumnType, ForeignKeyDescriptor, ReferentialAction, TableDescriptor,
};
use outlay::migration::{MigrationDefinition, Step};

pub fn table() -> TableDescriptor {
    TableDescriptor::new("expenses")
        .column(ColumnDescriptor::id("id"))
        .column(ColumnDescriptor::new("owner_id", ColumnType::Integer).not_null())
        .column(ColumnDescriptor::new("category_id", ColumnType::Integer))
        .column(ColumnDescriptor::new("title", ColumnType::Varchar(Some(255))).not_null())
        .column(ColumnDescriptor::new("description", ColumnType::Text))
        .column(ColumnDescriptor::new("merchant", ColumnType::Varchar(Some(255))))
        .column(ColumnDescriptor::new("date", ColumnType::Date).not_null())
        .column(ColumnDescriptor::new("amount", ColumnType::Decimal(10, 2)).not_null())
        .foreign_key(ForeignKeyDescriptor::new(
            "owner_id",
            "users",
            "id",
            ReferentialAction::Cascade,
        ))
        .foreign_key(ForeignKeyDescriptor::new(
            "category_id",
            "categories",
            "id",
            ReferentialAction::SetNull,
        ))
}

pub fn definition() -> MigrationDefinition {
    MigrationDefinition::new(
        "20250221192157_expenses",
        Step::create_table(table()),
        Step::drop_table("expenses"),
    )
}
