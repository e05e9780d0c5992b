//! Migration: 20250221191532_users

use outlay::migration::schema::{ColumnDescriptor, ColumnType, DefaultValue, TableDescriptor};
use outlay::migration::{MigrationDefinition, Step};

pub fn table() -> TableDescriptor {
    TableDescriptor::new("users")
        .column(ColumnDescriptor::id("id"))
        .column(ColumnDescriptor::new("email", ColumnType::Varchar(None)).not_null().unique())
        .column(ColumnDescriptor::new("password", ColumnType::Varchar(Some(255))).not_null())
        .column(ColumnDescriptor::new("first_name", ColumnType::Varchar(None)).not_null())
        .column(ColumnDescriptor::new("last_name", ColumnType::Varchar(None)).not_null())
        .column(
            ColumnDescriptor::new("is_admin", ColumnType::Boolean)
                .not_null()
                .default(DefaultValue::Bool(false)),
        )
}

pub fn definition() -> MigrationDefinition {
    MigrationDefinition::new(
        "20250221191532_users",
        Step::create_table(table()),
        Step::drop_table("users"),
    )
}
