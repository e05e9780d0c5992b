//! Migration: 20250221192022_categories

use outlay::migration::schema::{ColumnDescriptor, ColumnType, TableDescriptor};
use outlay::migration::{MigrationDefinition, Step};

pub fn table() -> TableDescriptor {
    TableDescriptor::new("categories")
        .column(ColumnDescriptor::id("id"))
        .column(ColumnDescriptor::new("name", ColumnType::Varchar(None)).not_null().unique())
}

pub fn definition() -> MigrationDefinition {
    MigrationDefinition::new(
        "20250221192022_categories",
        Step::create_table(table()),
        Step::drop_table("categories"),
    )
}
