//! Declarative table descriptors
//!
//! Migrations that create or drop tables describe the table shape explicitly
//! (field name, type, constraints, foreign keys). The descriptor is rendered
//! to DDL with `sea-query` for whichever backend the migration runs against.

use crate::executor::Backend;
use sea_query::{
    ColumnDef, ForeignKey, ForeignKeyAction, PostgresQueryBuilder, SqliteQueryBuilder, Table,
    TableCreateStatement,
};

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    BigInteger,
    /// `VARCHAR`, optionally with a length
    Varchar(Option<u32>),
    Text,
    Boolean,
    Date,
    Timestamp,
    /// `NUMERIC(precision, scale)`
    Decimal(u32, u32),
}

/// Column default value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

/// `ON DELETE` behaviour of a foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl From<ReferentialAction> for ForeignKeyAction {
    fn from(action: ReferentialAction) -> Self {
        match action {
            ReferentialAction::Cascade => ForeignKeyAction::Cascade,
            ReferentialAction::SetNull => ForeignKeyAction::SetNull,
            ReferentialAction::Restrict => ForeignKeyAction::Restrict,
            ReferentialAction::NoAction => ForeignKeyAction::NoAction,
        }
    }
}

/// One column of a [`TableDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
}

impl ColumnDescriptor {
    /// A nullable column with no constraints
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            not_null: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
        }
    }

    /// Auto-incrementing integer primary key
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
            .not_null()
            .primary_key()
            .auto_increment()
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    fn to_column_def(&self) -> ColumnDef {
        let mut def = ColumnDef::new(self.name.clone());
        match self.column_type {
            ColumnType::Integer => def.integer(),
            ColumnType::BigInteger => def.big_integer(),
            ColumnType::Varchar(Some(len)) => def.string_len(len),
            ColumnType::Varchar(None) => def.string(),
            ColumnType::Text => def.text(),
            ColumnType::Boolean => def.boolean(),
            ColumnType::Date => def.date(),
            ColumnType::Timestamp => def.timestamp(),
            ColumnType::Decimal(precision, scale) => def.decimal_len(precision, scale),
        };
        if self.not_null {
            def.not_null();
        }
        if self.auto_increment {
            def.auto_increment();
        }
        if self.primary_key {
            def.primary_key();
        }
        if self.unique {
            def.unique_key();
        }
        match &self.default {
            Some(DefaultValue::Bool(v)) => {
                def.default(*v);
            }
            Some(DefaultValue::Integer(v)) => {
                def.default(*v);
            }
            Some(DefaultValue::Text(v)) => {
                def.default(v.clone());
            }
            None => {}
        }
        def
    }
}

/// A foreign key from one column of the described table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub on_delete: ReferentialAction,
}

impl ForeignKeyDescriptor {
    pub fn new(
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
        on_delete: ReferentialAction,
    ) -> Self {
        Self {
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
            on_delete,
        }
    }
}

/// Shape of a table, rendered to `CREATE TABLE IF NOT EXISTS`
///
/// # Example
///
/// ```rust
/// use outlay::executor::Backend;
/// use outlay::migration::schema::{ColumnDescriptor, ColumnType, TableDescriptor};
///
/// let categories = TableDescriptor::new("categories")
///     .column(ColumnDescriptor::id("id"))
///     .column(ColumnDescriptor::new("name", ColumnType::Varchar(None)).not_null().unique());
///
/// let sql = categories.create_sql(Backend::Sqlite);
/// assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, foreign_key: ForeignKeyDescriptor) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Build the `sea-query` statement for this table
    #[must_use]
    pub fn create_statement(&self) -> TableCreateStatement {
        let mut table = Table::create();
        table.table(self.name.clone()).if_not_exists();

        for column in &self.columns {
            let mut def = column.to_column_def();
            table.col(&mut def);
        }

        for fk in &self.foreign_keys {
            let mut key = ForeignKey::create();
            key.name(format!("fk_{}_{}", self.name, fk.column))
                .from(self.name.clone(), fk.column.clone())
                .to(fk.references_table.clone(), fk.references_column.clone())
                .on_delete(fk.on_delete.into());
            table.foreign_key(&mut key);
        }

        table.to_owned()
    }

    /// Render `CREATE TABLE IF NOT EXISTS` for `backend`
    #[must_use]
    pub fn create_sql(&self, backend: Backend) -> String {
        let statement = self.create_statement();
        match backend {
            Backend::Sqlite => statement.build(SqliteQueryBuilder),
            Backend::Postgres => statement.build(PostgresQueryBuilder),
        }
    }
}

/// Render `DROP TABLE IF EXISTS` for `backend`
#[must_use]
pub fn drop_table_sql(table: &str, backend: Backend) -> String {
    let statement = Table::drop().table(table.to_string()).if_exists().to_owned();
    match backend {
        Backend::Sqlite => statement.build(SqliteQueryBuilder),
        Backend::Postgres => statement.build(PostgresQueryBuilder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expenses() -> TableDescriptor {
        TableDescriptor::new("expenses")
            .column(ColumnDescriptor::id("id"))
            .column(ColumnDescriptor::new("owner_id", ColumnType::Integer).not_null())
            .column(ColumnDescriptor::new("category_id", ColumnType::Integer))
            .column(ColumnDescriptor::new("title", ColumnType::Varchar(Some(255))).not_null())
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

    #[test]
    fn test_create_sql_sqlite() {
        let sql = expenses().create_sql(Backend::Sqlite);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"expenses\""), "{sql}");
        assert!(sql.contains("\"owner_id\""));
        assert!(sql.contains("FOREIGN KEY"));
        assert!(sql.contains("ON DELETE CASCADE"));
        assert!(sql.contains("ON DELETE SET NULL"));
    }

    #[test]
    fn test_create_sql_postgres() {
        let sql = expenses().create_sql(Backend::Postgres);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"expenses\""), "{sql}");
        assert!(sql.contains("REFERENCES \"users\""));
    }

    #[test]
    fn test_unique_and_default() {
        let users = TableDescriptor::new("users")
            .column(ColumnDescriptor::id("id"))
            .column(ColumnDescriptor::new("email", ColumnType::Varchar(None)).not_null().unique())
            .column(
                ColumnDescriptor::new("is_admin", ColumnType::Boolean)
                    .not_null()
                    .default(DefaultValue::Bool(false)),
            );
        let sql = users.create_sql(Backend::Sqlite);
        assert!(sql.contains("UNIQUE"), "{sql}");
        assert!(sql.contains("DEFAULT"), "{sql}");
    }

    #[test]
    fn test_drop_table_sql() {
        assert_eq!(
            drop_table_sql("users", Backend::Sqlite),
            "DROP TABLE IF EXISTS \"users\""
        );
        assert_eq!(
            drop_table_sql("users", Backend::Postgres),
            "DROP TABLE IF EXISTS \"users\""
        );
    }

    #[test]
    fn test_id_column_flags() {
        let id = ColumnDescriptor::id("id");
        assert!(id.not_null && id.primary_key && id.auto_increment);
        assert!(!id.unique);
        assert_eq!(id.column_type, ColumnType::Integer);
    }
}
