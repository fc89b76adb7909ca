//! Connection factories: one strategy per SQL dialect.
//!
//! A factory owns two things: the ready-to-issue command text for every core
//! operation ([`CommandSet`]), and the provisioning of [`Connection`]s the
//! engine checks out through the pool. The engine itself never composes SQL.
//!
//! The SQLite factory ([`sqlite::SqliteConnectionFactory`]) bundles a driver.
//! The other dialects provide their command sets here; pair one with your own
//! driver adapter through [`DriverConnectionFactory`].

use crate::row::Row;
use crate::statement::Statement;

pub mod mssql;
pub mod mysql;
pub mod oracle;
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// BackendError classifies driver-level failures so the engine can translate
/// them into its public taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// The backend could not be reached or the connection is broken.
    /// The engine discards the connection and reports the cache as
    /// unavailable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A foreign-key constraint rejected the statement (bad parent
    /// reference).
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A unique constraint rejected the statement. The upsert command
    /// absorbs the expected duplicate-insert races, so this indicates a
    /// misbehaving backend.
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("backend failure: {0}")]
    Other(String),
}

/// Connection is the narrow seam to the underlying SQL driver.
///
/// Implementations translate the bare parameter names in
/// [`Statement::params`] using their dialect's prefix, and are blocking:
/// callers run them on their own threads.
pub trait Connection: Send {
    /// execute runs a statement and returns the number of affected rows.
    fn execute(&mut self, stmt: &Statement) -> Result<u64, BackendError>;

    /// query runs a statement and materializes the result rows.
    fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, BackendError>;

    /// batch runs a parameterless script (DDL, VACUUM).
    fn batch(&mut self, sql: &str) -> Result<(), BackendError>;
}

/// ConnectionFactory provisions connections and carries the dialect's
/// command text.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn Connection>, BackendError>;

    fn commands(&self) -> &CommandSet;
}

/// DriverConnectionFactory pairs a dialect [`CommandSet`] with a
/// caller-supplied connector, for backends whose driver lives outside this
/// crate.
///
/// ```ignore
/// let factory = DriverConnectionFactory::new(
///     postgres::commands(&TableNaming::default()),
///     || Ok(Box::new(MyPgConnection::connect(dsn)?) as Box<dyn Connection>),
/// );
/// ```
pub struct DriverConnectionFactory<F>
where
    F: Fn() -> Result<Box<dyn Connection>, BackendError> + Send + Sync,
{
    commands: CommandSet,
    connector: F,
}

impl<F> DriverConnectionFactory<F>
where
    F: Fn() -> Result<Box<dyn Connection>, BackendError> + Send + Sync,
{
    pub fn new(commands: CommandSet, connector: F) -> Self {
        DriverConnectionFactory { commands, connector }
    }
}

impl<F> ConnectionFactory for DriverConnectionFactory<F>
where
    F: Fn() -> Result<Box<dyn Connection>, BackendError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn Connection>, BackendError> {
        (self.connector)()
    }

    fn commands(&self) -> &CommandSet {
        &self.commands
    }
}

/// TableNaming holds the customizable identifiers of the entries table.
#[derive(Clone, Debug)]
pub struct TableNaming {
    /// Optional schema qualifier; `None` uses the backend's default schema.
    pub schema: Option<String>,
    pub table: String,
}

impl Default for TableNaming {
    fn default() -> Self {
        TableNaming {
            schema: None,
            table: "kvle_entries".to_string(),
        }
    }
}

impl TableNaming {
    pub fn with_table(table: impl Into<String>) -> Self {
        TableNaming {
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, table: impl Into<String>) -> Self {
        TableNaming {
            schema: Some(schema.into()),
            table: table.into(),
        }
    }
}

/// Grammar captures the dialect knobs that vary between backends.
#[derive(Clone, Copy, Debug)]
pub struct Grammar {
    /// Parameter prefix: `:` (SQLite, Oracle), `@` (SQL Server, MySQL
    /// connectors), `$` (PostgreSQL).
    pub param_prefix: &'static str,
    pub quote_open: &'static str,
    pub quote_close: &'static str,
    /// Byte-length function: `LENGTH`, or `DATALENGTH` on SQL Server.
    pub length_fn: &'static str,
}

impl Grammar {
    pub fn param(&self, name: &str) -> String {
        format!("{}{}", self.param_prefix, name)
    }

    pub fn ident(&self, name: &str) -> String {
        format!("{}{}{}", self.quote_open, name, self.quote_close)
    }

    pub fn qualify(&self, naming: &TableNaming) -> String {
        match &naming.schema {
            Some(schema) => format!("{}.{}", self.ident(schema), self.ident(&naming.table)),
            None => self.ident(&naming.table),
        }
    }
}

/// CommandSet is the full command vocabulary of the engine, one SQL string
/// per operation, built once per factory.
#[derive(Clone, Debug)]
pub struct CommandSet {
    /// Upsert on `(kvle_partition, kvle_key)`; never touches `kvle_creation`
    /// on the update arm.
    pub insert_or_update_entry: String,
    pub delete_entry: String,
    pub delete_entries: String,
    pub delete_entries_in_partition: String,
    pub delete_expired_entries: String,
    pub delete_expired_entries_in_partition: String,
    /// Issued only for sliding reads.
    pub update_entry_expiry: String,
    pub contains_entry: String,
    pub count_entries: String,
    pub count_entries_in_partition: String,
    pub count_valid_entries: String,
    pub count_valid_entries_in_partition: String,
    pub peek_entry: String,
    pub peek_entries: String,
    pub peek_entries_in_partition: String,
    pub entries_by_parent: String,
    pub cache_size_bytes: String,
    /// Catalog probe: one row per column of the entries table, column name
    /// first.
    pub table_columns: String,
    pub create_schema: Vec<String>,
    pub vacuum: Option<String>,
}

/// All persisted columns, in bind order.
pub(crate) const COLUMNS: [&str; 12] = [
    "kvle_partition",
    "kvle_key",
    "kvle_expiry",
    "kvle_interval",
    "kvle_value",
    "kvle_compressed",
    "kvle_creation",
    "kvle_parent_key0",
    "kvle_parent_key1",
    "kvle_parent_key2",
    "kvle_parent_key3",
    "kvle_parent_key4",
];

/// Bare parameter names matching [`COLUMNS`].
pub(crate) const PARAMS: [&str; 12] = [
    "partition",
    "key",
    "expiry",
    "interval",
    "value",
    "compressed",
    "creation",
    "parent_key0",
    "parent_key1",
    "parent_key2",
    "parent_key3",
    "parent_key4",
];

/// Columns an overwrite may change; `kvle_creation` is preserved.
pub(crate) const UPDATABLE_COLUMNS: [&str; 9] = [
    "kvle_expiry",
    "kvle_interval",
    "kvle_value",
    "kvle_compressed",
    "kvle_parent_key0",
    "kvle_parent_key1",
    "kvle_parent_key2",
    "kvle_parent_key3",
    "kvle_parent_key4",
];

pub(crate) fn column_list() -> String {
    COLUMNS.join(", ")
}

pub(crate) fn param_list(grammar: &Grammar) -> String {
    PARAMS
        .iter()
        .map(|name| grammar.param(name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The `SET c = excluded.c` list shared by the SQLite and PostgreSQL upserts.
pub(crate) fn excluded_update_list() -> String {
    UPDATABLE_COLUMNS
        .iter()
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The distinctive pieces each dialect supplies on top of the shared
/// command text.
pub(crate) struct DialectParts {
    pub insert_or_update_entry: String,
    pub cache_size_bytes: String,
    pub table_columns: String,
    pub create_schema: Vec<String>,
    pub vacuum: Option<String>,
}

pub(crate) fn build_command_set(
    grammar: &Grammar,
    naming: &TableNaming,
    parts: DialectParts,
) -> CommandSet {
    let table = grammar.qualify(naming);
    let cols = column_list();
    let partition = grammar.param("partition");
    let key = grammar.param("key");
    let now = grammar.param("now");
    let expiry = grammar.param("expiry");
    let parent = grammar.param("parent");

    let parent_filter = (0..crate::entry::MAX_PARENT_KEYS)
        .map(|slot| format!("kvle_parent_key{slot} = {parent}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    CommandSet {
        insert_or_update_entry: parts.insert_or_update_entry,
        delete_entry: format!(
            "DELETE FROM {table} WHERE kvle_partition = {partition} AND kvle_key = {key}"
        ),
        delete_entries: format!("DELETE FROM {table}"),
        delete_entries_in_partition: format!(
            "DELETE FROM {table} WHERE kvle_partition = {partition}"
        ),
        delete_expired_entries: format!("DELETE FROM {table} WHERE kvle_expiry < {now}"),
        delete_expired_entries_in_partition: format!(
            "DELETE FROM {table} WHERE kvle_partition = {partition} AND kvle_expiry < {now}"
        ),
        update_entry_expiry: format!(
            "UPDATE {table} SET kvle_expiry = {expiry} \
             WHERE kvle_partition = {partition} AND kvle_key = {key}"
        ),
        contains_entry: format!(
            "SELECT COUNT(*) AS entry_count FROM {table} \
             WHERE kvle_partition = {partition} AND kvle_key = {key} AND kvle_expiry > {now}"
        ),
        count_entries: format!("SELECT COUNT(*) AS entry_count FROM {table}"),
        count_entries_in_partition: format!(
            "SELECT COUNT(*) AS entry_count FROM {table} WHERE kvle_partition = {partition}"
        ),
        count_valid_entries: format!(
            "SELECT COUNT(*) AS entry_count FROM {table} WHERE kvle_expiry > {now}"
        ),
        count_valid_entries_in_partition: format!(
            "SELECT COUNT(*) AS entry_count FROM {table} \
             WHERE kvle_partition = {partition} AND kvle_expiry > {now}"
        ),
        peek_entry: format!(
            "SELECT {cols} FROM {table} \
             WHERE kvle_partition = {partition} AND kvle_key = {key} AND kvle_expiry > {now}"
        ),
        peek_entries: format!(
            "SELECT {cols} FROM {table} WHERE kvle_expiry > {now} \
             ORDER BY kvle_partition, kvle_key"
        ),
        peek_entries_in_partition: format!(
            "SELECT {cols} FROM {table} \
             WHERE kvle_partition = {partition} AND kvle_expiry > {now} ORDER BY kvle_key"
        ),
        entries_by_parent: format!(
            "SELECT {cols} FROM {table} \
             WHERE kvle_partition = {partition} AND kvle_expiry > {now} AND ({parent_filter})"
        ),
        cache_size_bytes: parts.cache_size_bytes,
        table_columns: parts.table_columns,
        create_schema: parts.create_schema,
        vacuum: parts.vacuum,
    }
}
