//! Bundled SQLite connection factory (rusqlite).
//!
//! Every connection is opened with `foreign_keys` on, so the parent-key
//! cascade is enforced by the database itself. In-memory factories use a
//! uniquely named shared-cache database and keep an anchor connection so the
//! contents survive pool churn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::ValueRef;

use crate::entry::MAX_PARENT_KEYS;
use crate::row::Row;
use crate::statement::{SqlValue, Statement};

use super::{
    build_command_set, column_list, excluded_update_list, param_list, BackendError, CommandSet,
    Connection, ConnectionFactory, DialectParts, Grammar, TableNaming,
};

pub const GRAMMAR: Grammar = Grammar {
    param_prefix: ":",
    quote_open: "\"",
    quote_close: "\"",
    length_fn: "LENGTH",
};

/// commands returns the SQLite command set for the given table naming.
///
/// SQLite has no schema qualifier worth speaking of here; `naming.schema` is
/// ignored and the table lives in the main database.
pub fn commands(naming: &TableNaming) -> CommandSet {
    let flat = TableNaming::with_table(naming.table.clone());
    let table = GRAMMAR.ident(&flat.table);
    let parts = DialectParts {
        insert_or_update_entry: format!(
            "INSERT INTO {table} ({cols}) VALUES ({params}) \
             ON CONFLICT (kvle_partition, kvle_key) DO UPDATE SET {updates}",
            cols = column_list(),
            params = param_list(&GRAMMAR),
            updates = excluded_update_list(),
        ),
        cache_size_bytes: "SELECT page_count * page_size AS cache_size_bytes \
                           FROM pragma_page_count(), pragma_page_size()"
            .to_string(),
        table_columns: format!("SELECT name FROM pragma_table_info('{}')", flat.table),
        create_schema: create_schema(&flat.table),
        vacuum: Some("VACUUM".to_string()),
    };
    build_command_set(&GRAMMAR, &flat, parts)
}

fn create_schema(table_name: &str) -> Vec<String> {
    let table = GRAMMAR.ident(table_name);
    let parent_columns = (0..MAX_PARENT_KEYS)
        .map(|slot| format!("    kvle_parent_key{slot} TEXT,"))
        .collect::<Vec<_>>()
        .join("\n");
    let foreign_keys = (0..MAX_PARENT_KEYS)
        .map(|slot| {
            format!(
                "    FOREIGN KEY (kvle_partition, kvle_parent_key{slot}) \
                 REFERENCES {table} (kvle_partition, kvle_key) ON DELETE CASCADE"
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n\
             \x20   kvle_partition TEXT NOT NULL,\n\
             \x20   kvle_key TEXT NOT NULL,\n\
             \x20   kvle_expiry INTEGER NOT NULL,\n\
             \x20   kvle_interval INTEGER NOT NULL,\n\
             \x20   kvle_value BLOB NOT NULL,\n\
             \x20   kvle_compressed INTEGER NOT NULL,\n\
             \x20   kvle_creation INTEGER NOT NULL,\n\
             {parent_columns}\n\
             \x20   PRIMARY KEY (kvle_partition, kvle_key),\n\
             {foreign_keys}\n\
             )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{table_name}_expiry_partition \
             ON {table} (kvle_expiry DESC, kvle_partition ASC)"
        ),
    ]
}

static MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

enum Location {
    File(PathBuf),
    Memory(String),
}

/// SqliteConnectionFactory provisions rusqlite connections for the engine.
pub struct SqliteConnectionFactory {
    location: Location,
    commands: CommandSet,
    // Keeps a named in-memory database alive while the factory exists.
    _anchor: Mutex<Option<rusqlite::Connection>>,
}

impl SqliteConnectionFactory {
    /// new opens a file-backed factory with the default table naming.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        Self::with_naming(path, TableNaming::default())
    }

    pub fn with_naming(
        path: impl AsRef<Path>,
        naming: TableNaming,
    ) -> Result<Self, BackendError> {
        let factory = SqliteConnectionFactory {
            location: Location::File(path.as_ref().to_path_buf()),
            commands: commands(&naming),
            _anchor: Mutex::new(None),
        };
        // Fail fast on an unusable path.
        factory.open_raw()?;
        Ok(factory)
    }

    /// in_memory opens a factory over a private shared-cache memory
    /// database, suitable for tests and ephemeral caches.
    pub fn in_memory() -> Result<Self, BackendError> {
        Self::in_memory_with_naming(TableNaming::default())
    }

    pub fn in_memory_with_naming(naming: TableNaming) -> Result<Self, BackendError> {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::SeqCst);
        let uri = format!(
            "file:kvlite-mem-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            seq
        );
        let factory = SqliteConnectionFactory {
            location: Location::Memory(uri),
            commands: commands(&naming),
            _anchor: Mutex::new(None),
        };
        let anchor = factory.open_raw()?;
        *factory._anchor.lock() = Some(anchor);
        Ok(factory)
    }

    fn open_raw(&self) -> Result<rusqlite::Connection, BackendError> {
        let (conn, file_backed) = match &self.location {
            Location::File(path) => (rusqlite::Connection::open(path), true),
            Location::Memory(uri) => (rusqlite::Connection::open(uri), false),
        };
        let conn = conn.map_err(map_sqlite_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(map_sqlite_err)?;
        conn.pragma_update(None, "foreign_keys", true).map_err(map_sqlite_err)?;
        if file_backed {
            let _: String = conn
                .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
                .map_err(map_sqlite_err)?;
        }
        Ok(conn)
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn open(&self) -> Result<Box<dyn Connection>, BackendError> {
        let conn = self.open_raw()?;
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn commands(&self) -> &CommandSet {
        &self.commands
    }
}

/// SqliteConnection adapts one rusqlite connection to the engine's seam.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl Connection for SqliteConnection {
    fn execute(&mut self, stmt: &Statement) -> Result<u64, BackendError> {
        let mut prepared = self.conn.prepare_cached(&stmt.sql).map_err(map_sqlite_err)?;
        bind(&mut prepared, stmt)?;
        let affected = prepared.raw_execute().map_err(map_sqlite_err)?;
        Ok(affected as u64)
    }

    fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, BackendError> {
        let mut prepared = self.conn.prepare_cached(&stmt.sql).map_err(map_sqlite_err)?;
        bind(&mut prepared, stmt)?;

        let names: Vec<String> = prepared
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        let index: Arc<HashMap<String, usize>> = Arc::new(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect(),
        );

        let mut rows = prepared.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqlite_err)? {
            let mut values = Vec::with_capacity(names.len());
            for i in 0..names.len() {
                values.push(read_value(row.get_ref(i).map_err(map_sqlite_err)?)?);
            }
            out.push(Row::new(Arc::clone(&index), values));
        }
        Ok(out)
    }

    fn batch(&mut self, sql: &str) -> Result<(), BackendError> {
        self.conn.execute_batch(sql).map_err(map_sqlite_err)
    }
}

fn bind(prepared: &mut rusqlite::Statement<'_>, stmt: &Statement) -> Result<(), BackendError> {
    for (name, value) in &stmt.params {
        let placeholder = format!("{}{name}", GRAMMAR.param_prefix);
        // Binding a name the command does not use is allowed.
        if let Some(index) = prepared.parameter_index(&placeholder).map_err(map_sqlite_err)? {
            prepared
                .raw_bind_parameter(index, to_sqlite_value(value))
                .map_err(map_sqlite_err)?;
        }
    }
    Ok(())
}

fn to_sqlite_value(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
        SqlValue::Float(f) => rusqlite::types::Value::Real(*f),
        SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
        SqlValue::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
        SqlValue::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        SqlValue::Null => rusqlite::types::Value::Null,
    }
}

fn read_value(value: ValueRef<'_>) -> Result<SqlValue, BackendError> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(i) => Ok(SqlValue::Integer(i)),
        ValueRef::Real(f) => Ok(SqlValue::Float(f)),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .map(|s| SqlValue::Text(s.to_string()))
            .map_err(|e| BackendError::Other(format!("non UTF-8 text column: {e}"))),
        ValueRef::Blob(b) => Ok(SqlValue::Blob(b.to_vec())),
    }
}

fn map_sqlite_err(e: rusqlite::Error) -> BackendError {
    match &e {
        rusqlite::Error::SqliteFailure(cause, message) => {
            let text = message
                .clone()
                .unwrap_or_else(|| cause.to_string());
            match cause.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    BackendError::ForeignKeyViolation(text)
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => BackendError::UniqueViolation(text),
                _ => match cause.code {
                    rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::NotADatabase => BackendError::Unavailable(text),
                    _ => BackendError::Other(text),
                },
            }
        }
        other => BackendError::Other(other.to_string()),
    }
}
