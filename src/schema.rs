//! Schema verification and creation.
//!
//! Runs once per engine, on construction: probe the backend catalog, create
//! the entries table and index when absent, and refuse to run against a
//! table of the wrong shape.

use std::collections::HashSet;

use crate::error::Error;
use crate::factory::{CommandSet, Connection, COLUMNS};
use crate::statement::Statement;

pub(crate) fn ensure_schema(
    conn: &mut dyn Connection,
    commands: &CommandSet,
) -> Result<(), Error> {
    let rows = conn.query(&Statement::new(&commands.table_columns))?;

    if rows.is_empty() {
        tracing::info!("entries table not found, creating schema");
        for ddl in &commands.create_schema {
            conn.batch(ddl)?;
        }
        return Ok(());
    }

    let present: HashSet<String> = rows
        .iter()
        .map(|row| row.column::<String>(0).map(|name| name.to_ascii_lowercase()))
        .collect::<Result<_, _>>()
        .map_err(|e| Error::SchemaIncompatible(format!("unreadable catalog probe: {e}")))?;

    let missing: Vec<&str> = COLUMNS
        .iter()
        .filter(|column| !present.contains(**column))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(Error::SchemaIncompatible(format!(
            "entries table is missing columns: {}",
            missing.join(", ")
        )));
    }

    tracing::debug!("entries table verified");
    Ok(())
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use crate::factory::sqlite::SqliteConnectionFactory;
    use crate::factory::ConnectionFactory;

    use super::*;

    #[test]
    fn creates_schema_when_absent_and_is_idempotent() {
        let factory = SqliteConnectionFactory::in_memory().unwrap();
        let mut conn = factory.open().unwrap();

        ensure_schema(&mut *conn, factory.commands()).unwrap();
        ensure_schema(&mut *conn, factory.commands()).unwrap();

        let rows = conn
            .query(&Statement::new(&factory.commands().table_columns))
            .unwrap();
        assert_eq!(rows.len(), COLUMNS.len());
    }

    #[test]
    fn wrong_shape_is_schema_incompatible() {
        let factory = SqliteConnectionFactory::in_memory().unwrap();
        let mut conn = factory.open().unwrap();
        conn.batch("CREATE TABLE kvle_entries (kvle_partition TEXT NOT NULL, kvle_key TEXT NOT NULL)")
            .unwrap();

        let err = ensure_schema(&mut *conn, factory.commands()).unwrap_err();
        match err {
            Error::SchemaIncompatible(message) => {
                assert!(message.contains("kvle_expiry"));
                assert!(message.contains("kvle_parent_key4"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn extra_columns_are_tolerated() {
        let factory = SqliteConnectionFactory::in_memory().unwrap();
        let mut conn = factory.open().unwrap();
        ensure_schema(&mut *conn, factory.commands()).unwrap();
        conn.batch("ALTER TABLE kvle_entries ADD COLUMN kvle_note TEXT")
            .unwrap();

        ensure_schema(&mut *conn, factory.commands()).unwrap();
    }
}
