//! Maintenance primitives: the expiry sweep, vacuum, and size accounting.
//!
//! Each runs as a single statement on a caller-provided connection, so they
//! are safe to issue concurrently with normal traffic.

use crate::factory::{BackendError, CommandSet, Connection};
use crate::statement::Statement;

/// sweep removes every row whose expiry lies strictly in the past and
/// returns the number of rows removed. Rows expiring at `now` exactly are
/// already invisible to readers and are collected by the next sweep.
pub(crate) fn sweep(
    conn: &mut dyn Connection,
    commands: &CommandSet,
    now: i64,
) -> Result<u64, BackendError> {
    let mut stmt = Statement::new(&commands.delete_expired_entries);
    stmt.add_param("now", &now);
    let removed = conn.execute(&stmt)?;
    if removed > 0 {
        tracing::debug!(removed, "expiry sweep removed rows");
    }
    Ok(removed)
}

/// vacuum runs the dialect's space-reclamation command, if it has one.
/// Must not run inside a transaction.
pub(crate) fn vacuum(conn: &mut dyn Connection, commands: &CommandSet) -> Result<(), BackendError> {
    if let Some(sql) = &commands.vacuum {
        conn.batch(sql)?;
        tracing::debug!("vacuum finished");
    }
    Ok(())
}

/// cache_size_bytes returns the backend's view of the stored size.
pub(crate) fn cache_size_bytes(
    conn: &mut dyn Connection,
    commands: &CommandSet,
) -> Result<i64, BackendError> {
    let rows = conn.query(&Statement::new(&commands.cache_size_bytes))?;
    let row = rows
        .first()
        .ok_or_else(|| BackendError::Other("size query returned no rows".to_string()))?;
    row.column::<i64>(0)
        .map_err(|e| BackendError::Other(format!("unreadable size row: {e}")))
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use crate::entry::MAX_PARENT_KEYS;
    use crate::factory::sqlite::SqliteConnectionFactory;
    use crate::factory::ConnectionFactory;

    use super::*;

    fn seeded_connection(factory: &SqliteConnectionFactory, expiries: &[i64]) -> Box<dyn Connection> {
        let mut conn = factory.open().unwrap();
        for ddl in &factory.commands().create_schema {
            conn.batch(ddl).unwrap();
        }
        for (i, expiry) in expiries.iter().enumerate() {
            let mut stmt = Statement::new(&factory.commands().insert_or_update_entry);
            stmt.add_param("partition", "p");
            stmt.add_param("key", &format!("k{i}"));
            stmt.add_param("expiry", expiry);
            stmt.add_param("interval", &0i64);
            stmt.add_param("value", &vec![0x02u8, b'v']);
            stmt.add_param("compressed", &false);
            stmt.add_param("creation", &0i64);
            for slot in 0..MAX_PARENT_KEYS {
                stmt.add_param(&format!("parent_key{slot}"), &None::<String>);
            }
            conn.execute(&stmt).unwrap();
        }
        conn
    }

    fn count_all(conn: &mut dyn Connection, factory: &SqliteConnectionFactory) -> i64 {
        let rows = conn
            .query(&Statement::new(&factory.commands().count_entries))
            .unwrap();
        rows[0].column_by_name::<i64>("entry_count").unwrap()
    }

    #[test]
    fn sweep_removes_only_strictly_expired_rows() {
        let factory = SqliteConnectionFactory::in_memory().unwrap();
        let mut conn = seeded_connection(&factory, &[50, 99, 100, 200]);

        let removed = sweep(&mut *conn, factory.commands(), 100).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(count_all(&mut *conn, &factory), 2);

        // Nothing left below the cutoff.
        assert_eq!(sweep(&mut *conn, factory.commands(), 100).unwrap(), 0);
    }

    #[test]
    fn size_reflects_stored_data() {
        let factory = SqliteConnectionFactory::in_memory().unwrap();
        let mut conn = seeded_connection(&factory, &[100]);
        let size = cache_size_bytes(&mut *conn, factory.commands()).unwrap();
        assert!(size > 0);
    }

    #[test]
    fn vacuum_runs_outside_transactions() {
        let factory = SqliteConnectionFactory::in_memory().unwrap();
        let mut conn = seeded_connection(&factory, &[100, 200]);
        sweep(&mut *conn, factory.commands(), 150).unwrap();
        vacuum(&mut *conn, factory.commands()).unwrap();
    }
}
