//! Bounded connection pool.
//!
//! Every cache operation checks one connection out for its duration and
//! returns it through [`ManagedConnection`]'s drop, on every exit path.
//! Waiters park on a condvar until a connection is released or the checkout
//! timeout elapses.

use std::collections::VecDeque;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::factory::{BackendError, Connection, ConnectionFactory};

/// PoolConfig sizes the connection pool.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// max_open is the maximum number of connections, open or checked out.
    /// A checkout beyond this blocks until one is released or the timeout
    /// elapses.
    pub max_open: usize,

    /// max_idle is the maximum number of idle connections kept for reuse;
    /// releases beyond it close the connection instead.
    pub max_idle: usize,

    /// checkout_timeout is the longest a caller waits for a connection.
    pub checkout_timeout: Duration,

    /// idle_timeout is the wait before an idle connection is discarded.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_open: 16,
            max_idle: 8,
            checkout_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("connection checkout timed out")]
    CheckoutTimeout,

    #[error("connection pool is closed")]
    Closed,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

struct IdleConnection {
    conn: Box<dyn Connection>,
    idle_since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    /// Connections alive anywhere: idle here or checked out by a caller.
    num_open: usize,
    closed: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    available: Condvar,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
}

/// ConnectionManager hands out pooled connections.
#[derive(Clone)]
pub(crate) struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub(crate) fn new(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Self {
        ConnectionManager {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    num_open: 0,
                    closed: false,
                }),
                available: Condvar::new(),
                config,
                factory,
            }),
        }
    }

    /// get checks a connection out, opening a new one while under
    /// `max_open`, otherwise waiting for a release.
    pub(crate) fn get(&self) -> Result<ManagedConnection, PoolError> {
        let deadline = Instant::now() + self.shared.config.checkout_timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            let now = Instant::now();
            while let Some(front) = state.idle.front() {
                if now.duration_since(front.idle_since) <= self.shared.config.idle_timeout {
                    break;
                }
                let stale = state.idle.pop_front();
                state.num_open -= 1;
                drop(stale);
                tracing::trace!("discarded idle backend connection");
            }

            if let Some(idle) = state.idle.pop_front() {
                drop(state);
                return Ok(ManagedConnection::new(self.clone(), idle.conn));
            }

            if state.num_open < self.shared.config.max_open {
                state.num_open += 1;
                drop(state);
                return match self.shared.factory.open() {
                    Ok(conn) => {
                        tracing::trace!("opened new backend connection");
                        Ok(ManagedConnection::new(self.clone(), conn))
                    }
                    Err(e) => {
                        self.shared.state.lock().num_open -= 1;
                        self.shared.available.notify_one();
                        Err(PoolError::Backend(e))
                    }
                };
            }

            if self
                .shared
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                tracing::info!(
                    max_open = self.shared.config.max_open,
                    "timeout waiting for a pooled connection"
                );
                return Err(PoolError::CheckoutTimeout);
            }
        }
    }

    fn recycle(&self, conn: Box<dyn Connection>, valid: bool) {
        let discarded = {
            let mut state = self.shared.state.lock();
            if valid && !state.closed && state.idle.len() < self.shared.config.max_idle {
                state.idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                None
            } else {
                state.num_open -= 1;
                Some(conn)
            }
        };
        drop(discarded);
        self.shared.available.notify_one();
    }

    /// close drains the idle connections and fails all future checkouts.
    /// Idempotent; connections still checked out are closed on release.
    pub(crate) fn close(&self) {
        let drained = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.num_open -= state.idle.len();
            mem::take(&mut state.idle)
        };
        drop(drained);
        self.shared.available.notify_all();
        tracing::debug!("connection pool closed");
    }

    #[cfg(test)]
    fn num_open(&self) -> usize {
        self.shared.state.lock().num_open
    }
}

/// ManagedConnection is a checked-out connection that returns itself to the
/// pool when dropped. Invalidated connections are discarded instead.
pub struct ManagedConnection {
    pool: ConnectionManager,
    conn: Option<Box<dyn Connection>>,
    valid: bool,
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("valid", &self.valid)
            .finish()
    }
}

impl ManagedConnection {
    fn new(pool: ConnectionManager, conn: Box<dyn Connection>) -> Self {
        ManagedConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// invalidate marks the connection broken so it is not reused.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        let conn = self.conn.take().unwrap();
        self.pool.recycle(conn, self.valid);
    }
}

impl Deref for ManagedConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().unwrap().as_ref()
    }
}

impl DerefMut for ManagedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap().as_mut()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use crate::factory::{postgres, CommandSet, TableNaming};
    use crate::row::Row;
    use crate::statement::Statement;

    use super::*;

    struct StubConnection;

    impl Connection for StubConnection {
        fn execute(&mut self, _stmt: &Statement) -> Result<u64, BackendError> {
            Ok(0)
        }

        fn query(&mut self, _stmt: &Statement) -> Result<Vec<Row>, BackendError> {
            Ok(vec![])
        }

        fn batch(&mut self, _sql: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    struct StubFactory {
        commands: CommandSet,
        opened: AtomicUsize,
        fail: AtomicBool,
    }

    impl StubFactory {
        fn new() -> Self {
            StubFactory {
                commands: postgres::commands(&TableNaming::default()),
                opened: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl ConnectionFactory for StubFactory {
        fn open(&self) -> Result<Box<dyn Connection>, BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("stub offline".to_string()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubConnection))
        }

        fn commands(&self) -> &CommandSet {
            &self.commands
        }
    }

    fn pool_with(factory: Arc<StubFactory>, config: PoolConfig) -> ConnectionManager {
        ConnectionManager::new(factory, config)
    }

    #[test]
    fn released_connections_are_reused() {
        let factory = Arc::new(StubFactory::new());
        let pool = pool_with(Arc::clone(&factory), PoolConfig::default());

        let conn = pool.get().unwrap();
        drop(conn);
        let conn = pool.get().unwrap();
        drop(conn);

        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.num_open(), 1);
    }

    #[test]
    fn invalidated_connections_are_discarded() {
        let factory = Arc::new(StubFactory::new());
        let pool = pool_with(Arc::clone(&factory), PoolConfig::default());

        let mut conn = pool.get().unwrap();
        conn.invalidate();
        drop(conn);
        assert_eq!(pool.num_open(), 0);

        drop(pool.get().unwrap());
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn checkout_times_out_when_exhausted() {
        let factory = Arc::new(StubFactory::new());
        let pool = pool_with(
            factory,
            PoolConfig {
                max_open: 1,
                checkout_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let held = pool.get().unwrap();
        let err = pool.get().unwrap_err();
        assert!(matches!(err, PoolError::CheckoutTimeout));

        drop(held);
        assert!(pool.get().is_ok());
    }

    #[test]
    fn waiter_wakes_on_release() {
        let factory = Arc::new(StubFactory::new());
        let pool = pool_with(
            factory,
            PoolConfig {
                max_open: 1,
                checkout_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let held = pool.get().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.get().map(drop))
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn open_failure_releases_capacity() {
        let factory = Arc::new(StubFactory::new());
        let pool = pool_with(
            Arc::clone(&factory),
            PoolConfig {
                max_open: 1,
                checkout_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        factory.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            pool.get().unwrap_err(),
            PoolError::Backend(BackendError::Unavailable(_))
        ));
        assert_eq!(pool.num_open(), 0);

        factory.fail.store(false, Ordering::SeqCst);
        assert!(pool.get().is_ok());
    }

    #[test]
    fn close_is_idempotent_and_fails_checkouts() {
        let factory = Arc::new(StubFactory::new());
        let pool = pool_with(factory, PoolConfig::default());

        drop(pool.get().unwrap());
        pool.close();
        pool.close();

        assert!(matches!(pool.get().unwrap_err(), PoolError::Closed));
        assert_eq!(pool.num_open(), 0);
    }

    #[test]
    fn release_after_close_discards_the_connection() {
        let factory = Arc::new(StubFactory::new());
        let pool = pool_with(factory, PoolConfig::default());

        let conn = pool.get().unwrap();
        pool.close();
        drop(conn);
        assert_eq!(pool.num_open(), 0);
    }
}
