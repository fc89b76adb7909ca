//! The cache engine: public API, argument validation, the write/read
//! protocol, the insertion counter and the auto-clean trigger.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use time::{Duration, OffsetDateTime};

use crate::clock::{Clock, SystemClock};
use crate::entry::{CacheEntry, MAX_PARENT_KEYS};
use crate::error::Error;
use crate::factory::{BackendError, CommandSet, Connection, ConnectionFactory};
use crate::key::Key;
use crate::maintenance;
use crate::pool::{ConnectionManager, ManagedConnection, PoolConfig};
use crate::schema;
use crate::statement::Statement;
use crate::value::{
    Compressor, DeflateCompressor, FromPayload, JsonSerializer, Pipeline, Serializer, ToPayload,
};

/// ClearMode selects which rows [`Cache::clear`] removes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearMode {
    /// Remove every row, expired or not.
    All,
    /// Remove only rows whose expiry lies in the past.
    Expired,
}

/// CacheConfig has the engine's validated settings.
///
/// The configuration is immutable: to change connection parameters,
/// construct a new engine.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Partition used when a [`Key`] does not carry one.
    pub default_partition: String,

    /// Lifetime, in days, of entries written by [`Cache::set_static`].
    pub static_interval_days: u32,

    /// Number of successful sets between automatic expiry sweeps.
    pub insertions_before_auto_clean: u64,

    /// Advisory size cap; a triggered sweep that observes the cache above
    /// it logs a warning and vacuums. Writes are never refused.
    pub max_cache_size_mb: u64,

    /// Minimum payload size, in bytes, before stored streams are
    /// compressed.
    pub compression_threshold: usize,

    pub max_partition_length: usize,
    pub max_key_length: usize,

    pub pool: PoolConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_partition: "default".to_string(),
            static_interval_days: 30,
            insertions_before_auto_clean: 64,
            max_cache_size_mb: 1024,
            compression_threshold: 4096,
            max_partition_length: 255,
            max_key_length: 255,
            pool: PoolConfig::default(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.default_partition.is_empty() {
            return Err(Error::InvalidConfiguration(
                "default_partition must not be empty".to_string(),
            ));
        }
        if self.static_interval_days == 0 {
            return Err(Error::InvalidConfiguration(
                "static_interval_days must be positive".to_string(),
            ));
        }
        if self.insertions_before_auto_clean == 0 {
            return Err(Error::InvalidConfiguration(
                "insertions_before_auto_clean must be positive".to_string(),
            ));
        }
        if self.max_cache_size_mb == 0 {
            return Err(Error::InvalidConfiguration(
                "max_cache_size_mb must be positive".to_string(),
            ));
        }
        if self.max_partition_length == 0 || self.max_partition_length > 255 {
            return Err(Error::InvalidConfiguration(
                "max_partition_length must be within 1..=255".to_string(),
            ));
        }
        if self.max_key_length == 0 || self.max_key_length > 255 {
            return Err(Error::InvalidConfiguration(
                "max_key_length must be within 1..=255".to_string(),
            ));
        }
        if self.default_partition.chars().count() > self.max_partition_length {
            return Err(Error::InvalidConfiguration(
                "default_partition exceeds max_partition_length".to_string(),
            ));
        }
        if self.pool.max_open == 0 {
            return Err(Error::InvalidConfiguration(
                "pool.max_open must be positive".to_string(),
            ));
        }
        if self.pool.max_idle > self.pool.max_open {
            return Err(Error::InvalidConfiguration(
                "pool.max_idle must not exceed pool.max_open".to_string(),
            ));
        }
        Ok(())
    }

    fn static_interval_seconds(&self) -> i64 {
        i64::from(self.static_interval_days) * 86_400
    }
}

/// Cache is a partitioned key-value cache persisted in a relational store.
///
/// A cache is cheap to clone and safe to share between threads; every
/// operation checks one connection out of the pool for its duration.
/// Remember to [`close`](Cache::close) it to drain the pool.
#[derive(Clone)]
pub struct Cache {
    core: Arc<CacheCore>,
}

struct CacheCore {
    factory: Arc<dyn ConnectionFactory>,
    pool: ConnectionManager,
    config: CacheConfig,
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
    insertions: AtomicU64,
    disposed: AtomicBool,
    sweeping: AtomicBool,
}

impl Cache {
    /// new creates an engine over the given factory with the default
    /// services: system clock, JSON serializer, Deflate compressor.
    ///
    /// The entries table is created on first use; an existing table of the
    /// wrong shape fails with [`Error::SchemaIncompatible`].
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: CacheConfig) -> Result<Cache, Error> {
        Self::with_services(
            factory,
            config,
            Arc::new(SystemClock),
            Arc::new(JsonSerializer),
            Arc::new(DeflateCompressor::default()),
        )
    }

    /// with_services creates an engine with explicit clock, serializer and
    /// compressor implementations.
    pub fn with_services(
        factory: Arc<dyn ConnectionFactory>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        serializer: Arc<dyn Serializer>,
        compressor: Arc<dyn Compressor>,
    ) -> Result<Cache, Error> {
        config.validate()?;
        let pool = ConnectionManager::new(Arc::clone(&factory), config.pool.clone());
        let pipeline = Pipeline::new(serializer, compressor, config.compression_threshold);
        let core = Arc::new(CacheCore {
            factory,
            pool,
            config,
            pipeline,
            clock,
            insertions: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            sweeping: AtomicBool::new(false),
        });

        let mut conn = core.checkout()?;
        schema::ensure_schema(&mut *conn, core.commands())?;
        drop(conn);

        Ok(Cache { core })
    }

    /// set_timed inserts or replaces an entry with a fixed expiry instant;
    /// reads do not extend it.
    pub fn set_timed<T>(
        &self,
        key: impl Into<Key>,
        value: &T,
        expires_at: OffsetDateTime,
        parent_keys: &[&str],
    ) -> Result<(), Error>
    where
        T: ToPayload + ?Sized,
    {
        self.set_entry(key.into(), value, expires_at.unix_timestamp(), 0, parent_keys)
    }

    /// set_sliding inserts or replaces an entry that expires `interval`
    /// after the last successful read.
    pub fn set_sliding<T>(
        &self,
        key: impl Into<Key>,
        value: &T,
        interval: Duration,
        parent_keys: &[&str],
    ) -> Result<(), Error>
    where
        T: ToPayload + ?Sized,
    {
        let seconds = interval.whole_seconds();
        let expiry = self.core.clock.unix_seconds().saturating_add(seconds.max(0));
        self.set_entry(key.into(), value, expiry, seconds, parent_keys)
    }

    /// set_static inserts or replaces a sliding entry whose interval is the
    /// configured `static_interval_days`.
    pub fn set_static<T>(
        &self,
        key: impl Into<Key>,
        value: &T,
        parent_keys: &[&str],
    ) -> Result<(), Error>
    where
        T: ToPayload + ?Sized,
    {
        let seconds = self.core.config.static_interval_seconds();
        let expiry = self.core.clock.unix_seconds().saturating_add(seconds);
        self.set_entry(key.into(), value, expiry, seconds, parent_keys)
    }

    /// get returns the entry's value, extending the expiry of sliding
    /// entries to `now + interval` first. Absent or expired entries return
    /// `None`; an entry that fails to decode is deleted and also reported
    /// absent.
    pub fn get<T>(&self, key: impl Into<Key>) -> Result<Option<T>, Error>
    where
        T: FromPayload,
    {
        let (mut conn, entry) = self.lookup(key.into(), true)?;
        match entry {
            Some(entry) => self.core.decode_or_heal(&mut conn, entry),
            None => Ok(None),
        }
    }

    /// get_entry returns the full entry metadata, with the same sliding
    /// side-effect as [`Cache::get`].
    pub fn get_entry(&self, key: impl Into<Key>) -> Result<Option<CacheEntry>, Error> {
        let (_conn, entry) = self.lookup(key.into(), true)?;
        Ok(entry)
    }

    /// peek returns the entry's value without touching its expiry.
    pub fn peek<T>(&self, key: impl Into<Key>) -> Result<Option<T>, Error>
    where
        T: FromPayload,
    {
        let (mut conn, entry) = self.lookup(key.into(), false)?;
        match entry {
            Some(entry) => self.core.decode_or_heal(&mut conn, entry),
            None => Ok(None),
        }
    }

    /// peek_entry returns the full entry metadata without touching its
    /// expiry.
    pub fn peek_entry(&self, key: impl Into<Key>) -> Result<Option<CacheEntry>, Error> {
        let (_conn, entry) = self.lookup(key.into(), false)?;
        Ok(entry)
    }

    /// entry_value decodes the payload of an entry returned by one of the
    /// metadata lookups.
    pub fn entry_value<T>(&self, entry: &CacheEntry) -> Result<T, Error>
    where
        T: FromPayload,
    {
        self.core
            .pipeline
            .decode(&entry.value, entry.compressed)
            .map_err(|e| Error::InvalidData(e.to_string()))
    }

    /// get_entries scans the live entries of one partition (or all of
    /// them), extending each sliding entry it returns.
    pub fn get_entries(&self, partition: Option<&str>) -> Result<Vec<CacheEntry>, Error> {
        self.core.scan(partition, true)
    }

    /// peek_entries scans without side effects.
    pub fn peek_entries(&self, partition: Option<&str>) -> Result<Vec<CacheEntry>, Error> {
        self.core.scan(partition, false)
    }

    /// entries_by_parent returns the live entries of a partition that
    /// reference the given parent key.
    pub fn entries_by_parent(
        &self,
        partition: &str,
        parent_key: &str,
    ) -> Result<Vec<CacheEntry>, Error> {
        self.core.ensure_open()?;
        self.core.check_partition(partition)?;
        self.core.check_parent(parent_key)?;

        let now = self.core.clock.unix_seconds();
        let mut stmt = Statement::new(&self.core.commands().entries_by_parent);
        stmt.add_param("partition", partition);
        stmt.add_param("parent", parent_key);
        stmt.add_param("now", &now);

        let mut conn = self.core.checkout()?;
        let rows = self.core.run(&mut conn, |c| c.query(&stmt))?;
        Ok(self.core.entries_from_rows(&rows))
    }

    /// contains reports whether a live entry exists for the key.
    pub fn contains(&self, key: impl Into<Key>) -> Result<bool, Error> {
        self.core.ensure_open()?;
        let (partition, key) = self.core.resolve_key(key.into())?;
        let now = self.core.clock.unix_seconds();

        let mut stmt = Statement::new(&self.core.commands().contains_entry);
        stmt.add_param("partition", &partition);
        stmt.add_param("key", &key);
        stmt.add_param("now", &now);

        let mut conn = self.core.checkout()?;
        Ok(self.core.scalar(&mut conn, &stmt)? > 0)
    }

    /// count returns the number of live entries in a partition, or in the
    /// whole cache when `partition` is `None`.
    pub fn count(&self, partition: Option<&str>) -> Result<i64, Error> {
        self.core.count_entries(partition, false)
    }

    /// count_including_expired also counts rows that expired but have not
    /// been swept yet.
    pub fn count_including_expired(&self, partition: Option<&str>) -> Result<i64, Error> {
        self.core.count_entries(partition, true)
    }

    /// remove deletes an entry; dependents cascade. Removing an absent
    /// entry succeeds.
    pub fn remove(&self, key: impl Into<Key>) -> Result<(), Error> {
        self.core.ensure_open()?;
        let (partition, key) = self.core.resolve_key(key.into())?;
        let mut conn = self.core.checkout()?;
        self.core.delete_row(&mut conn, &partition, &key)?;
        Ok(())
    }

    /// clear bulk-deletes entries and returns how many rows went away.
    pub fn clear(&self, partition: Option<&str>, mode: ClearMode) -> Result<u64, Error> {
        self.core.ensure_open()?;
        if let Some(partition) = partition {
            self.core.check_partition(partition)?;
        }

        let commands = self.core.commands();
        let sql = match (partition, mode) {
            (None, ClearMode::All) => &commands.delete_entries,
            (None, ClearMode::Expired) => &commands.delete_expired_entries,
            (Some(_), ClearMode::All) => &commands.delete_entries_in_partition,
            (Some(_), ClearMode::Expired) => &commands.delete_expired_entries_in_partition,
        };
        let mut stmt = Statement::new(sql);
        if let Some(partition) = partition {
            stmt.add_param("partition", partition);
        }
        if mode == ClearMode::Expired {
            stmt.add_param("now", &self.core.clock.unix_seconds());
        }

        let mut conn = self.core.checkout()?;
        let removed = self.core.run(&mut conn, |c| c.execute(&stmt))?;
        tracing::debug!(removed, partition = partition.unwrap_or("*"), "cleared entries");
        Ok(removed)
    }

    /// sweep removes every expired row and returns how many went away.
    pub fn sweep(&self) -> Result<u64, Error> {
        self.core.ensure_open()?;
        let now = self.core.clock.unix_seconds();
        let mut conn = self.core.checkout()?;
        self.core
            .run(&mut conn, |c| maintenance::sweep(c, self.core.commands(), now))
    }

    /// size_bytes returns the backend's view of the stored cache size.
    pub fn size_bytes(&self) -> Result<i64, Error> {
        self.core.ensure_open()?;
        let mut conn = self.core.checkout()?;
        self.core.run(&mut conn, |c| {
            maintenance::cache_size_bytes(c, self.core.commands())
        })
    }

    /// vacuum reclaims space where the dialect supports it. Run it after a
    /// sweep; it is a no-op elsewhere.
    pub fn vacuum(&self) -> Result<(), Error> {
        self.core.ensure_open()?;
        let mut conn = self.core.checkout()?;
        self.core
            .run(&mut conn, |c| maintenance::vacuum(c, self.core.commands()))
    }

    /// default_partition returns the partition used by keys that omit one.
    pub fn default_partition(&self) -> &str {
        &self.core.config.default_partition
    }

    /// close disposes the engine and drains the pool. Idempotent; later
    /// operations fail with [`Error::Disposed`].
    pub fn close(&self) {
        if !self.core.disposed.swap(true, Ordering::SeqCst) {
            self.core.pool.close();
            tracing::debug!("cache disposed");
        }
    }

    fn set_entry<T>(
        &self,
        key: Key,
        value: &T,
        utc_expiry: i64,
        interval: i64,
        parent_keys: &[&str],
    ) -> Result<(), Error>
    where
        T: ToPayload + ?Sized,
    {
        let core = &self.core;
        core.ensure_open()?;
        let (partition, key) = core.resolve_key(key)?;
        if parent_keys.len() > MAX_PARENT_KEYS {
            return Err(Error::InvalidArgument(format!(
                "at most {MAX_PARENT_KEYS} parent keys are allowed, got {}",
                parent_keys.len()
            )));
        }
        for parent_key in parent_keys {
            core.check_parent(parent_key)?;
        }
        if interval < 0 {
            return Err(Error::InvalidArgument(
                "interval must not be negative".to_string(),
            ));
        }

        let (value, compressed) = core.pipeline.encode(value)?;
        let creation = core.clock.unix_seconds();

        let mut stmt = Statement::new(&core.commands().insert_or_update_entry);
        stmt.add_param("partition", &partition);
        stmt.add_param("key", &key);
        stmt.add_param("expiry", &utc_expiry);
        stmt.add_param("interval", &interval);
        stmt.add_param("value", &value);
        stmt.add_param("compressed", &compressed);
        stmt.add_param("creation", &creation);
        for slot in 0..MAX_PARENT_KEYS {
            let parent = parent_keys.get(slot).map(|p| p.to_string());
            stmt.add_param(&format!("parent_key{slot}"), &parent);
        }

        let mut conn = core.checkout()?;
        core.run(&mut conn, |c| c.execute(&stmt))?;
        drop(conn);

        self.record_insertion();
        Ok(())
    }

    /// lookup fetches one live entry, optionally applying the sliding
    /// extension, and hands back the connection for a follow-up decode.
    fn lookup(
        &self,
        key: Key,
        extend: bool,
    ) -> Result<(ManagedConnection, Option<CacheEntry>), Error> {
        let core = &self.core;
        core.ensure_open()?;
        let (partition, key) = core.resolve_key(key)?;
        let now = core.clock.unix_seconds();
        let mut conn = core.checkout()?;
        let entry = core.fetch_entry(&mut conn, &partition, &key, now, extend)?;
        Ok((conn, entry))
    }

    fn record_insertion(&self) {
        // The counter is a hint; lost updates under contention are fine.
        let count = self.core.insertions.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.core.config.insertions_before_auto_clean {
            self.core.insertions.store(0, Ordering::Relaxed);
            self.spawn_auto_clean();
        }
    }

    fn spawn_auto_clean(&self) {
        if self
            .core
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name("kvlite-autoclean".to_string())
            .spawn(move || {
                if let Err(e) = core.auto_clean() {
                    tracing::warn!(error = %e, "auto-clean failed");
                }
                core.sweeping.store(false, Ordering::SeqCst);
            });
        if let Err(e) = spawned {
            self.core.sweeping.store(false, Ordering::SeqCst);
            tracing::warn!(error = %e, "failed to spawn auto-clean thread");
        }
    }
}

impl CacheCore {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    fn commands(&self) -> &CommandSet {
        self.factory.commands()
    }

    fn checkout(&self) -> Result<ManagedConnection, Error> {
        self.pool.get().map_err(Error::from)
    }

    /// run executes one backend closure, discarding the connection when the
    /// backend reports it broken.
    fn run<T>(
        &self,
        conn: &mut ManagedConnection,
        f: impl FnOnce(&mut dyn Connection) -> Result<T, BackendError>,
    ) -> Result<T, Error> {
        match f(&mut **conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if matches!(e, BackendError::Unavailable(_)) {
                    conn.invalidate();
                }
                Err(e.into())
            }
        }
    }

    fn resolve_key(&self, key: Key) -> Result<(String, String), Error> {
        let (partition, key) = key.resolve(&self.config.default_partition);
        self.check_partition(&partition)?;
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".to_string()));
        }
        if key.chars().count() > self.config.max_key_length {
            return Err(Error::InvalidArgument(format!(
                "key exceeds {} characters",
                self.config.max_key_length
            )));
        }
        Ok((partition, key))
    }

    fn check_partition(&self, partition: &str) -> Result<(), Error> {
        if partition.is_empty() {
            return Err(Error::InvalidArgument(
                "partition must not be empty".to_string(),
            ));
        }
        if partition.chars().count() > self.config.max_partition_length {
            return Err(Error::InvalidArgument(format!(
                "partition exceeds {} characters",
                self.config.max_partition_length
            )));
        }
        Ok(())
    }

    fn check_parent(&self, parent_key: &str) -> Result<(), Error> {
        if parent_key.is_empty() {
            return Err(Error::InvalidArgument(
                "parent key must not be empty".to_string(),
            ));
        }
        if parent_key.chars().count() > self.config.max_key_length {
            return Err(Error::InvalidArgument(format!(
                "parent key exceeds {} characters",
                self.config.max_key_length
            )));
        }
        Ok(())
    }

    fn fetch_entry(
        &self,
        conn: &mut ManagedConnection,
        partition: &str,
        key: &str,
        now: i64,
        extend: bool,
    ) -> Result<Option<CacheEntry>, Error> {
        let mut stmt = Statement::new(&self.commands().peek_entry);
        stmt.add_param("partition", partition);
        stmt.add_param("key", key);
        stmt.add_param("now", &now);

        let rows = self.run(conn, |c| c.query(&stmt))?;
        let row = match rows.first() {
            Some(row) => row,
            None => return Ok(None),
        };
        let mut entry = match CacheEntry::try_from_row(row) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    partition,
                    key,
                    error = %e,
                    "removing cache entry with an unreadable row"
                );
                self.delete_row(conn, partition, key)?;
                return Ok(None);
            }
        };

        if extend && entry.interval > 0 {
            let new_expiry = now.saturating_add(entry.interval);
            let mut update = Statement::new(&self.commands().update_entry_expiry);
            update.add_param("partition", partition);
            update.add_param("key", key);
            update.add_param("expiry", &new_expiry);
            // Zero affected rows means a concurrent remove; the read stands.
            self.run(conn, |c| c.execute(&update))?;
            entry.utc_expiry = new_expiry;
        }

        Ok(Some(entry))
    }

    fn decode_or_heal<T>(
        &self,
        conn: &mut ManagedConnection,
        entry: CacheEntry,
    ) -> Result<Option<T>, Error>
    where
        T: FromPayload,
    {
        match self.pipeline.decode::<T>(&entry.value, entry.compressed) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    partition = %entry.partition,
                    key = %entry.key,
                    error = %e,
                    "removing cache entry that failed to decode"
                );
                self.delete_row(conn, &entry.partition, &entry.key)?;
                Ok(None)
            }
        }
    }

    fn delete_row(
        &self,
        conn: &mut ManagedConnection,
        partition: &str,
        key: &str,
    ) -> Result<u64, Error> {
        let mut stmt = Statement::new(&self.commands().delete_entry);
        stmt.add_param("partition", partition);
        stmt.add_param("key", key);
        self.run(conn, |c| c.execute(&stmt))
    }

    fn scan(&self, partition: Option<&str>, extend: bool) -> Result<Vec<CacheEntry>, Error> {
        self.ensure_open()?;
        if let Some(partition) = partition {
            self.check_partition(partition)?;
        }
        let now = self.clock.unix_seconds();

        let commands = self.commands();
        let mut stmt = match partition {
            Some(partition) => {
                let mut stmt = Statement::new(&commands.peek_entries_in_partition);
                stmt.add_param("partition", partition);
                stmt
            }
            None => Statement::new(&commands.peek_entries),
        };
        stmt.add_param("now", &now);

        let mut conn = self.checkout()?;
        let rows = self.run(&mut conn, |c| c.query(&stmt))?;
        let mut entries = self.entries_from_rows(&rows);

        if extend {
            for entry in entries.iter_mut().filter(|entry| entry.interval > 0) {
                let new_expiry = now.saturating_add(entry.interval);
                let mut update = Statement::new(&commands.update_entry_expiry);
                update.add_param("partition", &entry.partition);
                update.add_param("key", &entry.key);
                update.add_param("expiry", &new_expiry);
                self.run(&mut conn, |c| c.execute(&update))?;
                entry.utc_expiry = new_expiry;
            }
        }

        Ok(entries)
    }

    fn entries_from_rows(&self, rows: &[crate::row::Row]) -> Vec<CacheEntry> {
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match CacheEntry::try_from_row(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable row in scan"),
            }
        }
        entries
    }

    fn count_entries(&self, partition: Option<&str>, include_expired: bool) -> Result<i64, Error> {
        self.ensure_open()?;
        if let Some(partition) = partition {
            self.check_partition(partition)?;
        }

        let commands = self.commands();
        let sql = match (partition, include_expired) {
            (None, true) => &commands.count_entries,
            (None, false) => &commands.count_valid_entries,
            (Some(_), true) => &commands.count_entries_in_partition,
            (Some(_), false) => &commands.count_valid_entries_in_partition,
        };
        let mut stmt = Statement::new(sql);
        if let Some(partition) = partition {
            stmt.add_param("partition", partition);
        }
        if !include_expired {
            stmt.add_param("now", &self.clock.unix_seconds());
        }

        let mut conn = self.checkout()?;
        self.scalar(&mut conn, &stmt)
    }

    fn scalar(&self, conn: &mut ManagedConnection, stmt: &Statement) -> Result<i64, Error> {
        let rows = self.run(conn, |c| c.query(stmt))?;
        let row = rows
            .first()
            .ok_or_else(|| Error::InvalidData("scalar query returned no rows".to_string()))?;
        Ok(row.column::<i64>(0)?)
    }

    fn auto_clean(&self) -> Result<(), Error> {
        self.ensure_open()?;
        let now = self.clock.unix_seconds();
        let mut conn = self.checkout()?;
        let removed = self.run(&mut conn, |c| maintenance::sweep(c, self.commands(), now))?;

        let size = self.run(&mut conn, |c| {
            maintenance::cache_size_bytes(c, self.commands())
        })?;
        let cap_bytes = self.config.max_cache_size_mb.saturating_mul(1024 * 1024);
        if size.max(0) as u64 > cap_bytes {
            tracing::warn!(
                size_bytes = size,
                max_cache_size_mb = self.config.max_cache_size_mb,
                "cache size above advisory cap, vacuuming"
            );
            self.run(&mut conn, |c| maintenance::vacuum(c, self.commands()))?;
        }

        tracing::debug!(removed, "auto-clean finished");
        Ok(())
    }
}
