//! # kvlite
//!
//! Partitioned key-value cache persisted in a relational store (SQLite
//! bundled; PostgreSQL, MySQL, SQL Server and Oracle via your own driver),
//! with per-entry expiry, sliding-interval lifetime extension, optional
//! Deflate compression, pluggable serialization and hierarchical
//! parent-child invalidation.
//!
//! ## Quickstart
//!
//! ```
//! use std::sync::Arc;
//! use kvlite::cache::{Cache, CacheConfig};
//! use kvlite::error::Error;
//! use kvlite::factory::sqlite::SqliteConnectionFactory;
//!
//! fn run() -> Result<(), Error> {
//!     let factory = Arc::new(SqliteConnectionFactory::new("./cache.db")?);
//!     let cache = Cache::new(factory, CacheConfig::default())?;
//!
//!     // Sliding entry: every hit pushes the expiry 20 minutes out.
//!     cache.set_sliding(("sessions", "alice"), "token-1", time::Duration::minutes(20), &[])?;
//!     let token: Option<String> = cache.get(("sessions", "alice"))?;
//!
//!     // Remove all the pooled connections.
//!     cache.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Keys
//!
//! Entries are addressed by `(partition, key)`. A bare string addresses the
//! configured default partition; a pair selects one explicitly:
//!
//! ```
//! use kvlite::key::Key;
//!
//! let in_default = Key::from("user-42");
//! let partitioned = Key::from(("sessions", "user-42"));
//! ```
//!
//! ## Writes
//!
//! Three write shapes cover the lifetime policies:
//!
//! * `set_timed`: fixed expiry instant; reads never extend it.
//! * `set_sliding`: expires `interval` after the last successful `get`.
//! * `set_static`: sliding with the configured `static_interval_days`.
//!
//! All three upsert atomically on `(partition, key)`: concurrent writers to
//! the same key resolve last-writer-wins, and overwrites preserve the
//! original creation instant. Up to five parent keys may be attached; the
//! parents must exist in the same partition, and removing a parent removes
//! its dependents through the schema's cascade.
//!
//! ## Values
//!
//! Strings and byte arrays round-trip verbatim behind a one-byte tag.
//! Anything serde-serializable goes through the [`value::Json`] wrapper:
//!
//! ```ignore
//! cache.set_static(("users", "42"), &kvlite::value::Json(user), &[])?;
//! let user: Option<kvlite::value::Json<User>> = cache.get(("users", "42"))?;
//! ```
//!
//! Streams at or above `compression_threshold` bytes are Deflate-compressed
//! transparently. A stored value that no longer decodes (say, after an
//! incompatible upgrade) is deleted on read and reported absent rather
//! than surfacing an error.
//!
//! ## Reads
//!
//! `get`/`get_entry` apply the sliding extension; `peek`/`peek_entry` never
//! do. Absence is a value, not an error: lookups return `Ok(None)` for
//! missing or expired entries. An entry whose `utc_expiry` equals the
//! current second is already expired.
//!
//! ## Maintenance
//!
//! Every `insertions_before_auto_clean` successful writes, the engine
//! sweeps expired rows on a background thread; `sweep`, `vacuum` and
//! `size_bytes` expose the same maintenance directly.
//!
//! ## Backends
//!
//! The engine talks to the database through
//! [`factory::ConnectionFactory`], which owns the dialect command text and
//! provisions connections. [`factory::sqlite::SqliteConnectionFactory`] is
//! bundled behind the default `sqlite` feature; the other dialect modules
//! provide command sets to pair with your own driver adapter through
//! [`factory::DriverConnectionFactory`].

pub mod cache;
pub mod clock;
pub mod entry;
pub mod error;
pub mod factory;
pub mod key;
mod maintenance;
pub mod pool;
pub mod row;
mod schema;
pub mod statement;
pub mod value;
