use crate::row::{self, Row};

/// The number of parent references an entry may carry.
pub const MAX_PARENT_KEYS: usize = 5;

/// CacheEntry is the full metadata view of one stored entry.
///
/// Timestamps are signed seconds since the UNIX epoch, exactly as persisted.
/// The payload stays in its stored form; decode it through
/// [`Cache::entry_value`](crate::cache::Cache::entry_value).
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub partition: String,
    pub key: String,
    /// Absolute expiry instant. The entry is visible while `utc_expiry > now`.
    pub utc_expiry: i64,
    /// Sliding-extension amount in seconds; `0` means timed (no extension).
    pub interval: i64,
    /// Set on first insert, preserved by overwrites.
    pub utc_creation: i64,
    /// Non-null parent references, in slot order.
    pub parent_keys: Vec<String>,
    pub(crate) value: Vec<u8>,
    pub compressed: bool,
}

impl CacheEntry {
    /// is_sliding reports whether a successful read extends the lifetime.
    pub fn is_sliding(&self) -> bool {
        self.interval > 0
    }

    pub(crate) fn try_from_row(row: &Row) -> Result<CacheEntry, row::Error> {
        let mut parent_keys = Vec::new();
        for slot in 0..MAX_PARENT_KEYS {
            let column = format!("kvle_parent_key{slot}");
            if let Some(parent) = row.column_by_name::<Option<String>>(&column)? {
                parent_keys.push(parent);
            }
        }
        Ok(CacheEntry {
            partition: row.column_by_name("kvle_partition")?,
            key: row.column_by_name("kvle_key")?,
            utc_expiry: row.column_by_name("kvle_expiry")?,
            interval: row.column_by_name("kvle_interval")?,
            utc_creation: row.column_by_name("kvle_creation")?,
            parent_keys,
            value: row.column_by_name("kvle_value")?,
            compressed: row.column_by_name("kvle_compressed")?,
        })
    }
}
