/// Key addresses a cache entry.
///
/// A key is always a non-empty string; the partition is optional and resolves
/// to the engine's `default_partition` when omitted. Construct keys from
/// string literals or `(partition, key)` pairs:
///
/// ```
/// use kvlite::key::Key;
///
/// let in_default = Key::from("user-42");
/// let partitioned = Key::from(("sessions", "user-42"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    partition: Option<String>,
    key: String,
}

impl Key {
    /// new returns a key in the engine's default partition.
    pub fn new(key: impl Into<String>) -> Key {
        Key {
            partition: None,
            key: key.into(),
        }
    }

    /// partitioned returns a key addressed under an explicit partition.
    pub fn partitioned(partition: impl Into<String>, key: impl Into<String>) -> Key {
        Key {
            partition: Some(partition.into()),
            key: key.into(),
        }
    }

    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.key
    }

    /// resolve splits the key into `(partition, key)`, substituting the
    /// default partition when none was given.
    pub(crate) fn resolve(self, default_partition: &str) -> (String, String) {
        let partition = self
            .partition
            .unwrap_or_else(|| default_partition.to_string());
        (partition, self.key)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::new(key)
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::new(key)
    }
}

impl From<(&str, &str)> for Key {
    fn from((partition, key): (&str, &str)) -> Self {
        Key::partitioned(partition, key)
    }
}

impl From<(String, String)> for Key {
    fn from((partition, key): (String, String)) -> Self {
        Key::partitioned(partition, key)
    }
}
