//! Store configuration.

/// Configuration for a root store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum payload size accepted at commit, in bytes. `None` disables
    /// the check. Violations reject the whole commit.
    pub max_payload_size: Option<usize>,

    /// Name prefix for transaction execution-context threads.
    pub thread_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_payload_size: None,
            thread_name: "scopedb-txn".to_string(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum payload size accepted at commit.
    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = Some(size);
        self
    }

    /// Sets the name prefix for execution-context threads.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
