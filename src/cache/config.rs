use std::path::PathBuf;
use std::time::Duration;

/// Per-tenant store configuration, shared by every tenant the registry
/// creates.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often each tenant's sweeper scans for expired items.
    pub sweep_interval: Duration,
    /// Initial capacity hint for tenant item maps.
    pub initial_capacity: usize,
    /// Per-tenant LRU capacity; 0 means unlimited.
    pub max_entries: usize,
    /// Directory for per-tenant snapshot files.
    pub data_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            initial_capacity: 64,
            max_entries: 100,
            data_dir: PathBuf::from("data"),
        }
    }
}
