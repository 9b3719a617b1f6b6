use super::config::CacheConfig;
use super::errors::CacheError;
use super::snapshot::{self, PersistedItem, TenantSnapshot};
use super::store::TenantStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Owns the per-tenant stores and their lifecycle.
///
/// Tenants are created explicitly through `create` or implicitly through
/// `ensure` (the routed set path and the replicate sink both auto-create).
/// Deleting a tenant stops its sweeper before dropping the store.
pub struct TenantRegistry {
    tenants: DashMap<String, Arc<TenantStore>>,
    cfg: CacheConfig,
}

impl TenantRegistry {
    pub fn new(cfg: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            tenants: DashMap::new(),
            cfg,
        })
    }

    pub fn create(&self, tenant: &str) -> Result<(), CacheError> {
        match self.tenants.entry(tenant.to_string()) {
            Entry::Occupied(_) => Err(CacheError::TenantExists),
            Entry::Vacant(vacant) => {
                vacant.insert(TenantStore::new(&self.cfg));
                tracing::info!("Created tenant {:?}", tenant);
                Ok(())
            }
        }
    }

    pub fn delete(&self, tenant: &str) -> Result<(), CacheError> {
        let (_, store) = self
            .tenants
            .remove(tenant)
            .ok_or(CacheError::TenantNotFound)?;
        store.stop();
        let (hits, misses) = store.stats();
        tracing::info!(
            "Deleted tenant {:?} ({} hits / {} misses served)",
            tenant,
            hits,
            misses
        );
        Ok(())
    }

    /// Returns the tenant's store, creating it if missing.
    pub fn ensure(&self, tenant: &str) -> Arc<TenantStore> {
        self.tenants
            .entry(tenant.to_string())
            .or_insert_with(|| {
                tracing::info!("Implicitly created tenant {:?}", tenant);
                TenantStore::new(&self.cfg)
            })
            .clone()
    }

    fn store(&self, tenant: &str) -> Result<Arc<TenantStore>, CacheError> {
        self.tenants
            .get(tenant)
            .map(|entry| entry.value().clone())
            .ok_or(CacheError::TenantNotFound)
    }

    pub fn set(
        &self,
        tenant: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        timestamp: i64,
    ) -> Result<(), CacheError> {
        self.store(tenant)?.set(key, value, ttl, timestamp);
        Ok(())
    }

    pub fn get(&self, tenant: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        self.store(tenant)?.get(key).ok_or(CacheError::KeyNotFound)
    }

    pub fn delete_key(&self, tenant: &str, key: &str) -> Result<(), CacheError> {
        self.store(tenant)?.delete(key);
        Ok(())
    }

    pub fn keys(&self, tenant: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.store(tenant)?.keys())
    }

    /// Applies a write received from a peer, creating the tenant if needed.
    /// Uses the peer-assigned timestamp so the LWW outcome matches the
    /// primary's, and never re-enqueues replication.
    pub fn apply_replicated(
        &self,
        tenant: &str,
        key: &str,
        value: &[u8],
        ttl_secs: i64,
        timestamp: i64,
    ) {
        let ttl = if ttl_secs > 0 {
            Some(Duration::from_secs(ttl_secs as u64))
        } else {
            None
        };
        self.ensure(tenant).set(key, value, ttl, timestamp);
    }

    pub fn snapshot(&self, tenant: &str) -> Result<TenantSnapshot, CacheError> {
        let store = self.store(tenant)?;
        let items = store
            .snapshot()
            .into_iter()
            .map(|(key, item)| PersistedItem::from_item(key, &item))
            .collect();
        Ok(TenantSnapshot {
            user_id: tenant.to_string(),
            items,
        })
    }

    /// Writes the snapshot to `<data_dir>/user_<tenant>.json` via a temporary
    /// file and an atomic rename. The temporary file is removed on any
    /// failure before the rename.
    pub fn save(&self, snap: &TenantSnapshot) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.cfg.data_dir)?;
        let path = snapshot::snapshot_path(&self.cfg.data_dir, &snap.user_id);

        let tmp = tempfile::NamedTempFile::new_in(&self.cfg.data_dir)?;
        serde_json::to_writer_pretty(&tmp, snap)?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;

        tracing::info!("Saved tenant {:?} snapshot to {}", snap.user_id, path.display());
        Ok(path)
    }

    pub fn load(&self, tenant: &str) -> Result<TenantSnapshot, CacheError> {
        let path = snapshot::snapshot_path(&self.cfg.data_dir, tenant);
        let file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CacheError::SnapshotMissing
            } else {
                CacheError::Io(e)
            }
        })?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Replaces the tenant's contents with the snapshot, creating the tenant
    /// if it does not exist. Entries already expired are dropped.
    pub fn restore(&self, snap: TenantSnapshot) {
        let store = self.ensure(&snap.user_id);
        let entries = snap
            .items
            .into_iter()
            .map(PersistedItem::into_item)
            .collect();
        store.restore(entries);
    }

    /// Restores every `user_*.json` snapshot found in the data directory.
    /// Invalid files are skipped; returns how many tenants were restored.
    pub fn load_all(&self) -> Result<usize, CacheError> {
        fs::create_dir_all(&self.cfg.data_dir)?;

        let mut loaded = 0;
        for dir_entry in fs::read_dir(&self.cfg.data_dir)? {
            let dir_entry = match dir_entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !dir_entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let filename = dir_entry.file_name();
            let Some(tenant) = filename.to_str().and_then(snapshot::tenant_from_filename)
            else {
                continue;
            };

            match self.load(tenant) {
                Ok(snap) => {
                    self.restore(snap);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping snapshot file {:?}: {}", filename, e);
                }
            }
        }
        Ok(loaded)
    }

    /// Stops every tenant sweeper. Called once on shutdown.
    pub fn stop_all(&self) {
        for entry in self.tenants.iter() {
            entry.value().stop();
        }
    }
}
