use super::config::CacheConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Wall-clock nanoseconds since the Unix epoch, used as the write stamp for
/// last-writer-wins ordering. Not monotonic; LWW tolerates skew.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// A stored value with its expiry and write stamp.
#[derive(Debug, Clone)]
pub struct Item {
    pub value: Vec<u8>,
    /// `None` means the item never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub timestamp: i64,
}

impl Item {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

struct Slot {
    item: Item,
    /// Current recency stamp; also the key's position in the LRU order.
    touch: u64,
}

/// Items plus their recency order. The order is a map from a monotonically
/// increasing touch counter to the key: the smallest entry is the coldest
/// key and the next eviction victim.
struct StoreInner {
    items: HashMap<String, Slot>,
    lru: BTreeMap<u64, String>,
    touch_seq: u64,
}

impl StoreInner {
    fn promote(&mut self, key: &str) {
        if let Some(slot) = self.items.get_mut(key) {
            self.lru.remove(&slot.touch);
            self.touch_seq += 1;
            slot.touch = self.touch_seq;
            self.lru.insert(self.touch_seq, key.to_string());
        }
    }

    fn insert_new(&mut self, key: String, item: Item) {
        self.touch_seq += 1;
        self.lru.insert(self.touch_seq, key.clone());
        self.items.insert(
            key,
            Slot {
                item,
                touch: self.touch_seq,
            },
        );
    }

    fn remove(&mut self, key: &str) -> Option<Item> {
        self.items.remove(key).map(|slot| {
            self.lru.remove(&slot.touch);
            slot.item
        })
    }

    fn evict_coldest(&mut self) -> Option<String> {
        let touch = *self.lru.keys().next()?;
        let key = self.lru.remove(&touch)?;
        self.items.remove(&key);
        Some(key)
    }
}

/// One tenant's in-memory items with LRU eviction, TTL expiry, and
/// timestamp-based last-writer-wins conflict resolution.
///
/// Values are copied on the way in and on the way out so callers can never
/// mutate stored bytes. A background sweeper reclaims expired items; `stop`
/// must be called before dropping the tenant.
pub struct TenantStore {
    inner: Arc<RwLock<StoreInner>>,
    max_entries: usize,
    hits: AtomicI64,
    misses: AtomicI64,
    stop_tx: watch::Sender<bool>,
}

impl TenantStore {
    pub fn new(cfg: &CacheConfig) -> Arc<Self> {
        let inner = Arc::new(RwLock::new(StoreInner {
            items: HashMap::with_capacity(cfg.initial_capacity),
            lru: BTreeMap::new(),
            touch_seq: 0,
        }));

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(sweeper_loop(inner.clone(), cfg.sweep_interval, stop_rx));

        Arc::new(Self {
            inner,
            max_entries: cfg.max_entries,
            hits: AtomicI64::new(0),
            misses: AtomicI64::new(0),
            stop_tx,
        })
    }

    /// Stores a copy of `value`.
    ///
    /// A write whose timestamp is strictly older than the resident item's is
    /// dropped; equal timestamps overwrite, so replayed writes converge the
    /// same way on every node. Inserting a genuinely new key may evict from
    /// the cold end of the LRU order when the store has finite capacity.
    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>, timestamp: i64) {
        let expires_at =
            ttl.map(|t| Utc::now() + chrono::Duration::milliseconds(t.as_millis() as i64));
        let item = Item {
            value: value.to_vec(),
            expires_at,
            timestamp,
        };

        let mut inner = self.inner.write();
        let resident_ts = inner.items.get(key).map(|slot| slot.item.timestamp);
        match resident_ts {
            Some(resident_ts) => {
                if timestamp < resident_ts {
                    tracing::debug!(
                        "Dropping stale write for {:?} ({} < {})",
                        key,
                        timestamp,
                        resident_ts
                    );
                    return;
                }
                if let Some(slot) = inner.items.get_mut(key) {
                    slot.item = item;
                }
                inner.promote(key);
            }
            None => {
                inner.insert_new(key.to_string(), item);
                if self.max_entries > 0 {
                    while inner.items.len() > self.max_entries {
                        match inner.evict_coldest() {
                            Some(victim) => tracing::debug!("Evicted {:?} (capacity)", victim),
                            None => break,
                        }
                    }
                }
            }
        }
    }

    /// Returns a copy of the live value and promotes the key. An item found
    /// expired is removed on the spot.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.write();

        let expired = match inner.items.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(slot) => slot.item.is_expired(Utc::now()),
        };
        if expired {
            inner.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        inner.promote(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        inner.items.get(key).map(|slot| slot.item.value.clone())
    }

    /// Removes the item locally. Deletes are never replicated.
    pub fn delete(&self, key: &str) {
        self.inner.write().remove(key);
    }

    /// Keys of non-expired items, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let now = Utc::now();
        let inner = self.inner.read();
        inner
            .items
            .iter()
            .filter(|(_, slot)| !slot.item.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of resident items, expired or not.
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies all resident items for persistence.
    pub fn snapshot(&self) -> Vec<(String, Item)> {
        let inner = self.inner.read();
        inner
            .items
            .iter()
            .map(|(key, slot)| (key.clone(), slot.item.clone()))
            .collect()
    }

    /// Replaces the contents with `entries`, skipping entries already expired
    /// at the instant of restore. Restored keys enter the LRU order as
    /// most-recent in iteration order.
    pub fn restore(&self, entries: Vec<(String, Item)>) {
        let now = Utc::now();
        let mut inner = self.inner.write();
        inner.items.clear();
        inner.lru.clear();
        inner.touch_seq = 0;
        for (key, item) in entries {
            if item.is_expired(now) {
                continue;
            }
            inner.insert_new(key, item);
        }
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (i64, i64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Halts the background sweeper. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Gathers expired keys under a read lock, then re-checks each under the
/// write lock before removing it. The re-check protects against a key being
/// reset with a future expiry between the two critical sections.
async fn sweeper_loop(
    inner: Arc<RwLock<StoreInner>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = ticker.tick() => {}
        }

        let now = Utc::now();
        let expired: Vec<String> = {
            let guard = inner.read();
            guard
                .items
                .iter()
                .filter(|(_, slot)| slot.item.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect()
        };
        if expired.is_empty() {
            continue;
        }

        let mut removed = 0usize;
        let mut guard = inner.write();
        let now = Utc::now();
        for key in expired {
            let still_expired = guard
                .items
                .get(&key)
                .map(|slot| slot.item.is_expired(now))
                .unwrap_or(false);
            if still_expired {
                guard.remove(&key);
                removed += 1;
            }
        }
        drop(guard);

        if removed > 0 {
            tracing::debug!("Sweeper removed {} expired items", removed);
        }
    }
}
