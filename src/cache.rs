//! Keyed get-or-compute cache used for row groups and finished reports.
//!
//! Values cross the [`CacheLayer`] boundary as JSON bytes so any backing
//! store (in-process, redis, ...) can hold them; [`get_or_generate`] is the
//! typed entry point the engine uses.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{ReadinessError, Result};

pub const DEFAULT_TTL_SECS: u64 = 4 * 60 * 60;

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Recompute and overwrite even when a fresh entry exists.
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

/// Deferred computation handed to a cache on a miss.
pub type ComputeFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Keyed get-or-compute store.
///
/// Implementations must be safe to share between tasks and must run at most
/// one computation per key at a time. Failed computations are never stored.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get_or_compute<'a>(
        &'a self,
        key: &'a str,
        options: &'a CacheOptions,
        compute: ComputeFuture<'a>,
    ) -> Result<Vec<u8>>;
}

/// Derives a stable key: `prefix` followed by the SHA-256 of the JSON form
/// of `params`. Maps inside `params` must be ordered (`BTreeMap`) for the
/// key to be stable.
pub fn cache_key<P: Serialize + ?Sized>(prefix: &str, params: &P) -> Result<String> {
    let json = serde_json::to_vec(params)?;
    let digest = Sha256::digest(&json);
    Ok(format!("{}{}", prefix, hex::encode(digest)))
}

/// Returns the cached `T` under `key`, or runs `generate` and caches its result.
pub async fn get_or_generate<T, F>(
    cache: &dyn CacheLayer,
    options: &CacheOptions,
    key: &str,
    generate: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: Future<Output = Result<T>> + Send,
{
    let compute: ComputeFuture<'_> = Box::pin(async move {
        let value = generate.await?;
        Ok(serde_json::to_vec(&value)?)
    });
    let bytes = cache.get_or_compute(key, options, compute).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ReadinessError::Cache(format!("cannot decode cached value for {}: {}", key, e))
    })
}

// ── In-memory implementation ────────────────────────────────────────

struct CachedEntry {
    bytes: Vec<u8>,
    /// `None` when the ttl is too large to represent.
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn new(bytes: Vec<u8>, ttl_secs: u64) -> Self {
        Self {
            bytes,
            expires_at: Instant::now().checked_add(Duration::from_secs(ttl_secs)),
        }
    }

    fn is_fresh(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

type Slot = Arc<Mutex<Option<CachedEntry>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Process-local cache. Each key owns an async mutex, so concurrent callers
/// for the same key wait for the first computation instead of repeating it.
///
/// A slot whose computation fails is dropped unless it still holds a fresh
/// value, and every store sweeps out idle slots that have expired.
#[derive(Default)]
pub struct MemoryCache {
    slots: DashMap<String, Slot>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self, key: &str) {
        self.slots.remove(key);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.slots.len(),
        }
    }

    fn slot(&self, key: &str) -> Slot {
        // Clone the Arc out so the shard lock is released before awaiting.
        self.slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Whether `slot` is still the one registered under `key`.
    fn is_current(&self, key: &str, slot: &Slot) -> bool {
        self.slots
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current.value(), slot))
    }

    fn forget(&self, key: &str, slot: &Slot) {
        self.slots.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Drops expired and empty slots nobody is holding. Locked slots are
    /// skipped, including the caller's own.
    fn sweep(&self) {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => entry.as_ref().map_or(false, CachedEntry::is_fresh),
            Err(_) => true,
        });
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            tracing::debug!("[CACHE] swept {} expired entries", removed);
        }
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get_or_compute<'a>(
        &'a self,
        key: &'a str,
        options: &'a CacheOptions,
        compute: ComputeFuture<'a>,
    ) -> Result<Vec<u8>> {
        let (slot, mut guard) = loop {
            let slot = self.slot(key);
            let guard = slot.clone().lock_owned().await;
            // Removed while we waited; start over on the live slot.
            if self.is_current(key, &slot) {
                break (slot, guard);
            }
        };

        if !options.force_refresh {
            if let Some(entry) = guard.as_ref().filter(|e| e.is_fresh()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[CACHE] hit key={}", key);
                return Ok(entry.bytes.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "[CACHE] miss key={} force_refresh={}",
            key,
            options.force_refresh
        );
        match compute.await {
            Ok(bytes) => {
                *guard = Some(CachedEntry::new(bytes.clone(), options.ttl_secs));
                self.sweep();
                Ok(bytes)
            }
            Err(e) => {
                if !guard.as_ref().map_or(false, CachedEntry::is_fresh) {
                    self.forget(key, &slot);
                }
                Err(e)
            }
        }
    }
}

/// Cache that always computes. Useful when caching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl CacheLayer for NoCache {
    async fn get_or_compute<'a>(
        &'a self,
        _key: &'a str,
        _options: &'a CacheOptions,
        compute: ComputeFuture<'a>,
    ) -> Result<Vec<u8>> {
        compute.await
    }
}
