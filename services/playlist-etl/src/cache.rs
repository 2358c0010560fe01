//!
//! src/cache.rs
//!
//! Time-bounded memo around loading the current catalog snapshot.
//!

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::EtlError;
use crate::summary::CatalogSnapshot;

/// Anything the summary can read both tables from
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self) -> Result<CatalogSnapshot, EtlError>;
}

struct Cached {
    fetched_at: Instant,
    snapshot: Arc<CatalogSnapshot>,
}

/// Holds the last snapshot and when it was loaded. Callers inside the TTL
/// window share one `Arc`; a failed load leaves the previous entry alone.
pub struct SnapshotCache<L> {
    loader: L,
    ttl: Duration,
    slot: Mutex<Option<Cached>>,
}

impl<L: SnapshotLoader> SnapshotCache<L> {
    pub fn new(loader: L, ttl: Duration) -> Self {
        Self { loader, ttl, slot: Mutex::new(None) }
    }

    pub async fn get(&self) -> Result<Arc<CatalogSnapshot>, EtlError> {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            let age = cached.fetched_at.elapsed();
            if age < self.ttl {
                debug!(age_ms = age.as_millis() as u64, "cache.hit");
                return Ok(Arc::clone(&cached.snapshot));
            }
        }

        debug!("cache.miss");
        self.load_into(&mut slot).await
    }

    /// Drops the held snapshot; the next `get` loads again
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
        debug!("cache.invalidate");
    }

    /// Loads now regardless of age
    pub async fn refresh(&self) -> Result<Arc<CatalogSnapshot>, EtlError> {
        let mut slot = self.slot.lock().await;
        self.load_into(&mut slot).await
    }

    async fn load_into(&self, slot: &mut Option<Cached>) ->
        Result<Arc<CatalogSnapshot>, EtlError> {
        let snapshot = Arc::new(self.loader.load().await?);
        debug!(
            tracks = snapshot.tracks.len(), artists = snapshot.artists.len(),
            "cache.load"
        );
        *slot = Some(Cached { fetched_at: Instant::now(), snapshot: Arc::clone(&snapshot) });
        Ok(snapshot)
    }
}
