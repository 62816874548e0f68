//! Client-side cache of the destination's conversation ids.
//!
//! Invalidation drops the cached set; the next read refetches. Repeated
//! invalidations between reads collapse into one refetch. The lock is never
//! held across a request.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use convo_import_core::error::TransportError;
use convo_import_core::transport::ImportTransport;

pub struct ConversationCache {
    transport: Arc<dyn ImportTransport>,
    ids: Mutex<Option<HashSet<String>>>,
    invalidations: AtomicU64,
    fetches: AtomicU64,
}

impl ConversationCache {
    pub fn new(transport: Arc<dyn ImportTransport>) -> Self {
        Self {
            transport,
            ids: Mutex::new(None),
            invalidations: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn invalidate(&self) {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        *ids = None;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Cached ids, refetched when invalidated.
    pub async fn ids(&self) -> Result<HashSet<String>, TransportError> {
        if let Some(ids) = self.cached() {
            return Ok(ids);
        }
        let fresh = self.transport.conversation_ids().await?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    pub async fn count(&self) -> Result<usize, TransportError> {
        Ok(self.ids().await?.len())
    }

    fn cached(&self) -> Option<HashSet<String>> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Total `invalidate` calls so far.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Total list requests so far.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
