//! Client-side fetch cache with per-key request de-duplication.
//!
//! A fresh entry is served without touching the network. Otherwise concurrent
//! callers for the same key share one in-flight load. The load runs on its own
//! task so it settles (and clears its registration) even if every caller gives
//! up waiting. Failures are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::debug;

use super::error::ClientError;
use crate::ttl_map::TtlMap;

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V, ClientError>>>;

struct InFlight<V> {
    /// Distinguishes this load from a later one registered under the same key
    id: u64,
    load: SharedLoad<V>,
}

struct CacheState<V> {
    entries: TtlMap<V>,
    in_flight: HashMap<String, InFlight<V>>,
    next_id: u64,
}

/// Shared handle to one cache. Clones see the same entries.
pub struct FetchCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
}

impl<V> Clone for FetchCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

fn lock<V>(state: &Mutex<CacheState<V>>) -> MutexGuard<'_, CacheState<V>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop the registration for `key` if it still belongs to load `id`.
fn settle<V: Clone>(state: &Mutex<CacheState<V>>, key: &str, id: u64) -> bool {
    let mut guard = lock(state);
    if guard.in_flight.get(key).is_some_and(|f| f.id == id) {
        guard.in_flight.remove(key);
        true
    } else {
        false
    }
}

impl<V> FetchCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: TtlMap::new(capacity),
                in_flight: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Fresh cached value, else the shared in-flight load, else a new load from `loader`.
    /// On success the value is cached for `ttl`.
    pub async fn fetch<F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<V, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ClientError>> + Send + 'static,
    {
        let load = {
            let mut state = lock(&self.state);
            if let Some(value) = state.entries.get(key, Instant::now()) {
                debug!(key, "Cache hit");
                return Ok(value);
            }

            match state.in_flight.get(key) {
                Some(in_flight) => {
                    debug!(key, "Joining in-flight request");
                    in_flight.load.clone()
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    let load = self.spawn_load(key.to_string(), id, ttl, loader());
                    state.in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            load: load.clone(),
                        },
                    );
                    load
                }
            }
        };

        load.await
    }

    fn spawn_load<Fut>(&self, key: String, id: u64, ttl: Duration, load: Fut) -> SharedLoad<V>
    where
        Fut: Future<Output = Result<V, ClientError>> + Send + 'static,
    {
        let task_state = Arc::clone(&self.state);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = load.await;
            // An invalidation during the load unregisters it; its result is then not stored.
            if settle(&task_state, &task_key, id) {
                if let Ok(value) = &result {
                    lock(&task_state)
                        .entries
                        .insert(task_key, value.clone(), ttl, Instant::now());
                }
            }
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    settle(&state, &key, id);
                    Err(ClientError::Network(format!("load task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drop every entry and in-flight registration whose key contains `pattern`.
    /// Returns how many cached entries were dropped.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut state = lock(&self.state);
        state.in_flight.retain(|key, _| !key.contains(pattern));
        let dropped = state.entries.invalidate(pattern);
        if dropped > 0 {
            debug!(pattern, dropped, "Invalidated cache entries");
        }
        dropped
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.in_flight.clear();
    }

    /// Stored entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }
}
