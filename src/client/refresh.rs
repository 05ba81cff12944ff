//! Single-flight guard around the refresh call.
//!
//! However many requests fail with an expired token at once, only one refresh
//! request goes out. Everyone else awaits the same result.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use super::error::ClientError;

type SharedRefresh<T> = Shared<BoxFuture<'static, Result<T, ClientError>>>;

struct Pending<T> {
    id: u64,
    refresh: SharedRefresh<T>,
}

struct GateState<T> {
    pending: Option<Pending<T>>,
    next_id: u64,
}

pub struct RefreshGate<T> {
    state: Arc<Mutex<GateState<T>>>,
}

impl<T> Clone for RefreshGate<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for RefreshGate<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                pending: None,
                next_id: 0,
            })),
        }
    }
}

fn lock<T>(state: &Mutex<GateState<T>>) -> MutexGuard<'_, GateState<T>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clear the slot if it still holds refresh `id`.
fn release<T>(state: &Mutex<GateState<T>>, id: u64) {
    let mut guard = lock(state);
    if guard.pending.as_ref().is_some_and(|p| p.id == id) {
        guard.pending = None;
    }
}

impl<T> RefreshGate<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the refresh in progress, or start one with `refresh`.
    /// The slot is released once the refresh settles, so a later failure starts a new one.
    pub async fn run<F, Fut>(&self, refresh: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let shared = {
            let mut state = lock(&self.state);
            match &state.pending {
                Some(pending) => {
                    debug!("Joining refresh in progress");
                    pending.refresh.clone()
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    let shared = self.spawn_refresh(id, refresh());
                    state.pending = Some(Pending {
                        id,
                        refresh: shared.clone(),
                    });
                    shared
                }
            }
        };

        shared.await
    }

    fn spawn_refresh<Fut>(&self, id: u64, refresh: Fut) -> SharedRefresh<T>
    where
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        // The slot is released by the task itself, so it settles even if every waiter is dropped.
        let task_state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let result = refresh.await;
            release(&task_state, id);
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    release(&state, id);
                    Err(ClientError::Network(format!("refresh task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }
}
