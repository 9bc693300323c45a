//! Lazily loaded, shared model handle.
//!
//! A slot holds at most one loaded model. The first caller loads it;
//! concurrent callers wait for that load and share the result. A failed
//! load leaves the slot empty so a later call can retry. `teardown`
//! releases the handle (already running users keep their `Arc`).

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::core::CoreResult;

pub struct ModelSlot<T> {
    cell: Mutex<Arc<OnceCell<Arc<T>>>>,
    loads: AtomicUsize,
}

impl<T> Default for ModelSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ModelSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(Arc::new(OnceCell::new())),
            loads: AtomicUsize::new(0),
        }
    }

    fn current(&self) -> Arc<OnceCell<Arc<T>>> {
        let guard = self.cell.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Returns the loaded model, running `load` if the slot is empty
    pub async fn get_or_try_init<F, Fut>(&self, load: F) -> CoreResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let cell = self.current();
        let model = cell
            .get_or_try_init(|| async {
                let model = load().await?;
                self.loads.fetch_add(1, Ordering::SeqCst);
                debug!("Model loaded into shared slot");
                Ok::<_, crate::core::CoreError>(Arc::new(model))
            })
            .await?;
        Ok(Arc::clone(model))
    }

    /// Returns the loaded model without loading
    pub fn get(&self) -> Option<Arc<T>> {
        self.current().get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.current().initialized()
    }

    /// Number of successful loads over the slot's lifetime
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Drops the held model; the next call loads again
    pub fn teardown(&self) {
        let mut guard = self.cell.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Arc::new(OnceCell::new());
        debug!("Model slot torn down");
    }
}
