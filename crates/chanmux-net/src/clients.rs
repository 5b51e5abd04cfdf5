use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chanmux_router::ConnectionHandle;

/// Shared registry of the handles for currently connected clients, keyed by
/// connection id.
pub struct ConnectedClients<M> {
    inner: Arc<Mutex<HashMap<String, ConnectionHandle<M>>>>,
}

impl<M> ConnectedClients<M> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, ConnectionHandle<M>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, handle: ConnectionHandle<M>) {
        self.table().insert(handle.id().to_string(), handle);
    }

    pub(crate) fn remove(&self, id: &str) -> Option<ConnectionHandle<M>> {
        self.table().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ConnectionHandle<M>> {
        self.table().get(id).cloned()
    }

    /// Snapshot of every connected client's handle.
    pub fn handles(&self) -> Vec<ConnectionHandle<M>> {
        self.table().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

impl<M: Send + 'static> ConnectedClients<M> {
    /// Send one object to every connected client. Returns how many clients
    /// were written to.
    pub fn broadcast_object(&self, channel: u8, message: &M) -> usize {
        let handles = self.handles();
        for handle in &handles {
            handle.write_object(channel, message, true);
        }
        handles.len()
    }
}

impl<M> Clone for ConnectedClients<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> Default for ConnectedClients<M> {
    fn default() -> Self {
        Self::new()
    }
}
