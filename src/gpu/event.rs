use std::sync::{Arc, Condvar, Mutex};

use crate::foundation::error::{BlendError, BlendResult};

/// A timeline event shared between the encoding thread and device execution.
///
/// Devices signal it from their own threads; a wait blocks the device context that executes it
/// and never the thread that encoded the wait.
#[derive(Clone)]
pub struct SharedEvent {
    id: u32,
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl SharedEvent {
    /// A fresh event at value 0.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            inner: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    /// Device-assigned identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Publish `value` and wake every waiter.
    pub fn signal(&self, value: u64) -> BlendResult<()> {
        let (lock, cvar) = &*self.inner;
        let mut current = lock
            .lock()
            .map_err(|_| BlendError::execution(format!("event {} lock poisoned", self.id)))?;
        *current = value;
        cvar.notify_all();
        Ok(())
    }

    /// Block until the event holds at least `value`.
    pub fn wait_until(&self, value: u64) -> BlendResult<()> {
        let (lock, cvar) = &*self.inner;
        let current = lock
            .lock()
            .map_err(|_| BlendError::execution(format!("event {} lock poisoned", self.id)))?;
        let _reached = cvar
            .wait_while(current, |v| *v < value)
            .map_err(|_| BlendError::execution(format!("event {} lock poisoned", self.id)))?;
        Ok(())
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(v) => *v,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for SharedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEvent")
            .field("id", &self.id)
            .field("value", &self.value())
            .finish()
    }
}
