//! Outbound channel to the device.
//!
//! The connection manager attaches the port's write half on every successful
//! open and detaches it when the connection closes. Everything else only
//! writes; a write while detached fails with [`CrowError::NotConnected`]
//! rather than touching a dead handle.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::CrowError;

type Sink = Box<dyn Write + Send>;

/// Cloneable handle to the currently attached device writer.
#[derive(Clone, Default)]
pub struct OutputWriter {
    sink: Arc<Mutex<Option<Sink>>>,
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl OutputWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route subsequent writes to `sink`, replacing any previous one.
    pub fn attach(&self, sink: Sink) {
        *self.lock() = Some(sink);
        debug!("writer attached");
    }

    /// Drop the current sink. Later writes fail until the next attach.
    pub fn detach(&self) {
        if self.lock().take().is_some() {
            debug!("writer detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Encode `text` as UTF-8 and send it.
    pub fn write_str(&self, text: &str) -> Result<(), CrowError> {
        let mut guard = self.lock();
        let sink = guard.as_mut().ok_or(CrowError::NotConnected)?;
        debug!(tx = %text.escape_debug(), "write");
        sink.write_all(text.as_bytes())?;
        sink.flush()?;
        Ok(())
    }

    // A panic while holding the lock leaves the Option intact, so recover it.
    fn lock(&self) -> MutexGuard<'_, Option<Sink>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
