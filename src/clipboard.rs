//! Clipboard access using arboard.
//!
//! The gesture monitor and the daemon only talk to the clipboard through
//! [`ClipboardAccess`], so tests and headless runs can swap in
//! [`MemoryClipboard`].

use arboard::Clipboard;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum ClipboardError {
    #[error("Failed to access clipboard: {0}")]
    AccessFailed(String),

    #[error("Failed to set clipboard content: {0}")]
    SetFailed(String),

    #[error("Failed to get clipboard content: {0}")]
    GetFailed(String),
}

/// Read and write plain text on a clipboard.
#[async_trait]
pub trait ClipboardAccess: Send + Sync {
    /// Current clipboard text. Non-text content reads as an empty string.
    async fn read_text(&self) -> Result<String, ClipboardError>;

    /// Replace the clipboard content with `text`.
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// The OS clipboard.
///
/// Holds a single arboard handle for the life of the process; on X11 the
/// owning handle has to stay alive for written content to remain pasteable.
/// arboard calls may block, so they run on tokio's blocking pool.
#[derive(Clone)]
pub struct SystemClipboard {
    inner: Arc<Mutex<Clipboard>>,
    read_in_flight: Arc<AtomicBool>,
}

/// Marks a blocking read as running; cleared on drop.
///
/// A read abandoned by its caller's timeout keeps its blocking thread until
/// arboard returns, so at most one is allowed at a time.
struct ReadSlot(Arc<AtomicBool>);

impl ReadSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for ReadSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SystemClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard =
            Clipboard::new().map_err(|e| ClipboardError::AccessFailed(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(clipboard)),
            read_in_flight: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl ClipboardAccess for SystemClipboard {
    async fn read_text(&self) -> Result<String, ClipboardError> {
        let slot = ReadSlot::acquire(&self.read_in_flight).ok_or_else(|| {
            ClipboardError::AccessFailed("previous clipboard read still pending".into())
        })?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            let mut clipboard = inner
                .lock()
                .map_err(|_| ClipboardError::AccessFailed("clipboard lock poisoned".into()))?;
            match clipboard.get_text() {
                Ok(text) => Ok(text),
                // Empty clipboard or an image: nothing to compare against
                Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
                Err(e) => Err(ClipboardError::GetFailed(e.to_string())),
            }
        })
        .await
        .map_err(|e| ClipboardError::AccessFailed(e.to_string()))?
    }

    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let inner = Arc::clone(&self.inner);
        let owned = text.to_string();
        let len = owned.len();
        tokio::task::spawn_blocking(move || {
            let mut clipboard = inner
                .lock()
                .map_err(|_| ClipboardError::AccessFailed("clipboard lock poisoned".into()))?;
            clipboard
                .set_text(owned)
                .map_err(|e| ClipboardError::SetFailed(e.to_string()))
        })
        .await
        .map_err(|e| ClipboardError::AccessFailed(e.to_string()))??;

        debug!("Copied {} bytes to clipboard", len);
        Ok(())
    }
}

/// In-process clipboard.
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    text: Arc<Mutex<String>>,
    fail_reads: Arc<AtomicBool>,
}

impl MemoryClipboard {
    pub fn new(initial: &str) -> Self {
        Self {
            text: Arc::new(Mutex::new(initial.to_string())),
            fail_reads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate a user copy.
    pub fn set(&self, text: &str) {
        if let Ok(mut current) = self.text.lock() {
            *current = text.to_string();
        }
    }

    pub fn get(&self) -> String {
        self.text.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Make subsequent reads fail until switched back off.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClipboardAccess for MemoryClipboard {
    async fn read_text(&self) -> Result<String, ClipboardError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ClipboardError::GetFailed("simulated failure".into()));
        }
        self.text
            .lock()
            .map(|t| t.clone())
            .map_err(|_| ClipboardError::GetFailed("clipboard lock poisoned".into()))
    }

    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut current = self
            .text
            .lock()
            .map_err(|_| ClipboardError::SetFailed("clipboard lock poisoned".into()))?;
        *current = text.to_string();
        Ok(())
    }
}
