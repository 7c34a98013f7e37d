//! Scoped secure memory with watchdog-enforced zeroing.
//!
//! Every decrypted seed phrase and every derived key lives inside a
//! [`ScopedBuffer`] acquired from a [`SecureMemory`] manager. A buffer's
//! contents are overwritten with zeros on every exit path: explicit
//! [`ScopedBuffer::release`], drop, or expiry of the per-buffer watchdog
//! timer. The watchdog and an explicit release racing to wipe the same
//! buffer resolve through a single armed flag, so wiping is idempotent and
//! mutually exclusive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;
use zeroize::Zeroize;

use seedlock_common::{Error, Result};

/// Default watchdog timeout for acquired buffers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared cell backing a scoped buffer.
///
/// The watchdog task holds a second reference, so the bytes live behind a
/// mutex and the armed flag decides which party performs the wipe.
struct Cell {
    bytes: Mutex<Box<[u8]>>,
    armed: AtomicBool,
}

impl Cell {
    /// Wipe the contents exactly once. Returns true if this call disarmed
    /// the buffer.
    fn wipe(&self) -> bool {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return false;
        }
        let mut bytes = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        bytes.zeroize();
        true
    }
}

/// Manager handing out scoped buffers with a configured watchdog timeout.
#[derive(Clone)]
pub struct SecureMemory {
    timeout: Duration,
}

impl SecureMemory {
    /// Create a manager with the given watchdog timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Acquire a zero-initialized buffer of `len` bytes.
    ///
    /// Must be called within a Tokio runtime; the watchdog runs as a
    /// spawned task and is aborted when the buffer is released.
    ///
    /// # Errors
    /// - Returns error if `len` is zero
    pub fn acquire(&self, len: usize) -> Result<ScopedBuffer> {
        if len == 0 {
            return Err(Error::InvalidInput(
                "Cannot acquire an empty secure buffer".to_string(),
            ));
        }

        let cell = Arc::new(Cell {
            bytes: Mutex::new(vec![0u8; len].into_boxed_slice()),
            armed: AtomicBool::new(true),
        });

        let watchdog_cell = Arc::clone(&cell);
        let timeout = self.timeout;
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if watchdog_cell.wipe() {
                debug!(timeout_secs = timeout.as_secs(), "secure buffer wiped by watchdog");
            }
        });

        Ok(ScopedBuffer {
            cell,
            watchdog: Some(watchdog),
        })
    }

    /// Acquire a buffer holding a copy of `src`.
    pub fn acquire_from(&self, src: &[u8]) -> Result<ScopedBuffer> {
        let buf = self.acquire(src.len())?;
        buf.fill(src)?;
        Ok(buf)
    }
}

impl Default for SecureMemory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Exclusively owned buffer whose contents are wiped on every exit path.
///
/// Not `Clone`: any copy of the contents requires acquiring a new buffer
/// and an explicit transfer.
pub struct ScopedBuffer {
    cell: Arc<Cell>,
    watchdog: Option<JoinHandle<()>>,
}

impl ScopedBuffer {
    /// Number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.cell.bytes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the buffer holds zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer is still live (not yet wiped).
    pub fn is_live(&self) -> bool {
        self.cell.armed.load(Ordering::SeqCst)
    }

    /// Copy `src` into the buffer. Lengths must match.
    ///
    /// # Errors
    /// - Returns error if the buffer has already been wiped
    /// - Returns error on length mismatch
    pub fn fill(&self, src: &[u8]) -> Result<()> {
        self.with_bytes_mut(|bytes| {
            if bytes.len() != src.len() {
                return Err(Error::InvalidInput(format!(
                    "Buffer length mismatch: expected {}, got {}",
                    bytes.len(),
                    src.len()
                )));
            }
            bytes.copy_from_slice(src);
            Ok(())
        })?
    }

    /// Run `f` over the buffer contents without copying them out.
    ///
    /// # Errors
    /// - Returns error if the buffer has already been wiped
    pub fn expose<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        if !self.is_live() {
            return Err(Error::InvalidInput(
                "Secure buffer has been released".to_string(),
            ));
        }
        let bytes = self.cell.bytes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&bytes))
    }

    /// Run `f` over the mutable buffer contents.
    ///
    /// # Errors
    /// - Returns error if the buffer has already been wiped
    pub fn expose_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.with_bytes_mut(f)
    }

    /// Wipe the buffer now and cancel its watchdog.
    ///
    /// Idempotent with respect to a concurrently firing watchdog: whichever
    /// party disarms the flag performs the single wipe.
    pub fn release(mut self) {
        self.wipe_and_cancel();
    }

    /// Handle for inspecting the underlying storage after release.
    ///
    /// Used by memory-hygiene audits and tests to verify that wiped
    /// buffers really contain only zeros.
    pub fn inspector(&self) -> BufferInspector {
        BufferInspector {
            cell: Arc::clone(&self.cell),
        }
    }

    fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        if !self.is_live() {
            return Err(Error::InvalidInput(
                "Secure buffer has been released".to_string(),
            ));
        }
        let mut bytes = self.cell.bytes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut bytes))
    }

    fn wipe_and_cancel(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.cell.wipe();
    }
}

impl Drop for ScopedBuffer {
    fn drop(&mut self) {
        self.wipe_and_cancel();
    }
}

impl std::fmt::Debug for ScopedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScopedBuffer(len={}, [REDACTED])", self.len())
    }
}

/// Read-only view of a buffer's underlying storage.
pub struct BufferInspector {
    cell: Arc<Cell>,
}

impl BufferInspector {
    /// Whether the underlying storage currently contains only zeros.
    pub fn is_zeroed(&self) -> bool {
        let bytes = self.cell.bytes.lock().unwrap_or_else(|e| e.into_inner());
        bytes.iter().all(|&b| b == 0)
    }

    /// Whether the buffer is still armed (not yet wiped).
    pub fn is_live(&self) -> bool {
        self.cell.armed.load(Ordering::SeqCst)
    }
}
