//! Output buffers whose memory is accounted for until the consumer drops them.

use std::collections::HashMap;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use crate::error::{Error, Result};

use super::allocator::{Allocator, SystemAllocator};
use super::report::MemoryReporter;
use super::storage::{BlockStorage, Release};

/// Accounting record for one live buffer.
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Bytes actually reserved from the backing allocator.
    capacity: usize,
    /// Logical size requested by the caller.
    size: usize,
    /// Unused tail of the logical size.
    available: usize,
}

/// Live-accounting table shared by an allocator and every buffer it handed out.
#[derive(Debug, Default)]
struct Ledger {
    entries: Mutex<HashMap<usize, Entry>>,
    live_bytes: AtomicUsize,
}

impl Ledger {
    fn entries(&self) -> MutexGuard<'_, HashMap<usize, Entry>> {
        // Entries stay consistent even if a holder panicked mid-update: every
        // mutation is a single insert/remove/field store.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, addr: usize, capacity: usize, size: usize) {
        self.entries().insert(
            addr,
            Entry {
                capacity,
                size,
                available: size,
            },
        );
        self.live_bytes.fetch_add(capacity, Ordering::AcqRel);
    }

    fn set_available(&self, addr: usize, available: usize) {
        if let Some(entry) = self.entries().get_mut(&addr) {
            entry.available = available;
        }
    }

    fn release(&self, addr: usize) {
        if let Some(entry) = self.entries().remove(&addr) {
            self.live_bytes.fetch_sub(entry.capacity, Ordering::AcqRel);
        }
    }

    fn available_bytes(&self) -> usize {
        self.entries().values().map(|entry| entry.available).sum()
    }

    fn logical_bytes(&self) -> usize {
        self.entries().values().map(|entry| entry.size).sum()
    }
}

/// Drops the ledger entry before handing the region back to the backing allocator.
struct Untrack {
    ledger: Arc<Ledger>,
    inner: Arc<dyn Release>,
}

impl Release for Untrack {
    fn release(&self, region: NonNull<u8>, len: usize) {
        self.ledger.release(region.as_ptr() as usize);
        self.inner.release(region, len);
    }
}

/// One block of engine output.
///
/// The visible bytes are the first `capacity() - available()` bytes of the
/// storage. Buffers delivered to callers always have `available() == 0`.
pub struct OutputBuffer {
    storage: BlockStorage,
    size: usize,
    available: usize,
}

/// A finalized output buffer handed to the caller.
pub type Chunk = OutputBuffer;

impl OutputBuffer {
    /// Logical size the buffer was allocated with.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Bytes of the logical size that hold no meaningful data.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Number of meaningful bytes.
    pub fn len(&self) -> usize {
        self.size - self.available
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The meaningful bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.bytes()[..self.len()]
    }

    /// Full logical region, for filling before [`TrackedAllocator::finalize`].
    pub fn as_writable(&mut self) -> &mut [u8] {
        let size = self.size;
        &mut self.storage.bytes_mut()[..size]
    }

    /// Copies the meaningful bytes into a `Vec` and releases the buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Deref for OutputBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for OutputBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("capacity", &self.size)
            .field("available", &self.available)
            .finish()
    }
}

/// Allocator that keeps a live table of every output buffer it produced.
///
/// Clones share the same table, so a session and the buffers it delivered
/// agree on how much native memory is still held.
#[derive(Clone)]
pub struct TrackedAllocator {
    backing: Arc<dyn Allocator>,
    ledger: Arc<Ledger>,
}

impl Default for TrackedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedAllocator {
    /// Creates a tracked allocator backed by [`SystemAllocator`].
    pub fn new() -> Self {
        Self::with_backing(Arc::new(SystemAllocator))
    }

    /// Creates a tracked allocator on top of a custom backing allocator.
    pub fn with_backing(backing: Arc<dyn Allocator>) -> Self {
        Self {
            backing,
            ledger: Arc::new(Ledger::default()),
        }
    }

    /// Allocates a buffer of logical size `size` with `available == size`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the backing allocator cannot satisfy
    /// the request, or returns storage smaller than `size`.
    pub fn allocate(&self, size: usize) -> Result<OutputBuffer> {
        let mut storage = self.backing.allocate(size).inspect_err(|err| {
            warn!(size, error = %err, "output buffer allocation failed");
        })?;

        if storage.len() < size {
            warn!(
                size,
                capacity = storage.len(),
                "backing allocator returned undersized storage"
            );
            return Err(Error::OutOfMemory { capacity: size });
        }

        if storage.is_empty() {
            return Ok(OutputBuffer {
                storage,
                size: 0,
                available: 0,
            });
        }

        let capacity = storage.len();
        self.ledger.register(storage.addr(), capacity, size);
        let ledger = Arc::clone(&self.ledger);
        storage.wrap_release(|inner| -> Arc<dyn Release> {
            Arc::new(Untrack { ledger, inner })
        });

        trace!(size, capacity, "allocated output buffer");
        Ok(OutputBuffer {
            storage,
            size,
            available: size,
        })
    }

    /// Declares how many leading bytes of `buffer` are meaningful.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLength`] if `used` exceeds the buffer's capacity.
    pub fn finalize(&self, buffer: &mut OutputBuffer, used: usize) -> Result<()> {
        let capacity = buffer.capacity();
        if used > capacity {
            return Err(Error::InvalidLength { used, capacity });
        }

        buffer.available = capacity - used;
        self.ledger
            .set_available(buffer.storage.addr(), buffer.available);
        Ok(())
    }

    /// Releases a buffer, removing it from the live table.
    pub fn release(&self, buffer: OutputBuffer) {
        drop(buffer);
    }

    /// Total bytes currently reserved by live buffers.
    pub fn live_bytes(&self) -> usize {
        self.ledger.live_bytes.load(Ordering::Acquire)
    }

    /// Number of buffers that have not been released yet.
    pub fn live_buffers(&self) -> usize {
        self.ledger.entries().len()
    }

    /// Sum of the logical sizes of live buffers.
    pub fn logical_bytes(&self) -> usize {
        self.ledger.logical_bytes()
    }

    /// Sum of the unused tails of live buffers.
    pub fn available_bytes(&self) -> usize {
        self.ledger.available_bytes()
    }

    /// Pushes the current live-byte total to `reporter`.
    pub fn report_usage(&self, reporter: &dyn MemoryReporter) {
        let live_bytes = self.live_bytes();
        trace!(live_bytes, "reporting native memory usage");
        reporter.report(live_bytes);
    }
}

impl std::fmt::Debug for TrackedAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedAllocator")
            .field("live_bytes", &self.live_bytes())
            .field("live_buffers", &self.live_buffers())
            .finish_non_exhaustive()
    }
}
