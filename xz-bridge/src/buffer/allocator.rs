//! Where output block storage comes from.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::storage::{BlockStorage, Release};

/// Source of raw storage for output blocks.
///
/// A failed request must come back as [`Error::OutOfMemory`]; implementations
/// never abort the process.
pub trait Allocator: Send + Sync {
    /// Returns zeroed storage of at least `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] when the request cannot be satisfied.
    fn allocate(&self, len: usize) -> Result<BlockStorage>;
}

impl<A: Allocator + ?Sized> Allocator for Arc<A> {
    fn allocate(&self, len: usize) -> Result<BlockStorage> {
        A::allocate(self, len)
    }
}

/// Heap storage from the process-wide Rust allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

struct HeapRelease(Layout);

impl Release for HeapRelease {
    fn release(&self, region: NonNull<u8>, _len: usize) {
        // SAFETY: `region` came from `alloc_zeroed` with this layout.
        unsafe { alloc::dealloc(region.as_ptr(), self.0) }
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, len: usize) -> Result<BlockStorage> {
        if len == 0 {
            return Ok(BlockStorage::empty());
        }

        let out_of_memory = || Error::OutOfMemory { capacity: len };
        let layout = Layout::array::<u8>(len).map_err(|_| out_of_memory())?;

        // SAFETY: `len` is non-zero, so the layout is too.
        let region =
            NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(out_of_memory)?;

        // SAFETY: freshly allocated, zeroed, unaliased and released with the
        // same layout.
        Ok(unsafe { BlockStorage::adopt(region, len, Arc::new(HeapRelease(layout))) })
    }
}
