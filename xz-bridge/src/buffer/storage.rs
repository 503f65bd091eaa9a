//! Owned byte regions that run a release hook when dropped.

use std::ptr::NonNull;
use std::sync::Arc;

/// Hands a region back to whatever produced it.
///
/// Implementations receive each region exactly once, with the length it was
/// created with, and must not touch it afterwards.
pub trait Release: Send + Sync {
    fn release(&self, region: NonNull<u8>, len: usize);
}

impl<F> Release for F
where
    F: Fn(NonNull<u8>, usize) + Send + Sync,
{
    fn release(&self, region: NonNull<u8>, len: usize) {
        self(region, len);
    }
}

fn release_nothing(_region: NonNull<u8>, _len: usize) {}

/// Storage behind one output block.
///
/// The region is zero-initialized by the allocators in this crate, so every
/// byte is readable from the start. Dropping the storage calls its release
/// hook, which is how live-memory accounting notices that a chunk is gone.
pub struct BlockStorage {
    region: NonNull<u8>,
    len: usize,
    hook: Arc<dyn Release>,
}

// SAFETY: the region is owned exclusively by this value and the hook is
// `Send + Sync`.
unsafe impl Send for BlockStorage {}

// SAFETY: shared references only expose `&[u8]`.
unsafe impl Sync for BlockStorage {}

impl BlockStorage {
    /// Takes ownership of `len` initialized bytes at `region`.
    ///
    /// # Safety
    ///
    /// `region` must be valid for reads and writes of `len` initialized bytes,
    /// must not be aliased, and must be safe to pass to `hook` once.
    pub unsafe fn adopt(region: NonNull<u8>, len: usize, hook: Arc<dyn Release>) -> Self {
        Self { region, len, hook }
    }

    /// Zero-length storage that owns no memory.
    pub fn empty() -> Self {
        Self {
            region: NonNull::dangling(),
            len: 0,
            hook: Arc::new(release_nothing),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replaces the release hook with one built around the current hook.
    ///
    /// The new hook becomes responsible for forwarding the region to the old
    /// one.
    pub fn wrap_release<W>(&mut self, wrap: W)
    where
        W: FnOnce(Arc<dyn Release>) -> Arc<dyn Release>,
    {
        let inner = std::mem::replace(&mut self.hook, Arc::new(release_nothing));
        self.hook = wrap(inner);
    }

    /// Address of the first byte, stable for the storage's lifetime.
    pub(crate) fn addr(&self) -> usize {
        self.region.as_ptr() as usize
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: `adopt` guarantees `len` initialized bytes owned by `self`.
        unsafe { std::slice::from_raw_parts(self.region.as_ptr(), self.len) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and `&mut self` rules out other views.
        unsafe { std::slice::from_raw_parts_mut(self.region.as_ptr(), self.len) }
    }
}

impl Drop for BlockStorage {
    fn drop(&mut self) {
        self.hook.release(self.region, self.len);
    }
}

impl std::fmt::Debug for BlockStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStorage").field("len", &self.len).finish()
    }
}
