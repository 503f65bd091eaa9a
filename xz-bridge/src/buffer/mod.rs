//! Output buffer allocation and live-memory accounting.

mod allocator;
mod report;
mod storage;
mod tracked;


pub use allocator::{Allocator, SystemAllocator};
pub use report::{MemoryReporter, NoopReporter, TracingReporter};
pub use storage::{BlockStorage, Release};
pub use tracked::{Chunk, OutputBuffer, TrackedAllocator};
