//! Allocation accounting for heap snapshots.
//!
//! Install the counting allocator in the binary being profiled:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: bundle_profiler::TrackingAllocator = bundle_profiler::TrackingAllocator::system();
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOC_OBJECTS: AtomicU64 = AtomicU64::new(0);
static ALLOC_BYTES: AtomicU64 = AtomicU64::new(0);
static FREE_OBJECTS: AtomicU64 = AtomicU64::new(0);
static FREE_BYTES: AtomicU64 = AtomicU64::new(0);

/// Wraps another allocator and counts every allocation and free.
pub struct TrackingAllocator<A = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

fn on_alloc(size: usize) {
    ALLOC_OBJECTS.fetch_add(1, Ordering::Relaxed);
    ALLOC_BYTES.fetch_add(size as u64, Ordering::Relaxed);
}

fn on_free(size: usize) {
    FREE_OBJECTS.fetch_add(1, Ordering::Relaxed);
    FREE_BYTES.fetch_add(size as u64, Ordering::Relaxed);
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) };
        on_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            on_free(layout.size());
            on_alloc(new_size);
        }
        new_ptr
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub alloc_objects: u64,
    pub alloc_bytes: u64,
    pub free_objects: u64,
    pub free_bytes: u64,
}

impl HeapStats {
    pub fn in_use_objects(&self) -> u64 {
        self.alloc_objects.saturating_sub(self.free_objects)
    }

    pub fn in_use_bytes(&self) -> u64 {
        self.alloc_bytes.saturating_sub(self.free_bytes)
    }

    /// False when no [`TrackingAllocator`] has ever counted an allocation.
    pub fn is_tracking(&self) -> bool {
        self.alloc_objects > 0
    }
}

pub fn stats() -> HeapStats {
    HeapStats {
        alloc_objects: ALLOC_OBJECTS.load(Ordering::Relaxed),
        alloc_bytes: ALLOC_BYTES.load(Ordering::Relaxed),
        free_objects: FREE_OBJECTS.load(Ordering::Relaxed),
        free_bytes: FREE_BYTES.load(Ordering::Relaxed),
    }
}

pub fn write_snapshot<W: Write>(w: &mut W) -> io::Result<()> {
    write_stats(w, &stats())
}

fn write_stats<W: Write>(w: &mut W, stats: &HeapStats) -> io::Result<()> {
    writeln!(
        w,
        "heap profile: {}: {} [{}: {}] @ heap",
        stats.in_use_objects(),
        stats.in_use_bytes(),
        stats.alloc_objects,
        stats.alloc_bytes,
    )?;
    let state = if stats.is_tracking() { "installed" } else { "absent" };
    writeln!(w, "# tracking_allocator={state}")?;
    w.flush()
}
