use std::alloc::{Layout, alloc, dealloc};
use std::ptr::{self, NonNull};
use std::thread;

use tracing::{debug, warn};

use crate::affinity::pin_current_thread;
use crate::error::BenchmarkError;

/// Alignment of the benchmark region.
pub const REGION_ALIGN: usize = 4096;

/// Page-aligned, zero-initialized heap region.
pub struct MemoryRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region owns its allocation exclusively, like a `Box<[u8]>`.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    /// Allocate `len` bytes and zero them from the calling thread.
    pub fn allocate(len: usize) -> Result<Self, BenchmarkError> {
        Self::allocate_on_cpu(len, None)
    }

    /// Allocate `len` bytes and zero them from a thread pinned to `cpu`, so
    /// that first-touch placement puts the pages on that CPU's NUMA node.
    pub fn allocate_on_cpu(len: usize, cpu: Option<usize>) -> Result<Self, BenchmarkError> {
        if len == 0 {
            return Err(BenchmarkError::InvalidConfig(
                "memory region must not be empty".to_string(),
            ));
        }
        let layout = Layout::from_size_align(len, REGION_ALIGN)
            .map_err(|_| BenchmarkError::Allocation(len))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(BenchmarkError::Allocation(len))?;

        let addr = ptr.as_ptr() as usize;
        let touched = thread::scope(|s| {
            s.spawn(move || {
                if let Some(cpu) = cpu {
                    if let Err(e) = pin_current_thread(cpu) {
                        warn!(cpu, error = %e, "first-touch thread could not be pinned");
                    }
                }
                // SAFETY: addr..addr+len is the allocation made above.
                unsafe { ptr::write_bytes(addr as *mut u8, 0, len) };
            })
            .join()
        });

        let region = Self { ptr, layout };
        if touched.is_err() {
            return Err(BenchmarkError::Allocation(len));
        }
        debug!(len, ?cpu, "allocated benchmark region");
        Ok(region)
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation is initialized and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate_on_cpu` with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Byte range handed to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPartition {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

/// Bytes each of `n` workers gets from a `len`-byte region when partitions
/// must be whole multiples of `granule` bytes.
pub fn per_thread_len(len: usize, n: usize, granule: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let granule = granule.max(1);
    len / n / granule * granule
}

/// Tile the start of a region into `n` equal partitions of
/// [`per_thread_len`] bytes. Partition offsets are multiples of `granule`.
pub fn partition_layout(len: usize, n: usize, granule: usize) -> Vec<WorkerPartition> {
    let len_per_thread = per_thread_len(len, n, granule);
    (0..n)
        .map(|index| WorkerPartition {
            index,
            offset: index * len_per_thread,
            len: len_per_thread,
        })
        .collect()
}

/// Split `mem[..len]` into the slices described by [`partition_layout`].
pub fn split_region(mem: &mut [u8], len: usize, n: usize, granule: usize) -> Vec<&mut [u8]> {
    let len_per_thread = per_thread_len(len.min(mem.len()), n, granule);
    if len_per_thread == 0 {
        return Vec::new();
    }
    mem[..len_per_thread * n]
        .chunks_exact_mut(len_per_thread)
        .collect()
}
