//! Memory access kernels and the table that selects them.
//!
//! Every real kernel has a dummy twin that walks the same indices with the same
//! loop structure but never dereferences the region. Subtracting the dummy's
//! ticks from the real kernel's leaves the time spent on memory traffic.

use std::hint::black_box;
use std::{ptr, slice};
use std::sync::OnceLock;

use crate::benchmark::types::{ChunkSize, PatternMode, RwMode};
use crate::error::BenchmarkError;
use crate::timer::ticks;

/// Strides (in chunks) with a sequential kernel.
pub const SUPPORTED_STRIDES: [i64; 10] = [1, -1, 2, -2, 4, -4, 8, -8, 16, -16];

/// A plain-old-data access unit. Every bit pattern must be a valid value.
pub trait Chunk: Copy + Send + Sync + 'static {
    const SIZE: ChunkSize;

    /// Value stored by write kernels.
    fn fill() -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct Chunk128(pub [u64; 2]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(32))]
pub struct Chunk256(pub [u64; 4]);

impl Chunk for u32 {
    const SIZE: ChunkSize = ChunkSize::Bits32;
    fn fill() -> Self {
        0xa5a5_a5a5
    }
}

impl Chunk for u64 {
    const SIZE: ChunkSize = ChunkSize::Bits64;
    fn fill() -> Self {
        0xa5a5_a5a5_a5a5_a5a5
    }
}

impl Chunk for Chunk128 {
    const SIZE: ChunkSize = ChunkSize::Bits128;
    fn fill() -> Self {
        Chunk128([u64::fill(); 2])
    }
}

impl Chunk for Chunk256 {
    const SIZE: ChunkSize = ChunkSize::Bits256;
    fn fill() -> Self {
        Chunk256([u64::fill(); 4])
    }
}

/// View `mem` as whole chunks. Trailing bytes short of a chunk are ignored;
/// a misaligned `mem` yields no chunks at all.
#[inline(always)]
fn as_chunks<C: Chunk>(mem: &mut [u8]) -> &mut [C] {
    let ptr = mem.as_mut_ptr();
    if ptr.align_offset(align_of::<C>()) != 0 {
        return &mut [];
    }
    let n = mem.len() / size_of::<C>();
    // SAFETY: `ptr` is aligned for `C`, `n` chunks fit inside `mem`, and
    // `Chunk` types are integers or arrays of integers, so any initialized
    // bytes form a valid value.
    unsafe { slice::from_raw_parts_mut(ptr.cast::<C>(), n) }
}

/// Number of whole chunks in `mem`.
pub fn chunk_count(mem: &mut [u8], chunk_size: ChunkSize) -> usize {
    match chunk_size {
        ChunkSize::Bits32 => as_chunks::<u32>(mem).len(),
        ChunkSize::Bits64 => as_chunks::<u64>(mem).len(),
        ChunkSize::Bits128 => as_chunks::<Chunk128>(mem).len(),
        ChunkSize::Bits256 => as_chunks::<Chunk256>(mem).len(),
    }
}

#[inline(always)]
fn strided_index<const STRIDE: isize>(n: usize, k: usize) -> usize {
    let offset = k * STRIDE.unsigned_abs();
    if STRIDE > 0 { offset } else { n - 1 - offset }
}

#[inline(always)]
fn strided_count<const STRIDE: isize>(n: usize) -> usize {
    n.div_ceil(STRIDE.unsigned_abs())
}

fn seq_read<C: Chunk, const STRIDE: isize>(mem: &mut [u8]) -> u64 {
    let chunks = as_chunks::<C>(mem);
    let n = chunks.len();
    let base = chunks.as_ptr();
    let count = strided_count::<STRIDE>(n);
    for k in 0..count {
        // SAFETY: strided_index stays below n for k < count.
        unsafe { ptr::read_volatile(base.add(strided_index::<STRIDE>(n, k))) };
    }
    (count * C::SIZE.bytes()) as u64
}

fn seq_write<C: Chunk, const STRIDE: isize>(mem: &mut [u8]) -> u64 {
    let chunks = as_chunks::<C>(mem);
    let n = chunks.len();
    let base = chunks.as_mut_ptr();
    let count = strided_count::<STRIDE>(n);
    let value = C::fill();
    for k in 0..count {
        // SAFETY: strided_index stays below n for k < count.
        unsafe { ptr::write_volatile(base.add(strided_index::<STRIDE>(n, k)), value) };
    }
    (count * C::SIZE.bytes()) as u64
}

fn seq_dummy<C: Chunk, const STRIDE: isize>(mem: &mut [u8]) -> u64 {
    let n = as_chunks::<C>(mem).len();
    let count = strided_count::<STRIDE>(n);
    for k in 0..count {
        black_box(strided_index::<STRIDE>(n, k));
    }
    (count * C::SIZE.bytes()) as u64
}

fn rand_read<C: Chunk>(mem: &mut [u8], order: &[usize]) -> u64 {
    let chunks = as_chunks::<C>(mem);
    for &i in order {
        // SAFETY: the reference comes from a bounds-checked index.
        unsafe { ptr::read_volatile(&chunks[i]) };
    }
    (order.len() * C::SIZE.bytes()) as u64
}

fn rand_write<C: Chunk>(mem: &mut [u8], order: &[usize]) -> u64 {
    let chunks = as_chunks::<C>(mem);
    let value = C::fill();
    for &i in order {
        // SAFETY: as above.
        unsafe { ptr::write_volatile(&mut chunks[i], value) };
    }
    (order.len() * C::SIZE.bytes()) as u64
}

fn rand_dummy<C: Chunk>(mem: &mut [u8], order: &[usize]) -> u64 {
    let n = as_chunks::<C>(mem).len();
    for &i in order {
        black_box(i < n);
    }
    (order.len() * C::SIZE.bytes()) as u64
}

/// One pass over a partition; returns the number of bytes touched.
pub type SequentialFn = fn(&mut [u8]) -> u64;
/// One pass over a partition following a precomputed chunk order.
pub type RandomFn = fn(&mut [u8], &[usize]) -> u64;

#[derive(Debug, Clone, Copy)]
pub enum Routine {
    Sequential(SequentialFn),
    Random(RandomFn),
}

/// When a timed kernel loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    Ticks(u64),
    Passes(u64),
}

/// Outcome of [`Kernel::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelRun {
    pub passes: u64,
    pub ticks: u64,
    pub bytes_per_pass: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    name: &'static str,
    routine: Routine,
}

impl Kernel {
    pub fn new(name: &'static str, routine: Routine) -> Self {
        Self { name, routine }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn needs_order(&self) -> bool {
        matches!(self.routine, Routine::Random(_))
    }

    #[inline(always)]
    pub fn pass(&self, mem: &mut [u8], order: &[usize]) -> u64 {
        match self.routine {
            Routine::Sequential(f) => f(mem),
            Routine::Random(f) => f(mem, order),
        }
    }

    /// Issue passes until `until` is satisfied, timing the whole loop.
    /// The tick counter is read after every pass so the real and dummy loops
    /// carry the same overhead.
    pub fn run(&self, mem: &mut [u8], order: &[usize], until: Until) -> KernelRun {
        let mut passes = 0u64;
        let mut bytes_per_pass = 0u64;
        let start = ticks();
        let mut now = start;
        loop {
            match until {
                Until::Passes(n) if passes >= n => break,
                Until::Ticks(t) if passes > 0 && now.wrapping_sub(start) >= t => break,
                _ => {}
            }
            bytes_per_pass = self.pass(mem, order);
            passes += 1;
            now = ticks();
        }
        KernelRun {
            passes,
            ticks: now.wrapping_sub(start),
            bytes_per_pass,
        }
    }
}

/// A real kernel and its overhead-only twin.
#[derive(Debug, Clone, Copy)]
pub struct KernelPair {
    pub kernel: Kernel,
    pub dummy: Kernel,
    pub chunk_size: ChunkSize,
}

impl KernelPair {
    pub fn needs_order(&self) -> bool {
        self.kernel.needs_order()
    }
}

/// Chooses the kernel pair for a pattern, direction, chunk width and stride.
pub trait KernelSelector: Send + Sync {
    fn select(
        &self,
        pattern: PatternMode,
        rw_mode: RwMode,
        chunk_size: ChunkSize,
        stride: i64,
    ) -> Result<KernelPair, BenchmarkError>;
}

struct SequentialEntry {
    chunk_size: ChunkSize,
    stride: i64,
    read: SequentialFn,
    write: SequentialFn,
    dummy: SequentialFn,
}

struct RandomEntry {
    chunk_size: ChunkSize,
    read: RandomFn,
    write: RandomFn,
    dummy: RandomFn,
}

struct KernelTable {
    sequential: Vec<SequentialEntry>,
    random: Vec<RandomEntry>,
}

fn push_chunk<C: Chunk>(table: &mut KernelTable) {
    macro_rules! strides {
        ($($s:literal),*) => {
            $(
                table.sequential.push(SequentialEntry {
                    chunk_size: C::SIZE,
                    stride: $s,
                    read: seq_read::<C, { $s }>,
                    write: seq_write::<C, { $s }>,
                    dummy: seq_dummy::<C, { $s }>,
                });
            )*
        };
    }
    strides!(1, -1, 2, -2, 4, -4, 8, -8, 16, -16);

    table.random.push(RandomEntry {
        chunk_size: C::SIZE,
        read: rand_read::<C>,
        write: rand_write::<C>,
        dummy: rand_dummy::<C>,
    });
}

fn kernel_table() -> &'static KernelTable {
    static TABLE: OnceLock<KernelTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = KernelTable {
            sequential: Vec::new(),
            random: Vec::new(),
        };
        push_chunk::<u32>(&mut table);
        push_chunk::<u64>(&mut table);
        push_chunk::<Chunk128>(&mut table);
        push_chunk::<Chunk256>(&mut table);
        table
    })
}

/// Kernels compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinKernels;

impl KernelSelector for BuiltinKernels {
    fn select(
        &self,
        pattern: PatternMode,
        rw_mode: RwMode,
        chunk_size: ChunkSize,
        stride: i64,
    ) -> Result<KernelPair, BenchmarkError> {
        let unsupported = || BenchmarkError::UnsupportedKernel {
            pattern,
            rw_mode,
            chunk_size,
            stride,
        };
        let table = kernel_table();

        let (kernel, dummy) = match pattern {
            PatternMode::Sequential => {
                let entry = table
                    .sequential
                    .iter()
                    .find(|e| e.chunk_size == chunk_size && e.stride == stride)
                    .ok_or_else(unsupported)?;
                let real = match rw_mode {
                    RwMode::Read => entry.read,
                    RwMode::Write => entry.write,
                };
                (
                    Kernel::new(kernel_name(pattern, rw_mode), Routine::Sequential(real)),
                    Kernel::new("sequential-dummy", Routine::Sequential(entry.dummy)),
                )
            }
            PatternMode::Random => {
                if stride.abs() != 1 {
                    return Err(unsupported());
                }
                let entry = table
                    .random
                    .iter()
                    .find(|e| e.chunk_size == chunk_size)
                    .ok_or_else(unsupported)?;
                let real = match rw_mode {
                    RwMode::Read => entry.read,
                    RwMode::Write => entry.write,
                };
                (
                    Kernel::new(kernel_name(pattern, rw_mode), Routine::Random(real)),
                    Kernel::new("random-dummy", Routine::Random(entry.dummy)),
                )
            }
        };

        Ok(KernelPair {
            kernel,
            dummy,
            chunk_size,
        })
    }
}

fn kernel_name(pattern: PatternMode, rw_mode: RwMode) -> &'static str {
    match (pattern, rw_mode) {
        (PatternMode::Sequential, RwMode::Read) => "sequential-read",
        (PatternMode::Sequential, RwMode::Write) => "sequential-write",
        (PatternMode::Random, RwMode::Read) => "random-read",
        (PatternMode::Random, RwMode::Write) => "random-write",
    }
}
