use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::affinity::pin_current_thread;
use crate::benchmark::types::{Diagnostics, WarningKind};
use crate::kernels::{KernelPair, Until, chunk_count};

/// Results a worker publishes while it runs.
///
/// Written only by the worker's own thread and read by the orchestrator after
/// the join, so relaxed ordering is enough; the join provides the
/// happens-before edge.
#[derive(Debug, Default)]
pub struct WorkerStats {
    passes: AtomicU64,
    adjusted_ticks: AtomicU64,
    dummy_ticks: AtomicU64,
    bytes_per_pass: AtomicU64,
    warnings: Mutex<Diagnostics>,
}

impl WorkerStats {
    pub fn warn(&self, kind: WarningKind) {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn adjusted_ticks(&self) -> u64 {
        self.adjusted_ticks.load(Ordering::Relaxed)
    }

    pub fn dummy_ticks(&self) -> u64 {
        self.dummy_ticks.load(Ordering::Relaxed)
    }

    pub fn bytes_per_pass(&self) -> u64 {
        self.bytes_per_pass.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            passes: self.passes(),
            adjusted_ticks: self.adjusted_ticks(),
            dummy_ticks: self.dummy_ticks(),
            bytes_per_pass: self.bytes_per_pass(),
            warnings: self
                .warnings
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Plain snapshot of [`WorkerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub passes: u64,
    pub adjusted_ticks: u64,
    pub dummy_ticks: u64,
    pub bytes_per_pass: u64,
    pub warnings: Diagnostics,
}

/// One thread's share of an iteration: a partition, a kernel pair and a CPU.
pub struct Worker<'a> {
    id: usize,
    mem: &'a mut [u8],
    kernels: KernelPair,
    cpu_id: Option<usize>,
    until: Until,
    seed: u64,
    stats: &'a WorkerStats,
}

impl<'a> Worker<'a> {
    pub fn new(
        id: usize,
        mem: &'a mut [u8],
        kernels: KernelPair,
        cpu_id: Option<usize>,
        until: Until,
        seed: u64,
        stats: &'a WorkerStats,
    ) -> Self {
        Self {
            id,
            mem,
            kernels,
            cpu_id,
            until,
            seed,
            stats,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run the real kernel for the configured budget, then the dummy kernel
    /// for the same number of passes. Consumes the worker: it runs once.
    pub fn run(self) {
        let Worker {
            id,
            mem,
            kernels,
            cpu_id,
            until,
            seed,
            stats,
        } = self;

        if let Some(cpu) = cpu_id {
            if let Err(e) = pin_current_thread(cpu) {
                warn!(worker = id, cpu, error = %e, "failed to pin worker thread");
                stats.warn(WarningKind::AffinityFailed);
            }
        }

        let order = if kernels.needs_order() {
            visiting_order(chunk_count(mem, kernels.chunk_size), seed)
        } else {
            Vec::new()
        };

        // Prime caches and TLB before timing.
        kernels.kernel.pass(mem, &order);

        let real = kernels.kernel.run(mem, &order, until);
        stats.passes.store(real.passes, Ordering::Relaxed);
        stats
            .bytes_per_pass
            .store(real.bytes_per_pass, Ordering::Relaxed);
        stats.adjusted_ticks.store(real.ticks, Ordering::Relaxed);

        let dummy = kernels.dummy.run(mem, &order, Until::Passes(real.passes));
        stats.dummy_ticks.store(dummy.ticks, Ordering::Relaxed);
        stats
            .adjusted_ticks
            .store(real.ticks.saturating_sub(dummy.ticks), Ordering::Relaxed);

        if real.passes == 0 || real.bytes_per_pass == 0 {
            stats.warn(WarningKind::NoPasses);
        }
        if dummy.ticks >= real.ticks {
            warn!(
                worker = id,
                real_ticks = real.ticks,
                dummy_ticks = dummy.ticks,
                "dummy kernel was not cheaper than the benchmark kernel"
            );
            stats.warn(WarningKind::CalibrationOverhead);
        }

        debug!(
            worker = id,
            kernel = kernels.kernel.name(),
            passes = real.passes,
            real_ticks = real.ticks,
            dummy_ticks = dummy.ticks,
            "worker finished"
        );
    }
}

/// Shuffled chunk indices `0..n`, deterministic for a given seed.
pub fn visiting_order(n: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    order
}
