use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::error::BenchmarkError;
use crate::memory::per_thread_len;
use crate::power::PowerSummary;
use crate::worker::WorkerSummary;

/// Bytes per MB in the throughput metric (decimal, not 2^20).
pub const MB: f64 = 1_000_000.0;

/// Default time each worker spends in its timed loop per iteration.
pub const DEFAULT_ITERATION_DURATION: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum PatternMode {
    #[value(name = "seq")]
    Sequential,
    #[value(name = "rand")]
    Random,
}

impl fmt::Display for PatternMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternMode::Sequential => write!(f, "sequential"),
            PatternMode::Random => write!(f, "random"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum RwMode {
    Read,
    Write,
}

impl fmt::Display for RwMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RwMode::Read => write!(f, "read"),
            RwMode::Write => write!(f, "write"),
        }
    }
}

/// Width of a single memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ChunkSize {
    #[value(name = "32")]
    Bits32,
    #[value(name = "64")]
    Bits64,
    #[value(name = "128")]
    Bits128,
    #[value(name = "256")]
    Bits256,
}

impl ChunkSize {
    pub fn bytes(self) -> usize {
        match self {
            ChunkSize::Bits32 => 4,
            ChunkSize::Bits64 => 8,
            ChunkSize::Bits128 => 16,
            ChunkSize::Bits256 => 32,
        }
    }

    pub fn bits(self) -> usize {
        self.bytes() * 8
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// How much work a worker performs in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkBudget {
    /// Keep issuing passes until this much time has elapsed.
    Duration(Duration),
    /// Issue exactly this many passes.
    Passes(u64),
}

impl Default for WorkBudget {
    fn default() -> Self {
        WorkBudget::Duration(DEFAULT_ITERATION_DURATION)
    }
}

/// Immutable description of one throughput benchmark.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub name: String,
    /// Total bytes of the region under test.
    pub len: usize,
    pub iterations: u32,
    pub num_worker_threads: usize,
    pub mem_node: usize,
    pub cpu_node: usize,
    pub pattern_mode: PatternMode,
    pub rw_mode: RwMode,
    pub chunk_size: ChunkSize,
    /// Distance between successive accesses, in chunks. Negative walks backwards.
    pub stride: i64,
    pub budget: WorkBudget,
    /// Upper bound for a worker's run before its join is reported late.
    /// `None` derives it from the work budget.
    pub join_timeout: Option<Duration>,
    /// Seed for random-pattern visiting orders.
    pub seed: u64,
    /// Emit per-iteration progress diagnostics.
    pub verbose: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            name: "throughput".to_string(),
            len: 64 * 1024 * 1024,
            iterations: 5,
            num_worker_threads: 1,
            mem_node: 0,
            cpu_node: 0,
            pattern_mode: PatternMode::Sequential,
            rw_mode: RwMode::Read,
            chunk_size: ChunkSize::Bits64,
            stride: 1,
            budget: WorkBudget::default(),
            join_timeout: None,
            seed: 0x5eed,
            verbose: false,
        }
    }
}

impl BenchmarkConfig {
    /// Partition size, rounded down to a whole number of chunks so every
    /// partition starts chunk-aligned and every worker touches the same bytes.
    pub fn len_per_thread(&self) -> usize {
        per_thread_len(
            self.len,
            self.num_worker_threads.max(1),
            self.chunk_size.bytes(),
        )
    }

    /// Trailing bytes that no partition covers.
    pub fn excluded_bytes(&self) -> usize {
        self.len - self.len_per_thread() * self.num_worker_threads.max(1)
    }

    pub fn validate(&self) -> Result<(), BenchmarkError> {
        if self.iterations == 0 {
            return Err(BenchmarkError::InvalidConfig(
                "iteration count must be at least 1".to_string(),
            ));
        }
        if self.num_worker_threads == 0 {
            return Err(BenchmarkError::InvalidConfig(
                "worker thread count must be at least 1".to_string(),
            ));
        }
        if self.stride == 0 {
            return Err(BenchmarkError::InvalidConfig(
                "stride must be non-zero".to_string(),
            ));
        }
        if let WorkBudget::Passes(0) = self.budget {
            return Err(BenchmarkError::InvalidConfig(
                "passes per iteration must be at least 1".to_string(),
            ));
        }
        if self.len_per_thread() < self.chunk_size.bytes() {
            return Err(BenchmarkError::InvalidConfig(format!(
                "{} bytes across {} threads leaves less than one {} chunk per thread",
                self.len, self.num_worker_threads, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Degraded conditions observed during a run. None of them abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WarningKind {
    /// No logical CPU exists for a worker slot in the requested node.
    CpuUnresolved,
    /// The worker thread could not be bound to its CPU.
    AffinityFailed,
    /// The dummy loop was not cheaper than the real loop.
    CalibrationOverhead,
    /// A worker finished without completing a single pass.
    NoPasses,
    /// A worker panicked or finished past its deadline.
    JoinFailed,
    PowerStartFailed,
    PowerStopFailed,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningKind::CpuUnresolved => "cpu-unresolved",
            WarningKind::AffinityFailed => "affinity-failed",
            WarningKind::CalibrationOverhead => "calibration-overhead",
            WarningKind::NoPasses => "no-passes",
            WarningKind::JoinFailed => "join-failed",
            WarningKind::PowerStartFailed => "power-start-failed",
            WarningKind::PowerStopFailed => "power-stop-failed",
        };
        f.write_str(s)
    }
}

/// Set of warning kinds seen by one iteration (or one run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    kinds: BTreeSet<WarningKind>,
}

impl Diagnostics {
    pub fn insert(&mut self, kind: WarningKind) {
        self.kinds.insert(kind);
    }

    pub fn extend(&mut self, other: &Diagnostics) {
        self.kinds.extend(other.kinds.iter().copied());
    }

    pub fn contains(&self, kind: WarningKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = WarningKind> + '_ {
        self.kinds.iter().copied()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kinds.is_empty() {
            return write!(f, "-");
        }
        let joined: Vec<String> = self.kinds.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", joined.join(","))
    }
}

/// Throughput in MB/s given aggregate passes and the per-worker average tick count.
pub fn throughput_mb_per_s(
    total_passes: u64,
    bytes_per_pass: u64,
    avg_adjusted_ticks: u64,
    ns_per_tick: f64,
) -> f64 {
    let seconds = avg_adjusted_ticks as f64 * ns_per_tick / 1e9;
    if seconds <= 0.0 {
        return 0.0;
    }
    (total_passes as f64 * bytes_per_pass as f64 / MB) / seconds
}

/// Aggregated outcome of one iteration across all of its workers.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationResult {
    pub index: u32,
    pub num_workers: usize,
    pub total_passes: u64,
    pub bytes_per_pass: u64,
    pub total_adjusted_ticks: u64,
    pub avg_adjusted_ticks: u64,
    pub total_dummy_ticks: u64,
    pub throughput: f64,
    pub diagnostics: Diagnostics,
}

impl IterationResult {
    /// Combine per-worker summaries. `diagnostics` carries warnings the
    /// orchestrator observed itself (unresolved CPUs, failed joins).
    pub fn aggregate(
        index: u32,
        workers: &[WorkerSummary],
        ns_per_tick: f64,
        mut diagnostics: Diagnostics,
    ) -> Self {
        let num_workers = workers.len();
        let mut total_passes = 0u64;
        let mut total_adjusted_ticks = 0u64;
        let mut total_dummy_ticks = 0u64;
        // All workers run the same kernel; a worker that never started reports 0.
        let bytes_per_pass = workers
            .iter()
            .map(|w| w.bytes_per_pass)
            .find(|&b| b > 0)
            .unwrap_or(0);

        for worker in workers {
            total_passes += worker.passes;
            total_adjusted_ticks += worker.adjusted_ticks;
            total_dummy_ticks += worker.dummy_ticks;
            diagnostics.extend(&worker.warnings);
        }

        let avg_adjusted_ticks = if num_workers > 0 {
            total_adjusted_ticks / num_workers as u64
        } else {
            0
        };
        let throughput =
            throughput_mb_per_s(total_passes, bytes_per_pass, avg_adjusted_ticks, ns_per_tick);

        Self {
            index,
            num_workers,
            total_passes,
            bytes_per_pass,
            total_adjusted_ticks,
            avg_adjusted_ticks,
            total_dummy_ticks,
            throughput,
            diagnostics,
        }
    }

    pub fn had_warning(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// One throughput value per iteration plus their mean.
#[derive(Debug, Clone, Default)]
pub struct MetricSeries {
    iterations: Vec<IterationResult>,
    average: f64,
    completed: bool,
}

impl MetricSeries {
    pub fn with_capacity(iterations: usize) -> Self {
        Self {
            iterations: Vec::with_capacity(iterations),
            average: 0.0,
            completed: false,
        }
    }

    pub(crate) fn record(&mut self, result: IterationResult) {
        debug_assert!(!self.completed, "series already finalized");
        debug_assert_eq!(result.index as usize, self.iterations.len());
        self.iterations.push(result);
    }

    /// Compute the average and mark the series as final.
    pub(crate) fn finalize(&mut self) {
        debug_assert!(!self.completed, "series finalized twice");
        self.average = if self.iterations.is_empty() {
            0.0
        } else {
            self.iterations.iter().map(|r| r.throughput).sum::<f64>()
                / self.iterations.len() as f64
        };
        self.completed = true;
    }

    pub fn values(&self) -> Vec<f64> {
        self.iterations.iter().map(|r| r.throughput).collect()
    }

    pub fn iterations(&self) -> &[IterationResult] {
        &self.iterations
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// The mean throughput, available only once the run has completed.
    pub fn average(&self) -> Option<f64> {
        self.completed.then_some(self.average)
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Everything a finished run produced, for reporting.
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub config: BenchmarkConfig,
    pub series: MetricSeries,
    pub ns_per_tick: f64,
    pub excluded_bytes: usize,
    pub run_warnings: Diagnostics,
    pub power: Vec<PowerSummary>,
}

impl BenchmarkResult {
    pub fn metric_units(&self) -> &'static str {
        "MB/s"
    }
}
