use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::reporting::benchmark_info;
use super::types::{
    BenchmarkConfig, BenchmarkResult, Diagnostics, IterationResult, MetricSeries, WarningKind,
    WorkBudget,
};
use crate::error::BenchmarkError;
use crate::kernels::{BuiltinKernels, KernelPair, KernelSelector, Until};
use crate::memory::{partition_layout, split_region};
use crate::power::PowerLifecycle;
use crate::thread::ThreadRunner;
use crate::timer::Timer;
use crate::topology::Topology;
use crate::worker::{Worker, WorkerStats, WorkerSummary};

/// A duration-budgeted worker runs the real loop, then the dummy loop for as
/// many passes; anything beyond this multiple of the budget is late.
const JOIN_SLACK: u32 = 4;
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// Drives the worker threads of a throughput benchmark through every iteration
/// and turns their tick counts into MB/s.
pub struct ThroughputBenchmark {
    config: BenchmarkConfig,
    timer: Timer,
    selector: Box<dyn KernelSelector>,
    topology: Box<dyn Topology>,
    power: PowerLifecycle,
    series: MetricSeries,
    run_warnings: Diagnostics,
}

impl ThroughputBenchmark {
    pub fn new(
        config: BenchmarkConfig,
        timer: Timer,
        topology: Box<dyn Topology>,
    ) -> Result<Self, BenchmarkError> {
        config.validate()?;
        let series = MetricSeries::with_capacity(config.iterations as usize);
        Ok(Self {
            config,
            timer,
            selector: Box::new(BuiltinKernels),
            topology,
            power: PowerLifecycle::default(),
            series,
            run_warnings: Diagnostics::default(),
        })
    }

    pub fn with_kernel_selector(mut self, selector: Box<dyn KernelSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_power(mut self, power: PowerLifecycle) -> Self {
        self.power = power;
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn series(&self) -> &MetricSeries {
        &self.series
    }

    pub fn has_run(&self) -> bool {
        self.series.is_completed()
    }

    /// Warnings that belong to the run rather than to one iteration.
    pub fn run_warnings(&self) -> &Diagnostics {
        &self.run_warnings
    }

    /// Bytes at the end of the region left out because the length does not
    /// divide evenly among the workers.
    pub fn excluded_bytes(&self) -> usize {
        self.config.excluded_bytes()
    }

    /// Snapshot of a completed run.
    pub fn result(&self) -> Option<BenchmarkResult> {
        self.has_run().then(|| BenchmarkResult {
            config: self.config.clone(),
            series: self.series.clone(),
            ns_per_tick: self.timer.ns_per_tick(),
            excluded_bytes: self.excluded_bytes(),
            run_warnings: self.run_warnings.clone(),
            power: self.power.summaries(),
        })
    }

    /// Execute every iteration over `mem`. Only a missing kernel aborts the
    /// run; every other problem is logged, flagged and measured through.
    pub fn run(&mut self, mem: &mut [u8]) -> Result<&MetricSeries, BenchmarkError> {
        if self.has_run() {
            return Err(BenchmarkError::AlreadyRun(self.config.name.clone()));
        }
        if mem.len() < self.config.len {
            return Err(BenchmarkError::RegionTooSmall {
                required: self.config.len,
                actual: mem.len(),
            });
        }
        let align = self.config.chunk_size.bytes();
        if mem.as_ptr().align_offset(align) != 0 {
            return Err(BenchmarkError::MisalignedRegion { align });
        }

        info!("-------- Running Benchmark: {} ----------", self.config.name);
        for line in benchmark_info(&self.config).lines() {
            info!("{}", line);
        }

        let kernels = match self.selector.select(
            self.config.pattern_mode,
            self.config.rw_mode,
            self.config.chunk_size,
            self.config.stride,
        ) {
            Ok(kernels) => kernels,
            Err(e) => {
                warn!(
                    benchmark = %self.config.name,
                    error = %e,
                    "failed to find appropriate benchmark kernel"
                );
                return Err(e);
            }
        };

        let excluded = self.excluded_bytes();
        if excluded > 0 {
            warn!(
                excluded_bytes = excluded,
                len = self.config.len,
                threads = self.config.num_worker_threads,
                "region does not split into equal whole-chunk partitions; tail is not measured"
            );
        }

        if self.config.verbose {
            info!("Starting power measurement threads...");
        }
        if !self.power.start_all() {
            warn!("failed to start power measurement threads");
            self.run_warnings.insert(WarningKind::PowerStartFailed);
        }

        let (until, deadline) = self.work_limits();
        if self.config.verbose {
            info!("Running benchmark.");
        }
        for i in 0..self.config.iterations {
            let result = self.run_iteration(i, mem, kernels, until, deadline);
            if self.config.verbose {
                self.report_iteration(&result);
            }
            self.series.record(result);
        }

        if self.config.verbose {
            info!("Stopping power measurement threads...");
        }
        if !self.power.stop_all() {
            warn!("failed to stop power measurement threads");
            self.run_warnings.insert(WarningKind::PowerStopFailed);
        }

        self.series.finalize();
        if self.config.verbose {
            if let Some(avg) = self.series.average() {
                info!("{}: average {:.3} MB/s", self.config.name, avg);
            }
        }
        Ok(&self.series)
    }

    fn work_limits(&self) -> (Until, Duration) {
        match self.config.budget {
            WorkBudget::Duration(d) => (
                Until::Ticks(self.timer.duration_to_ticks(d)),
                self.config
                    .join_timeout
                    .unwrap_or(d * JOIN_SLACK + JOIN_GRACE),
            ),
            WorkBudget::Passes(n) => (
                Until::Passes(n),
                self.config.join_timeout.unwrap_or(Duration::MAX),
            ),
        }
    }

    /// One CREATED -> STARTED -> JOINED -> AGGREGATED -> TORN_DOWN cycle.
    fn run_iteration(
        &self,
        index: u32,
        mem: &mut [u8],
        kernels: KernelPair,
        until: Until,
        deadline: Duration,
    ) -> IterationResult {
        let n = self.config.num_worker_threads;
        let granule = self.config.chunk_size.bytes();
        let layout = partition_layout(self.config.len, n, granule);
        let stats: Vec<WorkerStats> = (0..n).map(|_| WorkerStats::default()).collect();
        let mut diagnostics = Diagnostics::default();

        let mut workers = Vec::with_capacity(n);
        for ((t, partition), stats) in split_region(mem, self.config.len, n, granule)
            .into_iter()
            .enumerate()
            .zip(&stats)
        {
            let cpu_id = self.topology.cpu_id_in_node(self.config.cpu_node, t);
            if cpu_id.is_none() {
                warn!(
                    slot = t,
                    cpu_node = self.config.cpu_node,
                    "failed to find logical CPU in NUMA node; worker runs unpinned"
                );
                diagnostics.insert(WarningKind::CpuUnresolved);
            }
            debug!(
                iteration = index,
                worker = t,
                offset = layout[t].offset,
                len = layout[t].len,
                ?cpu_id,
                "created worker"
            );
            let seed = self.config.seed.wrapping_add(t as u64);
            workers.push(Worker::new(t, partition, kernels, cpu_id, until, seed, stats));
        }

        thread::scope(|s| {
            let mut runners: Vec<ThreadRunner<'_, '_>> = workers
                .into_iter()
                .map(|w| ThreadRunner::new(w, deadline))
                .collect();

            // Start everyone before waiting on anyone.
            for (t, runner) in runners.iter_mut().enumerate() {
                if let Err(e) = runner.create_and_start(s) {
                    warn!(worker = t, error = %e, "failed to spawn worker thread");
                }
            }
            for runner in &mut runners {
                if !runner.join() {
                    warn!("a worker thread failed to complete by the expected time");
                    diagnostics.insert(WarningKind::JoinFailed);
                }
            }
        });

        let summaries: Vec<WorkerSummary> = stats.iter().map(WorkerStats::summary).collect();
        IterationResult::aggregate(index, &summaries, self.timer.ns_per_tick(), diagnostics)
    }

    fn report_iteration(&self, r: &IterationResult) {
        let flag = if r.had_warning() { " -- WARNING" } else { "" };
        let threads = r.num_workers;
        let timer = &self.timer;
        info!(
            "Iter {} had {} passes in total across {} threads, with {} bytes touched per pass:{}",
            r.index + 1,
            r.total_passes,
            threads,
            r.bytes_per_pass,
            flag
        );
        info!(
            "...clock ticks in total across {} threads == {} (adjusted by -{}){}",
            threads, r.total_adjusted_ticks, r.total_dummy_ticks, flag
        );
        info!(
            "...ns in total across {} threads == {:.0} (adjusted by -{:.0}){}",
            threads,
            timer.ticks_to_ns(r.total_adjusted_ticks),
            timer.ticks_to_ns(r.total_dummy_ticks),
            flag
        );
        info!(
            "...sec in total across {} threads == {:.6} (adjusted by -{:.6}){}",
            threads,
            timer.ticks_to_secs(r.total_adjusted_ticks),
            timer.ticks_to_secs(r.total_dummy_ticks),
            flag
        );
        if r.had_warning() {
            info!("...warnings: {}", r.diagnostics);
        }
    }
}
