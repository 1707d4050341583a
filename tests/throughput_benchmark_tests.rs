mod common;

use std::sync::atomic::{AtomicBool, Ordering};

use common::benchmark_behavior;
use common::{
    CountingTopology, RecordingPowerReader, quick_config, test_region, test_timer,
    unpinned_topology,
};
use membw::benchmark::benchmark_results_to_csv;
use membw::{
    BenchmarkConfig, BenchmarkError, BuiltinKernels, ChunkSize, Kernel, KernelPair,
    KernelSelector, PatternMode, PowerLifecycle, Routine, RwMode, ThroughputBenchmark, Timer,
    WarningKind, WorkBudget, split_region,
};

fn sequential_read(len: usize, threads: usize, iterations: u32) -> BenchmarkConfig {
    quick_config(len, threads, iterations)
}

fn random_read(len: usize, threads: usize, iterations: u32) -> BenchmarkConfig {
    BenchmarkConfig {
        pattern_mode: PatternMode::Random,
        ..quick_config(len, threads, iterations)
    }
}

fn sequential_write(len: usize, threads: usize, iterations: u32) -> BenchmarkConfig {
    BenchmarkConfig {
        rw_mode: RwMode::Write,
        ..quick_config(len, threads, iterations)
    }
}

fn random_write(len: usize, threads: usize, iterations: u32) -> BenchmarkConfig {
    BenchmarkConfig {
        pattern_mode: PatternMode::Random,
        rw_mode: RwMode::Write,
        ..quick_config(len, threads, iterations)
    }
}

#[test]
fn sequential_one_metric_per_iteration() {
    benchmark_behavior::one_metric_per_iteration(sequential_read);
}

#[test]
fn random_one_metric_per_iteration() {
    benchmark_behavior::one_metric_per_iteration(random_read);
}

#[test]
fn sequential_average_is_mean() {
    benchmark_behavior::average_is_mean_of_series(sequential_read);
}

#[test]
fn random_average_is_mean() {
    benchmark_behavior::average_is_mean_of_series(random_read);
}

#[test]
fn sequential_write_covers_partitions() {
    benchmark_behavior::every_byte_of_each_partition_is_written(sequential_write);
}

#[test]
fn random_write_covers_partitions() {
    benchmark_behavior::every_byte_of_each_partition_is_written(random_write);
}

#[test]
fn sequential_late_workers_still_measured() {
    benchmark_behavior::late_workers_still_produce_metrics(sequential_read);
}

#[test]
fn random_late_workers_still_measured() {
    benchmark_behavior::late_workers_still_produce_metrics(random_read);
}

struct NoKernels;

impl KernelSelector for NoKernels {
    fn select(
        &self,
        pattern: PatternMode,
        rw_mode: RwMode,
        chunk_size: ChunkSize,
        stride: i64,
    ) -> Result<KernelPair, BenchmarkError> {
        Err(BenchmarkError::UnsupportedKernel {
            pattern,
            rw_mode,
            chunk_size,
            stride,
        })
    }
}

#[test]
fn kernel_selection_failure_aborts_before_any_work() {
    let (topology, lookups) = CountingTopology::new(vec![vec![]]);
    let (reader, calls) = RecordingPowerReader::new(false, false);
    let config = quick_config(4096, 4, 3);
    let mut region = test_region(config.len);

    let mut bench = ThroughputBenchmark::new(config, test_timer(), Box::new(topology))
        .unwrap()
        .with_kernel_selector(Box::new(NoKernels))
        .with_power(PowerLifecycle::new(vec![Box::new(reader)]));

    let err = bench.run(region.as_mut_slice()).unwrap_err();
    assert!(matches!(err, BenchmarkError::UnsupportedKernel { .. }));
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
    assert_eq!(calls.starts.load(Ordering::SeqCst), 0);
    assert_eq!(calls.stops.load(Ordering::SeqCst), 0);
    assert!(bench.series().is_empty());
    assert!(!bench.has_run());
    assert!(bench.result().is_none());
}

#[test]
fn unsupported_builtin_stride_is_a_run_failure() {
    let config = BenchmarkConfig {
        stride: 3,
        ..quick_config(4096, 1, 1)
    };
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology()).unwrap();
    assert!(matches!(
        bench.run(region.as_mut_slice()),
        Err(BenchmarkError::UnsupportedKernel { stride: 3, .. })
    ));
    assert!(bench.series().is_empty());
}

#[test]
fn power_brackets_the_whole_run() {
    let (reader, calls) = RecordingPowerReader::new(false, false);
    let config = quick_config(8192, 2, 4);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology())
        .unwrap()
        .with_power(PowerLifecycle::new(vec![Box::new(reader)]));

    bench.run(region.as_mut_slice()).unwrap();
    assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
    assert_eq!(calls.stops.load(Ordering::SeqCst), 1);
    assert!(bench.run_warnings().is_empty());

    let result = bench.result().unwrap();
    assert_eq!(result.power.len(), 1);
    assert_eq!(result.power[0].average_watts, Some(2.0));
}

#[test]
fn power_failures_are_warnings_not_errors() {
    let (reader, _calls) = RecordingPowerReader::new(true, true);
    let config = quick_config(8192, 2, 2);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology())
        .unwrap()
        .with_power(PowerLifecycle::new(vec![Box::new(reader)]));

    let series = bench.run(region.as_mut_slice()).unwrap();
    assert_eq!(series.len(), 2);
    assert!(bench.run_warnings().contains(WarningKind::PowerStartFailed));
    assert!(bench.run_warnings().contains(WarningKind::PowerStopFailed));
    assert!(bench.has_run());
}

#[test]
fn unresolved_cpus_degrade_but_continue() {
    let (topology, lookups) = CountingTopology::new(vec![vec![]]);
    let config = quick_config(4096, 4, 3);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), Box::new(topology)).unwrap();

    let series = bench.run(region.as_mut_slice()).unwrap();
    assert_eq!(lookups.load(Ordering::SeqCst), 4 * 3);
    for iter in series.iterations() {
        assert!(iter.diagnostics.contains(WarningKind::CpuUnresolved));
        assert_eq!(iter.total_passes, 16);
    }
}

static PANICKED: AtomicBool = AtomicBool::new(false);

fn panics_once(mem: &mut [u8]) -> u64 {
    if !PANICKED.swap(true, Ordering::SeqCst) {
        panic!("simulated worker failure");
    }
    std::hint::black_box(mem.len()) as u64
}

struct PanickingSelector;

impl KernelSelector for PanickingSelector {
    fn select(
        &self,
        pattern: PatternMode,
        rw_mode: RwMode,
        chunk_size: ChunkSize,
        stride: i64,
    ) -> Result<KernelPair, BenchmarkError> {
        let builtin = BuiltinKernels.select(pattern, rw_mode, chunk_size, stride)?;
        Ok(KernelPair {
            kernel: Kernel::new("panics-once", Routine::Sequential(panics_once)),
            ..builtin
        })
    }
}

#[test]
fn panicking_worker_does_not_stop_aggregation() {
    let config = quick_config(8192, 2, 1);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology())
        .unwrap()
        .with_kernel_selector(Box::new(PanickingSelector));

    let series = bench.run(region.as_mut_slice()).unwrap();
    let iter = &series.iterations()[0];
    assert!(iter.diagnostics.contains(WarningKind::JoinFailed));
    // Only the surviving worker contributed passes.
    assert_eq!(iter.total_passes, 4);
    assert_eq!(iter.bytes_per_pass, 4096);
    assert!(series.average().is_some());
}

#[test]
fn uneven_region_excludes_trailing_bytes() {
    for (len, excluded) in [(4096 + 3, 3), (4100, 4)] {
        let config = sequential_write(len, 4, 1);
        let mut region = test_region(config.len);
        let mut bench =
            ThroughputBenchmark::new(config, test_timer(), unpinned_topology()).unwrap();
        assert_eq!(bench.excluded_bytes(), excluded);

        bench.run(region.as_mut_slice()).unwrap();
        let result = bench.result().unwrap();
        assert_eq!(result.excluded_bytes, excluded);
        assert_eq!(result.series.iterations()[0].bytes_per_pass, 1024);

        let (measured, tail) = region.as_slice().split_at(4096);
        assert!(measured.iter().all(|&b| b == 0xa5));
        assert!(tail.iter().all(|&b| b == 0));
    }
}

#[test]
fn every_partition_touches_the_same_bytes() {
    let chunks = [
        ChunkSize::Bits32,
        ChunkSize::Bits64,
        ChunkSize::Bits128,
        ChunkSize::Bits256,
    ];
    for chunk in chunks {
        let len = 4100;
        let mut region = test_region(len);
        let kernels = BuiltinKernels
            .select(PatternMode::Sequential, RwMode::Read, chunk, 1)
            .unwrap();
        let per_worker: Vec<u64> = split_region(region.as_mut_slice(), len, 4, chunk.bytes())
            .into_iter()
            .map(|part| kernels.kernel.pass(part, &[]))
            .collect();

        assert_eq!(per_worker.len(), 4);
        assert!(per_worker.iter().all(|&b| b == per_worker[0]), "{:?}", per_worker);
        assert_eq!(per_worker[0] as usize % chunk.bytes(), 0);
        assert!(per_worker[0] >= 1024 - chunk.bytes() as u64);
    }
}

#[test]
fn duration_budget_runs_until_time_elapses() {
    let config = BenchmarkConfig {
        budget: WorkBudget::Duration(std::time::Duration::from_millis(5)),
        verbose: false,
        ..quick_config(4096, 1, 2)
    };
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology()).unwrap();
    let series = bench.run(region.as_mut_slice()).unwrap();
    for iter in series.iterations() {
        assert!(iter.total_passes >= 1);
        assert!(iter.throughput.is_finite() && iter.throughput >= 0.0);
    }
}

#[test]
fn csv_has_a_row_per_iteration() {
    let config = quick_config(4096, 2, 3);
    let mut region = test_region(config.len);
    let mut bench =
        ThroughputBenchmark::new(config, Timer::from_ns_per_tick(0.5), unpinned_topology())
            .unwrap();
    bench.run(region.as_mut_slice()).unwrap();
    let result = bench.result().unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("results.csv");
    membw::benchmark::write_results_csv(&path, std::slice::from_ref(&result)).unwrap();
    let csv = std::fs::read_to_string(&path).unwrap();
    assert_eq!(csv, benchmark_results_to_csv(&[result]));

    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("name,pattern,rw,chunk_bits"));
    assert!(lines[1].starts_with("test,sequential,read,64,1,2,4096,0,"));
}
