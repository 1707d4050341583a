#![allow(dead_code)]

use std::time::Duration;

use membw::{BenchmarkConfig, ThroughputBenchmark, WarningKind};

use super::{test_region, test_timer, unpinned_topology};

/// Builds a configuration for `(len, threads, iterations)`.
pub trait ConfigFactory: Fn(usize, usize, u32) -> BenchmarkConfig {}
impl<F: Fn(usize, usize, u32) -> BenchmarkConfig> ConfigFactory for F {}

pub fn one_metric_per_iteration<F: ConfigFactory>(factory: F) {
    let config = factory(64 * 1024, 2, 5);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology()).unwrap();

    let series = bench.run(region.as_mut_slice()).unwrap();
    assert!(series.is_completed());
    assert_eq!(series.len(), 5);
    for (i, iter) in series.iterations().iter().enumerate() {
        assert_eq!(iter.index as usize, i);
        assert_eq!(iter.num_workers, 2);
        assert_eq!(iter.total_passes, 2 * 4);
        assert!(iter.throughput.is_finite());
    }
}

pub fn average_is_mean_of_series<F: ConfigFactory>(factory: F) {
    let config = factory(32 * 1024, 4, 4);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology()).unwrap();

    let series = bench.run(region.as_mut_slice()).unwrap();
    let values = series.values();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let avg = series.average().unwrap();
    assert!((avg - mean).abs() <= 1e-9 * mean.abs().max(1.0));
}

pub fn every_byte_of_each_partition_is_written<F: ConfigFactory>(factory: F) {
    let config = factory(4 * 4096, 4, 1);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology()).unwrap();

    bench.run(region.as_mut_slice()).unwrap();
    assert!(region.as_slice().iter().all(|&b| b == 0xa5));
    let iter = &bench.series().iterations()[0];
    assert_eq!(iter.bytes_per_pass, 4096);
}

pub fn late_workers_still_produce_metrics<F: ConfigFactory>(factory: F) {
    let mut config = factory(16 * 1024, 2, 2);
    config.join_timeout = Some(Duration::ZERO);
    let mut region = test_region(config.len);
    let mut bench = ThroughputBenchmark::new(config, test_timer(), unpinned_topology()).unwrap();

    let series = bench.run(region.as_mut_slice()).unwrap();
    assert_eq!(series.len(), 2);
    for iter in series.iterations() {
        assert!(iter.diagnostics.contains(WarningKind::JoinFailed));
        assert_eq!(iter.total_passes, 2 * 4);
    }
    assert!(series.average().is_some());
}
