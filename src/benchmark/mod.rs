pub mod reporting;
pub mod runner;
pub mod types;

pub use reporting::{
    benchmark_info, benchmark_results_to_csv, bytes_to_human_readable, find_best_performer,
    format_throughput, print_benchmark_summary, write_results_csv,
};
pub use runner::ThroughputBenchmark;
pub use types::{
    BenchmarkConfig, BenchmarkResult, ChunkSize, Diagnostics, IterationResult, MetricSeries,
    PatternMode, RwMode, WarningKind, WorkBudget, throughput_mb_per_s,
};
