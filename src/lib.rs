// NUMA-aware memory throughput benchmark

pub mod affinity;
pub mod benchmark;
pub mod error;
pub mod kernels;
pub mod memory;
pub mod power;
pub mod thread;
pub mod timer;
pub mod topology;
pub mod worker;

// Export the main types
pub use benchmark::{
    BenchmarkConfig, BenchmarkResult, ChunkSize, MetricSeries, PatternMode, RwMode,
    ThroughputBenchmark, WarningKind, WorkBudget,
};
pub use error::{BenchmarkError, PowerError};
pub use kernels::{BuiltinKernels, Kernel, KernelPair, KernelSelector, Routine};
pub use memory::{MemoryRegion, WorkerPartition, partition_layout, per_thread_len, split_region};
pub use power::{PowerLifecycle, PowerReader, PowerSummary, RaplPowerReader};
pub use timer::Timer;
pub use topology::{NumaTopology, Topology};
