use std::io;

use crate::benchmark::types::{ChunkSize, PatternMode, RwMode};

#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error(
        "no benchmark kernel for pattern={pattern}, rw={rw_mode}, chunk={chunk_size}, stride={stride}"
    )]
    UnsupportedKernel {
        pattern: PatternMode,
        rw_mode: RwMode,
        chunk_size: ChunkSize,
        stride: i64,
    },

    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(String),

    #[error("memory region holds {actual} bytes but the benchmark needs {required}")]
    RegionTooSmall { required: usize, actual: usize },

    #[error("memory region must be aligned to {align} bytes")]
    MisalignedRegion { align: usize },

    #[error("benchmark {0} has already run")]
    AlreadyRun(String),

    #[error("failed to allocate {0} bytes for the benchmark region")]
    Allocation(usize),

    #[error("timer calibration failed: {0}")]
    Calibration(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("power reader {0} is already running")]
    AlreadyRunning(String),

    #[error("power reader {0} was not running")]
    NotRunning(String),

    #[error("power sampling thread for {0} panicked")]
    SamplerPanicked(String),

    #[error("failed to read energy counter {path}: {source}")]
    Counter {
        path: String,
        #[source]
        source: io::Error,
    },
}
