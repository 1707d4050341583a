#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use membw::{
    BenchmarkConfig, ChunkSize, MemoryRegion, NumaTopology, PatternMode, PowerError, PowerReader,
    PowerSummary, RwMode, Timer, Topology, WorkBudget,
};

pub mod benchmark_behavior;

/// Small, fast configuration: fixed passes so runs are deterministic in size.
pub fn quick_config(len: usize, threads: usize, iterations: u32) -> BenchmarkConfig {
    BenchmarkConfig {
        name: "test".to_string(),
        len,
        iterations,
        num_worker_threads: threads,
        pattern_mode: PatternMode::Sequential,
        rw_mode: RwMode::Read,
        chunk_size: ChunkSize::Bits64,
        stride: 1,
        budget: WorkBudget::Passes(4),
        verbose: true,
        ..Default::default()
    }
}

pub fn test_timer() -> Timer {
    Timer::calibrate(Duration::from_millis(10)).expect("timer calibration")
}

pub fn test_region(len: usize) -> MemoryRegion {
    MemoryRegion::allocate(len).expect("allocate test region")
}

/// A topology with no CPUs, so workers run unpinned on any machine.
pub fn unpinned_topology() -> Box<NumaTopology> {
    Box::new(NumaTopology::from_nodes(vec![vec![]]))
}

/// Topology that counts how many CPU ids were resolved, i.e. how many
/// workers were created.
pub struct CountingTopology {
    pub inner: NumaTopology,
    pub lookups: Arc<AtomicUsize>,
}

impl CountingTopology {
    pub fn new(nodes: Vec<Vec<usize>>) -> (Self, Arc<AtomicUsize>) {
        let lookups = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: NumaTopology::from_nodes(nodes),
                lookups: Arc::clone(&lookups),
            },
            lookups,
        )
    }
}

impl Topology for CountingTopology {
    fn num_nodes(&self) -> usize {
        self.inner.num_nodes()
    }

    fn cpus_in_node(&self, node: usize) -> &[usize] {
        self.inner.cpus_in_node(node)
    }

    fn cpu_id_in_node(&self, node: usize, slot: usize) -> Option<usize> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.cpu_id_in_node(node, slot)
    }
}

#[derive(Default)]
pub struct PowerCalls {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

/// Power reader that records calls and optionally fails them.
pub struct RecordingPowerReader {
    pub calls: Arc<PowerCalls>,
    pub fail_start: bool,
    pub fail_stop: bool,
}

impl RecordingPowerReader {
    pub fn new(fail_start: bool, fail_stop: bool) -> (Self, Arc<PowerCalls>) {
        let calls = Arc::new(PowerCalls::default());
        (
            Self {
                calls: Arc::clone(&calls),
                fail_start,
                fail_stop,
            },
            calls,
        )
    }
}

impl PowerReader for RecordingPowerReader {
    fn name(&self) -> &str {
        "recording"
    }

    fn start(&mut self) -> Result<(), PowerError> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            Err(PowerError::NotRunning("recording".to_string()))
        } else {
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<(), PowerError> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            Err(PowerError::NotRunning("recording".to_string()))
        } else {
            Ok(())
        }
    }

    fn summary(&self) -> PowerSummary {
        PowerSummary::from_samples("recording", &[1.5, 2.5])
    }
}
