use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::worker::Worker;

enum RunnerState<'scope, 'env> {
    Created(Worker<'env>),
    Started {
        handle: ScopedJoinHandle<'scope, ()>,
        started: Instant,
    },
    Joined,
}

/// Runs one [`Worker`] on its own OS thread inside a thread scope.
pub struct ThreadRunner<'scope, 'env> {
    worker_id: usize,
    deadline: Duration,
    state: RunnerState<'scope, 'env>,
}

impl<'scope, 'env: 'scope> ThreadRunner<'scope, 'env> {
    /// Wrap `worker`; a join later than `deadline` after start counts as failed.
    pub fn new(worker: Worker<'env>, deadline: Duration) -> Self {
        Self {
            worker_id: worker.id(),
            deadline,
            state: RunnerState::Created(worker),
        }
    }

    /// Spawn the worker's thread. Calling this twice is a no-op.
    pub fn create_and_start(&mut self, scope: &'scope Scope<'scope, 'env>) -> std::io::Result<()> {
        match std::mem::replace(&mut self.state, RunnerState::Joined) {
            RunnerState::Created(worker) => {
                let started = Instant::now();
                let handle = thread::Builder::new()
                    .name(format!("membw-worker-{}", self.worker_id))
                    .spawn_scoped(scope, move || worker.run())?;
                self.state = RunnerState::Started { handle, started };
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Block until the worker's thread exits. Returns `false` if it panicked,
    /// overran its deadline or was never started.
    pub fn join(&mut self) -> bool {
        match std::mem::replace(&mut self.state, RunnerState::Joined) {
            RunnerState::Started { handle, started } => {
                let outcome = handle.join();
                let elapsed = started.elapsed();
                if outcome.is_err() {
                    warn!(worker = self.worker_id, "worker thread panicked");
                    return false;
                }
                if elapsed > self.deadline {
                    warn!(
                        worker = self.worker_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        deadline_ms = self.deadline.as_millis() as u64,
                        "worker thread finished after its deadline"
                    );
                    return false;
                }
                true
            }
            RunnerState::Created(_) => {
                warn!(worker = self.worker_id, "worker thread was never started");
                false
            }
            RunnerState::Joined => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::types::{ChunkSize, PatternMode, RwMode};
    use crate::kernels::{BuiltinKernels, KernelSelector, Until};
    use crate::memory::MemoryRegion;
    use crate::worker::WorkerStats;

    fn worker<'a>(mem: &'a mut [u8], stats: &'a WorkerStats) -> Worker<'a> {
        let kernels = BuiltinKernels
            .select(PatternMode::Sequential, RwMode::Read, ChunkSize::Bits32, 1)
            .unwrap();
        Worker::new(0, mem, kernels, None, Until::Passes(3), 0, stats)
    }

    #[test]
    fn join_succeeds_within_deadline() {
        let mut region = MemoryRegion::allocate(4096).unwrap();
        let mem = region.as_mut_slice();
        let stats = WorkerStats::default();
        let ok = thread::scope(|s| {
            let mut runner = ThreadRunner::new(worker(mem, &stats), Duration::from_secs(30));
            runner.create_and_start(s).unwrap();
            runner.join()
        });
        assert!(ok);
        assert_eq!(stats.passes(), 3);
    }

    #[test]
    fn late_join_is_reported_but_data_survives() {
        let mut region = MemoryRegion::allocate(4096).unwrap();
        let mem = region.as_mut_slice();
        let stats = WorkerStats::default();
        let ok = thread::scope(|s| {
            let mut runner = ThreadRunner::new(worker(mem, &stats), Duration::ZERO);
            runner.create_and_start(s).unwrap();
            runner.join()
        });
        assert!(!ok);
        assert_eq!(stats.passes(), 3);
    }

    #[test]
    fn join_without_start_fails() {
        let mut mem = vec![0u8; 4096];
        let stats = WorkerStats::default();
        let mut runner: ThreadRunner<'_, '_> =
            ThreadRunner::new(worker(&mut mem, &stats), Duration::from_secs(1));
        assert!(!runner.join());
        assert!(!runner.join());
    }
}
