//! Background power sampling that brackets a benchmark run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::PowerError;

const POWERCAP_DIR: &str = "/sys/class/powercap";

/// Default interval between energy counter reads.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Average and peak power observed by one reader.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSummary {
    pub name: String,
    pub samples: usize,
    pub average_watts: Option<f64>,
    pub peak_watts: Option<f64>,
}

impl PowerSummary {
    pub fn from_samples(name: &str, watts: &[f64]) -> Self {
        let (average_watts, peak_watts) = if watts.is_empty() {
            (None, None)
        } else {
            (
                Some(watts.iter().sum::<f64>() / watts.len() as f64),
                watts.iter().copied().reduce(f64::max),
            )
        };
        Self {
            name: name.to_string(),
            samples: watts.len(),
            average_watts,
            peak_watts,
        }
    }
}

/// A power source sampled on its own thread between `start` and `stop`.
pub trait PowerReader: Send {
    fn name(&self) -> &str;
    fn start(&mut self) -> Result<(), PowerError>;
    fn stop(&mut self) -> Result<(), PowerError>;
    fn summary(&self) -> PowerSummary;
}

/// Starts and stops every configured power reader together.
#[derive(Default)]
pub struct PowerLifecycle {
    readers: Vec<Box<dyn PowerReader>>,
}

impl PowerLifecycle {
    pub fn new(readers: Vec<Box<dyn PowerReader>>) -> Self {
        Self { readers }
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Start every reader. Returns `false` if any failed; the rest still run.
    pub fn start_all(&mut self) -> bool {
        let mut ok = true;
        for reader in &mut self.readers {
            if let Err(e) = reader.start() {
                warn!(reader = reader.name(), error = %e, "failed to start power reader");
                ok = false;
            }
        }
        ok
    }

    /// Stop every reader. Returns `false` if any failed.
    pub fn stop_all(&mut self) -> bool {
        let mut ok = true;
        for reader in &mut self.readers {
            if let Err(e) = reader.stop() {
                warn!(reader = reader.name(), error = %e, "failed to stop power reader");
                ok = false;
            }
        }
        ok
    }

    pub fn summaries(&self) -> Vec<PowerSummary> {
        self.readers.iter().map(|r| r.summary()).collect()
    }
}

struct Sampler {
    stop: Sender<()>,
    handle: JoinHandle<Vec<f64>>,
}

/// Samples a RAPL `energy_uj` counter and converts deltas to watts.
pub struct RaplPowerReader {
    name: String,
    dir: PathBuf,
    interval: Duration,
    sampler: Option<Sampler>,
    watts: Vec<f64>,
}

impl RaplPowerReader {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            interval,
            sampler: None,
            watts: Vec::new(),
        }
    }

    /// RAPL DRAM domains on this machine, or package domains if the platform
    /// exposes no DRAM domain.
    pub fn discover(interval: Duration) -> Vec<Self> {
        Self::discover_in(Path::new(POWERCAP_DIR), interval)
    }

    pub fn discover_in(root: &Path, interval: Duration) -> Vec<Self> {
        let Ok(entries) = fs::read_dir(root) else {
            return Vec::new();
        };
        let mut dram = Vec::new();
        let mut package = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(id) = file_name.to_str() else {
                continue;
            };
            if !id.starts_with("intel-rapl:") {
                continue;
            }
            let path = entry.path();
            let domain = fs::read_to_string(path.join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            let reader_name = format!("{}/{}", id, domain);
            if domain == "dram" {
                dram.push(Self::new(reader_name, path, interval));
            } else if id.matches(':').count() == 1 {
                package.push(Self::new(reader_name, path, interval));
            }
        }
        let mut found = if dram.is_empty() { package } else { dram };
        found.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(readers = found.len(), "discovered RAPL power readers");
        found
    }

    fn read_counter(path: &Path) -> Result<u64, PowerError> {
        let text = fs::read_to_string(path).map_err(|source| PowerError::Counter {
            path: path.display().to_string(),
            source,
        })?;
        text.trim().parse().map_err(|e| PowerError::Counter {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

impl PowerReader for RaplPowerReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), PowerError> {
        if self.sampler.is_some() {
            return Err(PowerError::AlreadyRunning(self.name.clone()));
        }
        let energy_path = self.dir.join("energy_uj");
        let first = Self::read_counter(&energy_path)?;
        // A missing range file only matters when the counter wraps.
        let max_range = Self::read_counter(&self.dir.join("max_energy_range_uj")).unwrap_or(0);
        let interval = self.interval;
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(format!("membw-power-{}", self.name))
            .spawn(move || {
                let mut watts = Vec::new();
                let mut last_energy = first;
                let mut last_time = Instant::now();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    let Ok(energy) = Self::read_counter(&energy_path) else {
                        continue;
                    };
                    let now = Instant::now();
                    let delta = if energy >= last_energy {
                        energy - last_energy
                    } else {
                        max_range.saturating_sub(last_energy) + energy
                    };
                    let secs = now.duration_since(last_time).as_secs_f64();
                    if secs > 0.0 {
                        watts.push(delta as f64 / 1e6 / secs);
                    }
                    last_energy = energy;
                    last_time = now;
                }
                watts
            })
            .map_err(|source| PowerError::Counter {
                path: self.dir.display().to_string(),
                source,
            })?;

        self.watts.clear();
        self.sampler = Some(Sampler { stop, handle });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PowerError> {
        let sampler = self
            .sampler
            .take()
            .ok_or_else(|| PowerError::NotRunning(self.name.clone()))?;
        // The sampler exits on either a message or a disconnected channel.
        let _ = sampler.stop.send(());
        self.watts = sampler
            .handle
            .join()
            .map_err(|_| PowerError::SamplerPanicked(self.name.clone()))?;
        Ok(())
    }

    fn summary(&self) -> PowerSummary {
        PowerSummary::from_samples(&self.name, &self.watts)
    }
}
