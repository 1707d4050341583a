use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use membw::benchmark::{find_best_performer, print_benchmark_summary, write_results_csv};
use membw::power::DEFAULT_SAMPLE_INTERVAL;
use membw::timer::DEFAULT_CALIBRATION;
use membw::{
    BenchmarkConfig, BenchmarkError, ChunkSize, MemoryRegion, NumaTopology, PatternMode,
    PowerLifecycle, PowerReader, RaplPowerReader, RwMode, ThroughputBenchmark, Timer, Topology,
    WorkBudget,
};

#[derive(Parser, Debug)]
#[command(name = "membw", version, about = "NUMA-aware memory throughput benchmark")]
struct Args {
    /// Working set size in MiB, shared by all worker threads
    #[arg(short = 's', long, default_value = "256")]
    size_mb: usize,

    /// Number of worker threads
    #[arg(short, long, default_value = "1")]
    threads: usize,

    /// Iterations per benchmark
    #[arg(short = 'n', long, default_value = "5")]
    iterations: u32,

    /// NUMA node the region is placed on
    #[arg(long, default_value = "0")]
    mem_node: usize,

    /// NUMA node whose CPUs run the workers
    #[arg(long, default_value = "0")]
    cpu_node: usize,

    /// Access pattern(s) to benchmark
    #[arg(long, value_enum, num_args = 1.., default_values = ["seq"])]
    pattern: Vec<PatternMode>,

    /// Read and/or write kernels
    #[arg(long, value_enum, num_args = 1.., default_values = ["read"])]
    rw: Vec<RwMode>,

    /// Access width(s) in bits
    #[arg(long, value_enum, num_args = 1.., default_values = ["64"])]
    chunk: Vec<ChunkSize>,

    /// Stride(s) in chunks; negative values walk backwards
    #[arg(long, num_args = 1.., allow_negative_numbers = true, default_values = ["1"])]
    stride: Vec<i64>,

    /// Time each worker spends in its timed loop per iteration
    #[arg(long, default_value = "250")]
    duration_ms: u64,

    /// Run a fixed number of passes per iteration instead of a fixed duration
    #[arg(long)]
    passes: Option<u64>,

    /// Report a worker as late after this many milliseconds
    #[arg(long)]
    join_timeout_ms: Option<u64>,

    /// Seed for random access orders
    #[arg(long, default_value = "24301")]
    seed: u64,

    /// Sample RAPL power counters during each benchmark
    #[arg(long)]
    power: bool,

    /// Interval between power samples
    #[arg(long, default_value_t = DEFAULT_SAMPLE_INTERVAL.as_millis() as u64)]
    power_interval_ms: u64,

    /// Print per-iteration progress
    #[arg(short, long)]
    verbose: bool,

    /// Write per-iteration results to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn power_lifecycle(args: &Args) -> PowerLifecycle {
    if !args.power {
        return PowerLifecycle::default();
    }
    let readers: Vec<Box<dyn PowerReader>> =
        RaplPowerReader::discover(Duration::from_millis(args.power_interval_ms))
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn PowerReader>)
            .collect();
    if readers.is_empty() {
        warn!("no RAPL power domains found; power will not be reported");
    }
    PowerLifecycle::new(readers)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let timer = Timer::calibrate(DEFAULT_CALIBRATION)?;
    info!("Tick timer: {:.4} ns per tick", timer.ns_per_tick());

    let topology = NumaTopology::detect();
    if args.mem_node >= topology.num_nodes() || args.cpu_node >= topology.num_nodes() {
        warn!(
            nodes = topology.num_nodes(),
            mem_node = args.mem_node,
            cpu_node = args.cpu_node,
            "requested NUMA node does not exist"
        );
    }

    let len = args.size_mb * 1024 * 1024;
    let first_touch_cpu = topology.cpu_id_in_node(args.mem_node, 0);
    if first_touch_cpu.is_none() {
        warn!(
            mem_node = args.mem_node,
            "no CPU in memory node; region placement is not guaranteed"
        );
    }
    let mut region = MemoryRegion::allocate_on_cpu(len, first_touch_cpu)?;

    let budget = match args.passes {
        Some(passes) => WorkBudget::Passes(passes),
        None => WorkBudget::Duration(Duration::from_millis(args.duration_ms)),
    };

    let mut results = Vec::new();
    for &pattern_mode in &args.pattern {
        for &rw_mode in &args.rw {
            for &chunk_size in &args.chunk {
                for &stride in &args.stride {
                    let config = BenchmarkConfig {
                        name: format!(
                            "{}-{}-{}b-stride{}",
                            pattern_mode,
                            rw_mode,
                            chunk_size.bits(),
                            stride
                        ),
                        len,
                        iterations: args.iterations,
                        num_worker_threads: args.threads,
                        mem_node: args.mem_node,
                        cpu_node: args.cpu_node,
                        pattern_mode,
                        rw_mode,
                        chunk_size,
                        stride,
                        budget,
                        join_timeout: args.join_timeout_ms.map(Duration::from_millis),
                        seed: args.seed,
                        verbose: args.verbose,
                    };

                    let mut bench =
                        ThroughputBenchmark::new(config, timer, Box::new(topology.clone()))?
                            .with_power(power_lifecycle(&args));
                    let outcome = bench.run(region.as_mut_slice()).map(|s| s.average());
                    match outcome {
                        Ok(average) => {
                            if let Some(avg) = average {
                                info!("{}: {:.2} MB/s", bench.config().name, avg);
                            }
                        }
                        Err(e @ BenchmarkError::UnsupportedKernel { .. }) => {
                            warn!("skipping benchmark: {}", e);
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                    if let Some(result) = bench.result() {
                        results.push(result);
                    }
                }
            }
        }
    }

    print_benchmark_summary(&results);
    if let Some(best) = find_best_performer(&results) {
        if let Some(avg) = best.series.average() {
            println!("Best: {} ({:.2} MB/s)", best.config.name, avg);
        }
    }

    if let Some(path) = &args.csv {
        write_results_csv(path, &results)?;
        info!("Wrote results to {}", path.display());
    }

    Ok(())
}
