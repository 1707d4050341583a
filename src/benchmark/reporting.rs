use super::types::{BenchmarkConfig, BenchmarkResult, WorkBudget};
use std::fmt::Write;
use std::fs;
use std::io;
use std::path::Path;

/// Describe a benchmark configuration, one setting per line.
pub fn benchmark_info(config: &BenchmarkConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Benchmark: {}", config.name);
    let _ = writeln!(
        out,
        "Region: {} ({} bytes per thread)",
        bytes_to_human_readable(config.len),
        config.len_per_thread()
    );
    let _ = writeln!(out, "Worker threads: {}", config.num_worker_threads);
    let _ = writeln!(out, "Iterations: {}", config.iterations);
    let _ = writeln!(
        out,
        "NUMA memory node: {}, CPU node: {}",
        config.mem_node, config.cpu_node
    );
    let _ = writeln!(
        out,
        "Access: {} {}, {} chunks, stride {}",
        config.pattern_mode, config.rw_mode, config.chunk_size, config.stride
    );
    match config.budget {
        WorkBudget::Duration(d) => {
            let _ = writeln!(out, "Work per iteration: {} ms", d.as_millis());
        }
        WorkBudget::Passes(n) => {
            let _ = writeln!(out, "Work per iteration: {} passes", n);
        }
    }
    out
}

/// Print per-iteration metrics, the average and any power readings for each result.
pub fn print_benchmark_summary(results: &[BenchmarkResult]) {
    println!("\n{}", "=".repeat(110));
    println!("Benchmark Results Summary");
    println!("{}", "=".repeat(110));

    for result in results {
        println!(
            "\n{} [{} {}, {}, stride {}, {} threads]",
            result.config.name,
            result.config.pattern_mode,
            result.config.rw_mode,
            result.config.chunk_size,
            result.config.stride,
            result.config.num_worker_threads
        );
        println!(
            "{:<6} {:<14} {:<10} {:<16} {:<16} {:<16} {:<20}",
            "Iter", "Throughput", "Passes", "Bytes/Pass", "Avg Ticks", "Dummy Ticks", "Warnings"
        );
        println!(
            "{:<6} {:<14} {:<10} {:<16} {:<16} {:<16} {:<20}",
            "", "(MB/s)", "", "", "", "(total)", ""
        );
        println!("{}", "-".repeat(110));
        for iter in result.series.iterations() {
            println!(
                "{:<6} {:<14.2} {:<10} {:<16} {:<16} {:<16} {:<20}",
                iter.index + 1,
                iter.throughput,
                iter.total_passes,
                iter.bytes_per_pass,
                iter.avg_adjusted_ticks,
                iter.total_dummy_ticks,
                iter.diagnostics
            );
        }
        println!("{}", "-".repeat(110));

        match result.series.average() {
            Some(avg) => println!(
                "Average: {} ({:.2} {})",
                format_throughput(avg),
                avg,
                result.metric_units()
            ),
            None => println!("Average: N/A (run did not complete)"),
        }
        if result.excluded_bytes > 0 {
            println!(
                "Excluded trailing bytes: {} (not a whole chunk per thread)",
                result.excluded_bytes
            );
        }
        if !result.run_warnings.is_empty() {
            println!("Run warnings: {}", result.run_warnings);
        }
        for power in &result.power {
            match (power.average_watts, power.peak_watts) {
                (Some(avg), Some(peak)) => println!(
                    "Power [{}]: average {:.3} W, peak {:.3} W over {} samples",
                    power.name, avg, peak, power.samples
                ),
                _ => println!("Power [{}]: no samples", power.name),
            }
        }
    }
    println!("{}", "=".repeat(110));
}

/// Convert bytes to human-readable format (B, KB, MB, GB)
pub fn bytes_to_human_readable(bytes: usize) -> String {
    const GB: usize = 1024 * 1024 * 1024;
    const MB: usize = 1024 * 1024;
    const KB: usize = 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a decimal MB/s value with a unit that keeps it readable.
pub fn format_throughput(mb_per_s: f64) -> String {
    if mb_per_s >= 1_000_000.0 {
        format!("{:.2} TB/s", mb_per_s / 1_000_000.0)
    } else if mb_per_s >= 1_000.0 {
        format!("{:.2} GB/s", mb_per_s / 1_000.0)
    } else {
        format!("{:.2} MB/s", mb_per_s)
    }
}

/// One CSV row per iteration of every result.
pub fn benchmark_results_to_csv(results: &[BenchmarkResult]) -> String {
    let mut csv = String::new();

    let _ = writeln!(
        csv,
        "name,pattern,rw,chunk_bits,stride,threads,len,iteration,throughput_mb_s,total_passes,bytes_per_pass,total_adjusted_ticks,avg_adjusted_ticks,total_dummy_ticks,ns_per_tick,warnings,average_mb_s"
    );

    for result in results {
        let c = &result.config;
        let average = result
            .series
            .average()
            .map(|a| format!("{:.3}", a))
            .unwrap_or_default();
        for iter in result.series.iterations() {
            let warnings: Vec<String> = iter.diagnostics.iter().map(|k| k.to_string()).collect();
            let _ = writeln!(
                csv,
                "{},{},{},{},{},{},{},{},{:.3},{},{},{},{},{},{:.6},{},{}",
                c.name,
                c.pattern_mode,
                c.rw_mode,
                c.chunk_size.bits(),
                c.stride,
                c.num_worker_threads,
                c.len,
                iter.index,
                iter.throughput,
                iter.total_passes,
                iter.bytes_per_pass,
                iter.total_adjusted_ticks,
                iter.avg_adjusted_ticks,
                iter.total_dummy_ticks,
                result.ns_per_tick,
                warnings.join(";"),
                average
            );
        }
    }

    csv
}

pub fn write_results_csv(path: impl AsRef<Path>, results: &[BenchmarkResult]) -> io::Result<()> {
    fs::write(path, benchmark_results_to_csv(results))
}

/// Find the best performing result by average throughput
pub fn find_best_performer(results: &[BenchmarkResult]) -> Option<&BenchmarkResult> {
    results
        .iter()
        .filter(|r| r.series.average().is_some())
        .max_by(|a, b| {
            let a = a.series.average().unwrap_or(0.0);
            let b = b.series.average().unwrap_or(0.0);
            a.total_cmp(&b)
        })
}
