use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

#[derive(Parser, Debug)]
struct Args {
    /// Output CSV file
    #[arg(long)]
    output: String,
    /// Number of request lines
    #[arg(long, default_value_t = 1_000_000)]
    lines: u64,
    /// Timestamp of the first request, epoch ms
    #[arg(long, default_value_t = 1_700_000_000_000)]
    start_ms: u64,
    /// Average requests per second
    #[arg(long, default_value_t = 2_000)]
    rate: u32,
    /// HTTP method written in every line
    #[arg(long, default_value = "POST")]
    method: String,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    anyhow::ensure!(args.rate > 0, "--rate must be >= 1");

    let t0 = Instant::now();
    let out = File::create(&args.output).with_context(|| format!("create {}", &args.output))?;
    let mut w = BufWriter::with_capacity(8 * 1024 * 1024, out);
    let mut rng = StdRng::seed_from_u64(args.seed);

    // Mean gap between requests, in microseconds
    let gap_us = 1_000_000u64 / args.rate as u64;
    let mut clock_us = args.start_ms * 1000;
    let mut bytes: u64 = 0;
    for _ in 0..args.lines {
        clock_us += rng.gen_range(0..=gap_us * 2);
        // mostly fast with a long tail
        let latency: u32 = if rng.gen_bool(0.02) { rng.gen_range(200..2_000) } else { rng.gen_range(1..120) };
        let status = if rng.gen_bool(0.005) { 500 } else { 200 };
        let line = format!("\"{}\",\"{}\",\"{}\",\"{}\"\n", clock_us / 1000, args.method, latency, status);
        w.write_all(line.as_bytes())?;
        bytes += line.len() as u64;
    }
    w.flush()?;

    eprintln!(
        "gen_access_log: lines={} bytes={} span_ms={} total_ms={}",
        args.lines,
        bytes,
        clock_us / 1000 - args.start_ms,
        t0.elapsed().as_millis()
    );
    Ok(())
}
