use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use reqstat::timer::format_seconds;
use reqstat::{ConsumerTopology, MalformedLinePolicy, PipelineConfig, ReadFailurePolicy, ReaderStrategy};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reqstat", about = "Throughput and latency statistics for POST/GET access logs")]
struct Args {
    /// Write-workload log (e.g. runPOSTraw.csv)
    #[arg(long)]
    post: PathBuf,
    /// Read-workload log (e.g. runGETraw.csv)
    #[arg(long)]
    get: PathBuf,
    /// Requests/sec a second must reach to belong to the peak phase
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    threshold: Option<u64>,
    /// Producers reading line-aligned ranges of the input in place
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..), conflicts_with = "split_multireader")]
    multireader: Option<u64>,
    /// Producers reading pre-split segment files
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    split_multireader: Option<u64>,
    /// One queue drained by consumers that update both maps
    #[arg(long)]
    combo_consumer: bool,
    #[arg(long, value_enum, default_value_t = OnReadError::Absorb)]
    on_read_error: OnReadError,
    #[arg(long, value_enum, default_value_t = OnMalformed::Skip)]
    on_malformed: OnMalformed,
    /// Directory for reports and split segments (default: next to each input)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Write run statistics as JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnReadError {
    Absorb,
    Fail,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnMalformed {
    Skip,
    AbortConsumer,
}

impl Args {
    fn into_config(self) -> PipelineConfig {
        let mut cfg = PipelineConfig::new(self.post, self.get).with_env_overrides();
        match (self.multireader, self.split_multireader) {
            (Some(n), _) => {
                cfg.producers = n as usize;
                cfg.reader = ReaderStrategy::InPlace;
            }
            (None, Some(n)) => {
                cfg.producers = n as usize;
                cfg.reader = ReaderStrategy::PreSplit;
            }
            (None, None) => {}
        }
        if self.combo_consumer {
            cfg.topology = ConsumerTopology::Combined;
        }
        cfg.threshold = self.threshold;
        cfg.on_read_error = match self.on_read_error {
            OnReadError::Absorb => ReadFailurePolicy::Absorb,
            OnReadError::Fail => ReadFailurePolicy::Fail,
        };
        cfg.on_malformed = match self.on_malformed {
            OnMalformed::Skip => MalformedLinePolicy::Skip,
            OnMalformed::AbortConsumer => MalformedLinePolicy::AbortConsumer,
        };
        cfg.output_dir = self.output_dir;
        cfg
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let stats_json = args.stats_json.clone();
    let cfg = args.into_config();
    info!(config = ?cfg, "reqstat starting");

    let output = reqstat::run(cfg)?;
    let summary = &output.summary;
    for pass in &summary.passes {
        info!(stats = %serde_json::to_string(pass).context("serialize pass stats")?, "pass stats");
    }
    if let Some(path) = stats_json {
        summary.write_json(&path)?;
        info!(path = %path.display(), "wrote run statistics");
    }
    println!("Elapsed: {}", format_seconds(Duration::from_millis(summary.elapsed_ms)));
    if summary.failed_reports > 0 {
        anyhow::bail!("{} report(s) failed to write", summary.failed_reports);
    }
    Ok(())
}
