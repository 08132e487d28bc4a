//! CSV report writers run once both passes are frozen.
//!
//! Tables are written with every field quoted and are followed by plain-text
//! summary lines. Reports over an empty map carry the header only.

use anyhow::{anyhow, Context, Result};
use csv::{QuoteStyle, Terminator};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::aggregate::{FrozenMap, FrozenWorkload};
use crate::bucket::{Bucket, LatencyBucket, ThroughputBucket};
use crate::config::PipelineConfig;
use crate::constants::{LATENCY_PERCENTILE, PEAK_LOW_PERCENTILE};
use crate::errors::ReqstatError;
use crate::io::{open_writer, report_path, report_stem};
use crate::pipeline::Workload;

/// One report to produce after both passes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Report {
    RequestResult { workload: Workload },
    Combined,
    Latency { workload: Workload },
    PeakPhase { threshold: u64 },
}

impl Report {
    /// Reports implied by a configuration, in submission order.
    pub fn plan(config: &PipelineConfig) -> Vec<Report> {
        let mut reports = vec![
            Report::RequestResult { workload: Workload::Write },
            Report::RequestResult { workload: Workload::Read },
            Report::Combined,
            Report::Latency { workload: Workload::Write },
            Report::Latency { workload: Workload::Read },
        ];
        if let Some(threshold) = config.threshold {
            reports.push(Report::PeakPhase { threshold });
        }
        reports
    }

    pub fn name(&self) -> String {
        match self {
            Report::RequestResult { workload } => format!("{}-result", workload),
            Report::Combined => "combined".to_string(),
            Report::Latency { workload } => format!("{}-latency", workload),
            Report::PeakPhase { .. } => "peak-phase".to_string(),
        }
    }

    pub fn destination(&self, config: &PipelineConfig) -> PathBuf {
        let out_dir = config.output_dir.as_deref();
        match self {
            Report::RequestResult { workload } => report_path(workload.input(config), "-result.csv", out_dir),
            Report::Latency { workload } => report_path(workload.input(config), "-latency.csv", out_dir),
            Report::PeakPhase { .. } => report_path(&config.write_path, "-peak.csv", out_dir),
            Report::Combined => {
                let stem = report_stem(&config.write_path);
                let prefix = stem.strip_suffix("POST").unwrap_or(&stem);
                let name = format!("{}combined.csv", prefix);
                match out_dir {
                    Some(dir) => dir.join(name),
                    None => config.write_path.with_file_name(name),
                }
            }
        }
    }

    pub fn write(&self, dest: &Path, write: &FrozenWorkload, read: &FrozenWorkload) -> Result<()> {
        let pick = |w: &Workload| match w {
            Workload::Write => write,
            Workload::Read => read,
        };
        let written = match self {
            Report::RequestResult { workload } => write_request_result(dest, &pick(workload).throughput),
            Report::Combined => write_combined(dest, &write.throughput, &read.throughput),
            Report::Latency { workload } => write_latency(dest, &pick(workload).latency),
            Report::PeakPhase { threshold } => write_peak_phase(dest, &write.throughput, *threshold),
        };
        written.map_err(|e| ReqstatError::ReportWrite { path: dest.to_path_buf(), reason: format!("{:#}", e) })?;
        info!(report = %self.name(), path = %dest.display(), "report written");
        Ok(())
    }
}

// ============== Summaries ==============

fn percentile_index(len: usize, nth: usize) -> usize {
    (len * nth / 100).min(len.saturating_sub(1))
}

fn sum_of_means<'a>(buckets: impl Iterator<Item = &'a ThroughputBucket>) -> i64 {
    buckets.map(|b| b.mean_latency()).sum()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSummary {
    pub test_length: i64,
    pub mean_latency: i64,
    pub p99_latency: i64,
    pub total_throughput: u64,
}

impl ResultSummary {
    pub fn from_map(map: &FrozenMap<ThroughputBucket>) -> Option<Self> {
        let (first, last) = (map.first_key()?, map.last_key()?);
        let size = map.len();
        let test_length = last - first;
        let mean_latency = sum_of_means(map.values()) / size as i64;
        let mut means: Vec<i64> = map.values().map(|b| b.mean_latency()).collect();
        means.sort_unstable();
        let p99_latency = means[percentile_index(size, LATENCY_PERCENTILE)];
        let total_throughput = map.total_count() / test_length.max(1) as u64;
        Some(Self { test_length, mean_latency, p99_latency, total_throughput })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeakPhase {
    pub buckets: Vec<ThroughputBucket>,
    pub duration: i64,
    pub mean_throughput: u64,
    pub highest: u64,
    pub p5_throughput: u64,
    pub mean_response: i64,
    pub p99_response: i64,
}

impl PeakPhase {
    /// Trims leading and trailing seconds below `threshold`; `None` if nothing reaches it.
    pub fn analyze(map: &FrozenMap<ThroughputBucket>, threshold: u64) -> Option<Self> {
        let all: Vec<&ThroughputBucket> = map.values().collect();
        let first = all.iter().position(|b| b.count() >= threshold)?;
        let last = all.iter().rposition(|b| b.count() >= threshold)?;
        let buckets: Vec<ThroughputBucket> = all[first..=last].iter().map(|b| (*b).clone()).collect();
        let size = buckets.len();
        let total: u64 = buckets.iter().map(|b| b.count()).sum();
        let mut counts: Vec<u64> = buckets.iter().map(|b| b.count()).collect();
        counts.sort_unstable();
        let mut means: Vec<i64> = buckets.iter().map(|b| b.mean_latency()).collect();
        means.sort_unstable();
        Some(Self {
            duration: buckets[size - 1].second() - buckets[0].second(),
            mean_throughput: total / size as u64,
            highest: counts[size - 1],
            p5_throughput: counts[percentile_index(size, PEAK_LOW_PERCENTILE)],
            mean_response: sum_of_means(buckets.iter()) / size as i64,
            p99_response: means[percentile_index(size, LATENCY_PERCENTILE)],
            buckets,
        })
    }
}

// ============== Writers ==============

fn table_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(csv::WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(open_writer(path)?))
}

fn finish_table(wtr: csv::Writer<BufWriter<File>>, path: &Path) -> Result<BufWriter<File>> {
    wtr.into_inner().map_err(|e| anyhow!("flush {}: {}", path.display(), e.error()))
}

fn write_throughput_rows<'a, W: Write>(
    wtr: &mut csv::Writer<W>,
    buckets: impl Iterator<Item = &'a ThroughputBucket>,
) -> csv::Result<()> {
    wtr.write_record(["Second", "Count", "Latency"])?;
    for b in buckets {
        wtr.write_record([b.second().to_string(), b.count().to_string(), b.mean_latency().to_string()])?;
    }
    Ok(())
}

pub fn write_request_result(path: &Path, map: &FrozenMap<ThroughputBucket>) -> Result<()> {
    let mut wtr = table_writer(path)?;
    write_throughput_rows(&mut wtr, map.values()).with_context(|| format!("write {}", path.display()))?;
    let mut out = finish_table(wtr, path)?;
    if let Some(s) = ResultSummary::from_map(map) {
        writeln!(out, "Test length: {}", s.test_length)?;
        writeln!(out, "Mean latency: {}", s.mean_latency)?;
        writeln!(out, "{}th percentile latency: {}", LATENCY_PERCENTILE, s.p99_latency)?;
        writeln!(out, "Total throughput: {}", s.total_throughput)?;
    }
    out.flush().with_context(|| format!("flush {}", path.display()))
}

pub fn write_combined(path: &Path, write: &FrozenMap<ThroughputBucket>, read: &FrozenMap<ThroughputBucket>) -> Result<()> {
    let mut wtr = table_writer(path)?;
    let mut total_requests: u64 = 0;
    let mut peak: u64 = 0;
    {
        let mut rows = || -> csv::Result<()> {
            wtr.write_record(["POST", "", "", "GET", "", "", "Total"])?;
            wtr.write_record(["Second", "Count", "Latency", "Second", "Count", "Latency", "Count"])?;
            for w in write.values() {
                let (read_cells, total) = match read.get(&w.key()) {
                    Some(r) => (
                        [r.second().to_string(), r.count().to_string(), r.mean_latency().to_string()],
                        w.count() + r.count(),
                    ),
                    None => ([String::new(), String::new(), String::new()], w.count()),
                };
                total_requests += total;
                peak = peak.max(total);
                let [rs, rc, rl] = read_cells;
                wtr.write_record([
                    w.second().to_string(),
                    w.count().to_string(),
                    w.mean_latency().to_string(),
                    rs,
                    rc,
                    rl,
                    total.to_string(),
                ])?;
            }
            Ok(())
        };
        rows().with_context(|| format!("write {}", path.display()))?;
    }
    let mut out = finish_table(wtr, path)?;
    if !write.is_empty() {
        writeln!(out, "Overall throughput: {}", total_requests / write.len() as u64)?;
        writeln!(out, "Peak throughput: {}", peak)?;
    }
    out.flush().with_context(|| format!("flush {}", path.display()))
}

pub fn write_latency(path: &Path, map: &FrozenMap<LatencyBucket>) -> Result<()> {
    let mut wtr = table_writer(path)?;
    let mut rows = || -> csv::Result<()> {
        wtr.write_record(["Latency", "Count"])?;
        for b in map.values() {
            wtr.write_record([b.latency().to_string(), b.count().to_string()])?;
        }
        Ok(())
    };
    rows().with_context(|| format!("write {}", path.display()))?;
    let mut out = finish_table(wtr, path)?;
    out.flush().with_context(|| format!("flush {}", path.display()))
}

pub fn write_peak_phase(path: &Path, map: &FrozenMap<ThroughputBucket>, threshold: u64) -> Result<()> {
    let peak = PeakPhase::analyze(map, threshold);
    let mut wtr = table_writer(path)?;
    let rows: Vec<&ThroughputBucket> = peak.as_ref().map(|p| p.buckets.iter().collect()).unwrap_or_default();
    write_throughput_rows(&mut wtr, rows.into_iter()).with_context(|| format!("write {}", path.display()))?;
    let mut out = finish_table(wtr, path)?;
    match peak {
        Some(p) => {
            writeln!(out, "The duration of the peak phase in seconds: {}", p.duration)?;
            writeln!(out, "The mean throughput: {}", p.mean_throughput)?;
            writeln!(out, "The highest interval requests/sec: {}", p.highest)?;
            writeln!(out, "{}th percentile value for the peak phase throughput: {}", PEAK_LOW_PERCENTILE, p.p5_throughput)?;
            writeln!(out, "The mean response time: {}", p.mean_response)?;
            writeln!(out, "{}th percentile response time: {}", LATENCY_PERCENTILE, p.p99_response)?;
        }
        None => writeln!(out, "No peak phase: no second reached {} requests", threshold)?,
    }
    out.flush().with_context(|| format!("flush {}", path.display()))
}
