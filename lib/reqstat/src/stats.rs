use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::pipeline::Workload;

#[derive(Default, Clone, Debug, Serialize)]
pub struct PassStats {
    pub workload: Option<Workload>,
    pub path: PathBuf,
    pub reference_ms: Option<i64>,
    pub producers: usize,
    pub consumers: usize,
    pub ranges: usize,
    pub lines_emitted: u64,
    pub bytes_read: u64,
    pub records: u64,
    pub malformed: u64,
    pub aborted_ranges: usize,
    pub aborted_consumers: usize,
    pub throughput_buckets: usize,
    pub latency_buckets: usize,
    pub split_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct RunSummary {
    pub passes: Vec<PassStats>,
    pub reports: Vec<PathBuf>,
    pub failed_reports: usize,
    /// Wall clock with the physical split excluded.
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn pass(&self, workload: Workload) -> Option<&PassStats> {
        self.passes.iter().find(|p| p.workload == Some(workload))
    }

    pub fn total_records(&self) -> u64 { self.passes.iter().map(|p| p.records).sum() }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut w = crate::io::open_writer(path)?;
        serde_json::to_writer_pretty(&mut w, self).with_context(|| format!("write stats {}", path.display()))?;
        w.flush().with_context(|| format!("flush stats {}", path.display()))
    }
}
