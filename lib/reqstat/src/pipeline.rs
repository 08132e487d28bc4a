use anyhow::{Context, Result};
use crossbeam_channel as channel;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::aggregate::{Aggregates, FrozenWorkload};
use crate::config::{ConsumerTopology, PipelineConfig, ReadFailurePolicy, ReaderStrategy};
use crate::consumer::{Consumer, ConsumerKind, ConsumerReport};
use crate::errors::ReqstatError;
use crate::io::remove_files;
use crate::partition::{plan_ranges, probe_reference_timestamp, split_file, ByteRange};
use crate::pool::{CountdownLatch, WorkerPool};
use crate::producer::{Line, LineSink, Producer, ProducerReport};
use crate::stats::{PassStats, RunSummary};
use crate::timer::{format_seconds, Stopwatch};
use crate::writer::Report;

/// The two request streams processed per run, in pass order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    Write,
    Read,
}

impl Workload {
    pub const PASSES: [Workload; 2] = [Workload::Write, Workload::Read];

    pub fn input(self, config: &PipelineConfig) -> &Path {
        match self {
            Workload::Write => &config.write_path,
            Workload::Read => &config.read_path,
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Workload::Write => "POST",
            Workload::Read => "GET",
        })
    }
}

/// Frozen maps of both passes plus run statistics.
pub struct RunOutput {
    pub write: FrozenWorkload,
    pub read: FrozenWorkload,
    pub summary: RunSummary,
}

impl RunOutput {
    pub fn workload(&self, workload: Workload) -> &FrozenWorkload {
        match workload {
            Workload::Write => &self.write,
            Workload::Read => &self.read,
        }
    }
}

/// Per-pass bookkeeping filled in by workers.
#[derive(Default)]
struct PassLedger {
    producers: Vec<ProducerReport>,
    range_failures: Vec<ReqstatError>,
    consumers: Vec<ConsumerReport>,
}

/// Drives the write pass, then the read pass, then reporting, on one shared pool.
pub struct Orchestrator {
    config: PipelineConfig,
    pool: WorkerPool,
    aggregates: Arc<Aggregates>,
    timer: Stopwatch,
}

impl Orchestrator {
    /// Validates the configuration and starts the pool. Nothing is read yet.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.pool_size()).context("start worker pool")?;
        info!(threads = pool.capacity(), producers = config.producers, consumers = config.consumers_per_pass(), "worker pool started");
        Ok(Self { config, pool, aggregates: Arc::new(Aggregates::new()), timer: Stopwatch::start() })
    }

    pub fn config(&self) -> &PipelineConfig { &self.config }

    /// Runs both passes without reporting and returns the frozen maps.
    pub fn ingest(&mut self) -> Result<(FrozenWorkload, FrozenWorkload, Vec<PassStats>)> {
        let mut passes = Vec::with_capacity(Workload::PASSES.len());
        for workload in Workload::PASSES {
            passes.push(self.run_pass(workload)?);
        }
        let write = self.aggregates.workload(Workload::Write).freeze();
        let read = self.aggregates.workload(Workload::Read).freeze();
        Ok((write, read, passes))
    }

    /// Full run: both passes, every report, then waits for the pool to drain.
    pub fn run(mut self) -> Result<RunOutput> {
        let (write, read, passes) = self.ingest()?;
        let (reports, failed_reports) = self.report(&write, &read);
        let Orchestrator { pool, mut timer, .. } = self;
        pool.shutdown();
        timer.pause();
        let elapsed = timer.elapsed();
        info!(elapsed = %format_seconds(elapsed), reports = reports.len(), failed_reports, "run complete");
        let summary = RunSummary { passes, reports, failed_reports, elapsed_ms: elapsed.as_millis() as u64 };
        Ok(RunOutput { write, read, summary })
    }

    /// Submits one task per report and blocks until all of them finished.
    fn report(&self, write: &FrozenWorkload, read: &FrozenWorkload) -> (Vec<PathBuf>, usize) {
        let reports = Report::plan(&self.config);
        let done = Arc::new(CountdownLatch::new(reports.len()));
        let written: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
        let failed = Arc::new(Mutex::new(0usize));
        let write = Arc::new(write.clone());
        let read = Arc::new(read.clone());
        for report in reports {
            let dest = report.destination(&self.config);
            let (done, written, failed) = (Arc::clone(&done), Arc::clone(&written), Arc::clone(&failed));
            let (write, read) = (Arc::clone(&write), Arc::clone(&read));
            self.pool.submit(report.name(), move || {
                let _arrive = done.arrive_on_drop();
                match report.write(&dest, &write, &read) {
                    Ok(()) => written.lock().push(dest),
                    Err(e) => {
                        error!(report = %report.name(), "report failed: {:#}", e);
                        *failed.lock() += 1;
                    }
                }
            });
        }
        done.wait();
        let mut written = std::mem::take(&mut *written.lock());
        written.sort();
        let failed = *failed.lock();
        (written, failed)
    }

    /// One ingest-and-aggregate pass; returns once every consumer has released the barrier.
    pub fn run_pass(&mut self, workload: Workload) -> Result<PassStats> {
        let pass_start = Instant::now();
        let path = workload.input(&self.config).to_path_buf();
        let producers = self.config.producers;
        let consumers = self.config.consumers_per_pass();
        let reference = probe_reference_timestamp(&path)?;
        info!(phase = "pass_start", workload = %workload, path = %path.display(), producers, consumers, reference_ms = ?reference, "starting pass");

        // (path, range) per producer
        let mut split_ms = 0u64;
        let mut segments: Vec<PathBuf> = Vec::new();
        let sources: Vec<(PathBuf, ByteRange)> = if producers == 1 {
            let len = std::fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?.len();
            vec![(path.clone(), ByteRange::new(0, len))]
        } else {
            let ranges = plan_ranges(&path, producers)?;
            match self.config.reader {
                ReaderStrategy::InPlace => ranges.into_iter().map(|r| (path.clone(), r)).collect(),
                ReaderStrategy::PreSplit => {
                    let split_start = Instant::now();
                    let out_dir = self.config.output_dir.clone();
                    segments = self.timer.excluding(|| split_file(&path, &ranges, out_dir.as_deref()))?;
                    split_ms = split_start.elapsed().as_millis() as u64;
                    segments.iter().zip(&ranges).map(|(seg, r)| (seg.clone(), ByteRange::new(0, r.len()))).collect()
                }
            }
        };

        let producers_done = Arc::new(CountdownLatch::new(sources.len()));
        let consumers_done = Arc::new(CountdownLatch::new(consumers));
        // Counts down after each worker has filed its report in the ledger.
        let filed = Arc::new(CountdownLatch::new(sources.len() + consumers));
        let ledger = Arc::new(Mutex::new(PassLedger::default()));
        let cap = self.config.queue_capacity;

        let (sink, queues): (LineSink, Vec<(ConsumerKind, channel::Receiver<Line>)>) = match self.config.topology {
            ConsumerTopology::Specialized => {
                let (t_tx, t_rx) = channel::bounded(cap);
                let (l_tx, l_rx) = channel::bounded(cap);
                let queues = (0..consumers / 2)
                    .flat_map(|_| [(ConsumerKind::Throughput, t_rx.clone()), (ConsumerKind::Latency, l_rx.clone())])
                    .collect();
                (LineSink::Dual { throughput: t_tx, latency: l_tx }, queues)
            }
            ConsumerTopology::Combined => {
                let (tx, rx) = channel::bounded(cap);
                (LineSink::Single(tx), (0..consumers).map(|_| (ConsumerKind::Combined, rx.clone())).collect())
            }
        };

        let on_read_error = self.config.on_read_error;
        for (i, (src, range)) in sources.iter().enumerate() {
            let producer = Producer {
                path: src.clone(),
                range: *range,
                sink: sink.clone(),
                chunk_bytes: self.config.read_chunk_bytes,
                done: Arc::clone(&producers_done),
            };
            let (ledger, filed) = (Arc::clone(&ledger), Arc::clone(&filed));
            self.pool.submit(format!("{}-producer-{}", workload, i), move || {
                let _filed = filed.arrive_on_drop();
                match producer.run() {
                    Ok(report) => ledger.lock().producers.push(report),
                    Err(e) => {
                        error!(workload = %workload, policy = ?on_read_error, "producer abandoned its range: {}", e);
                        ledger.lock().range_failures.push(e);
                    }
                }
            });
        }
        // Only producers hold senders from here on.
        drop(sink);

        for (i, (kind, queue)) in queues.into_iter().enumerate() {
            let consumer = Consumer {
                kind,
                queue,
                aggregates: Arc::clone(&self.aggregates),
                workload,
                reference_ms: reference.unwrap_or(0),
                producers_done: Arc::clone(&producers_done),
                done: Arc::clone(&consumers_done),
                policy: self.config.on_malformed,
            };
            let (ledger, filed) = (Arc::clone(&ledger), Arc::clone(&filed));
            self.pool.submit(format!("{}-consumer-{}", workload, i), move || {
                let _filed = filed.arrive_on_drop();
                let report = consumer.run();
                ledger.lock().consumers.push(report);
            });
        }

        consumers_done.wait();
        info!(phase = "barrier_release", workload = %workload, "consumer barrier released");
        filed.wait();

        if !segments.is_empty() && !self.config.keep_segments {
            remove_files(&segments);
        }

        let maps = self.aggregates.workload(workload);
        let ledger = std::mem::take(&mut *ledger.lock());
        let stats = PassStats {
            workload: Some(workload),
            path: path.clone(),
            reference_ms: reference,
            producers: sources.len(),
            consumers,
            ranges: sources.len(),
            lines_emitted: ledger.producers.iter().map(|p| p.lines).sum(),
            bytes_read: ledger.producers.iter().map(|p| p.bytes).sum(),
            records: ledger.consumers.iter().map(|c| c.records).sum(),
            malformed: ledger.consumers.iter().map(|c| c.malformed).sum(),
            aborted_ranges: ledger.range_failures.len(),
            aborted_consumers: ledger.consumers.iter().filter(|c| c.aborted).count(),
            throughput_buckets: maps.throughput.len(),
            latency_buckets: maps.latency.len(),
            split_ms,
            wall_ms: pass_start.elapsed().as_millis() as u64,
        };
        info!(phase = "pass", workload = %workload,
              producers = stats.producers, consumers = stats.consumers,
              lines = stats.lines_emitted, records = stats.records, malformed = stats.malformed,
              aborted_ranges = stats.aborted_ranges,
              throughput_buckets = stats.throughput_buckets, latency_buckets = stats.latency_buckets,
              wall_ms = stats.wall_ms,
              "pass complete");

        if on_read_error == ReadFailurePolicy::Fail {
            if let Some(first) = ledger.range_failures.into_iter().next() {
                return Err(anyhow::Error::new(first).context(format!("{} pass failed", workload)));
            }
        }
        Ok(stats)
    }
}

/// Convenience entry point: validate, ingest both workloads, write every report.
pub fn run(config: PipelineConfig) -> Result<RunOutput> {
    Orchestrator::new(config)?.run()
}
