use crossbeam_channel::{self as channel, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

use crate::aggregate::{Aggregates, WorkloadMaps};
use crate::constants::MALFORMED_LOG_LIMIT;
use crate::pipeline::Workload;
use crate::pool::CountdownLatch;
use crate::producer::Line;
use crate::record::{bucket_second, parse_line, Record};

/// Which maps a consumer updates per record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConsumerKind {
    Throughput,
    Latency,
    Combined,
}

impl ConsumerKind {
    pub fn consume(self, maps: &WorkloadMaps, record: &Record<'_>, reference_ms: i64) {
        match self {
            ConsumerKind::Throughput => {
                maps.throughput.record(bucket_second(record.timestamp_ms, reference_ms), record.latency_ms)
            }
            ConsumerKind::Latency => maps.latency.record(record.latency_ms, record.latency_ms),
            ConsumerKind::Combined => {
                maps.throughput.record(bucket_second(record.timestamp_ms, reference_ms), record.latency_ms);
                maps.latency.record(record.latency_ms, record.latency_ms);
            }
        }
    }
}

/// What a consumer does with a line it cannot parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedLinePolicy {
    /// Count it and keep going.
    #[default]
    Skip,
    /// Stop this consumer; siblings keep draining the queue.
    AbortConsumer,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ConsumerReport {
    pub records: u64,
    pub malformed: u64,
    pub aborted: bool,
}

/// Drains one queue into the maps of one workload.
pub struct Consumer {
    pub kind: ConsumerKind,
    pub queue: channel::Receiver<Line>,
    pub aggregates: Arc<Aggregates>,
    pub workload: Workload,
    pub reference_ms: i64,
    pub producers_done: Arc<CountdownLatch>,
    pub done: Arc<CountdownLatch>,
    pub policy: MalformedLinePolicy,
}

impl Consumer {
    /// Polls until the queue is empty after every producer has finished, then counts `done` down once.
    pub fn run(self) -> ConsumerReport {
        let _arrive = self.done.arrive_on_drop();
        let maps = self.aggregates.workload(self.workload);
        let mut report = ConsumerReport::default();
        loop {
            match self.queue.try_recv() {
                Ok(line) => match parse_line(&line) {
                    Ok(record) => {
                        self.kind.consume(maps, &record, self.reference_ms);
                        report.records += 1;
                    }
                    Err(e) => {
                        report.malformed += 1;
                        if report.malformed <= MALFORMED_LOG_LIMIT {
                            warn!(kind = ?self.kind, workload = %self.workload, "{}", e);
                        }
                        if self.policy == MalformedLinePolicy::AbortConsumer {
                            error!(kind = ?self.kind, workload = %self.workload, "consumer aborting on malformed line");
                            report.aborted = true;
                            break;
                        }
                    }
                },
                Err(TryRecvError::Empty) => {
                    // Barrier before emptiness: once it reads zero no producer can enqueue again.
                    if self.producers_done.is_released() && self.queue.is_empty() {
                        break;
                    }
                    thread::yield_now();
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        debug!(kind = ?self.kind, workload = %self.workload, records = report.records, malformed = report.malformed, "consumer finished");
        report
    }
}
