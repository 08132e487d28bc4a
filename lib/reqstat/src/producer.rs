use crossbeam_channel as channel;
use memchr::memchr;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{ReqstatError, Result};
use crate::partition::{trim_line_end, ByteRange};
use crate::pool::CountdownLatch;

/// One raw log line, terminator stripped.
pub type Line = Vec<u8>;

/// Where a producer delivers its lines.
#[derive(Clone)]
pub enum LineSink {
    /// Every line goes to one queue, drained by combined consumers.
    Single(channel::Sender<Line>),
    /// Every line is copied to both queues, one per specialized consumer kind.
    Dual { throughput: channel::Sender<Line>, latency: channel::Sender<Line> },
}

impl LineSink {
    /// Blocks while a destination queue is full. Fails once every receiver is gone.
    pub fn emit(&self, line: Line) -> std::result::Result<(), channel::SendError<Line>> {
        match self {
            LineSink::Single(tx) => tx.send(line),
            LineSink::Dual { throughput, latency } => {
                throughput.send(line.clone())?;
                latency.send(line)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProducerReport {
    pub lines: u64,
    pub bytes: u64,
}

/// Streams the complete lines of one byte range of a file into a [`LineSink`].
pub struct Producer {
    pub path: PathBuf,
    pub range: ByteRange,
    pub sink: LineSink,
    pub chunk_bytes: usize,
    pub done: Arc<CountdownLatch>,
}

impl Producer {
    /// Reads the range and counts `done` down exactly once on return, success or failure.
    ///
    /// On error the rest of the range is abandoned; lines already emitted stay emitted.
    pub fn run(self) -> Result<ProducerReport> {
        let _arrive = self.done.arrive_on_drop();
        let report = self.read_range()?;
        debug!(path = %self.path.display(), begin = self.range.begin, end = self.range.end, lines = report.lines, "producer finished range");
        Ok(report)
    }

    fn read_range(&self) -> Result<ProducerReport> {
        let ByteRange { begin, end } = self.range;
        let range_err = |source: std::io::Error| ReqstatError::RangeRead { path: self.path.clone(), begin, end, source };

        let mut file = File::open(&self.path).map_err(range_err)?;
        file.seek(SeekFrom::Start(begin)).map_err(range_err)?;

        let mut buf = vec![0u8; self.chunk_bytes.max(1)];
        let mut line: Line = Vec::with_capacity(256);
        let mut report = ProducerReport::default();
        let mut pos = begin;
        while pos < end {
            let want = (buf.len() as u64).min(end - pos) as usize;
            let n = match file.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(range_err(e)),
            };
            pos += n as u64;
            report.bytes += n as u64;
            let mut chunk = &buf[..n];
            while let Some(i) = memchr(b'\n', chunk) {
                line.extend_from_slice(&chunk[..i]);
                self.emit(&mut line, &mut report)?;
                chunk = &chunk[i + 1..];
            }
            line.extend_from_slice(chunk);
        }
        // unterminated last line of the file
        self.emit(&mut line, &mut report)?;
        Ok(report)
    }

    fn emit(&self, line: &mut Line, report: &mut ProducerReport) -> Result<()> {
        let len = trim_line_end(line).len();
        line.truncate(len);
        if line.is_empty() {
            return Ok(());
        }
        let out = std::mem::replace(line, Vec::with_capacity(len.max(64)));
        self.sink.emit(out).map_err(|_| ReqstatError::QueueClosed { path: self.path.clone() })?;
        report.lines += 1;
        Ok(())
    }
}
