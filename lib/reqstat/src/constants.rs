//! Centralized environment variable names and default values for reqstat tuning.

// Environment variable names
pub const ENV_QUEUE_CAP: &str = "REQSTAT_QUEUE_CAP";
pub const ENV_READ_CHUNK_BYTES: &str = "REQSTAT_READ_CHUNK_BYTES";
pub const ENV_POOL_THREADS: &str = "REQSTAT_POOL_THREADS";
pub const ENV_KEEP_SEGMENTS: &str = "REQSTAT_KEEP_SEGMENTS";

// Defaults
/// Lines buffered per work queue before producers block.
pub const DEFAULT_QUEUE_CAP: usize = 50_000;
pub const DEFAULT_READ_CHUNK_BYTES: usize = 64 * 1024;
pub const DEFAULT_PRODUCERS: usize = 1;

/// Milliseconds per throughput bucket.
pub const UNIT_MS: i64 = 1000;

/// Field positions inside one access log line.
pub const FIELD_TIMESTAMP: usize = 0;
pub const FIELD_METHOD: usize = 1;
pub const FIELD_LATENCY: usize = 2;

/// Percentiles reported by the result and peak-phase writers.
pub const LATENCY_PERCENTILE: usize = 99;
pub const PEAK_LOW_PERCENTILE: usize = 5;

/// Malformed lines logged verbatim per consumer before only counting.
pub const MALFORMED_LOG_LIMIT: u64 = 5;
