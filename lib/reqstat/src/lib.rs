pub mod aggregate;
pub mod bucket;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod errors;
pub mod io;
pub mod partition;
pub mod pipeline;
pub mod pool;
pub mod producer;
pub mod record;
pub mod stats;
pub mod timer;
pub mod utils;
pub mod writer;

pub use aggregate::{AggregationMap, Aggregates, FrozenMap, FrozenWorkload};
pub use bucket::{Bucket, LatencyBucket, ThroughputBucket};
pub use config::{ConsumerTopology, PipelineConfig, ReadFailurePolicy, ReaderStrategy};
pub use consumer::MalformedLinePolicy;
pub use errors::ReqstatError;
pub use pipeline::{run, Orchestrator, RunOutput, Workload};
pub use stats::{PassStats, RunSummary};
