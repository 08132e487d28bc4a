use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::constants::{
    DEFAULT_PRODUCERS, DEFAULT_QUEUE_CAP, DEFAULT_READ_CHUNK_BYTES, ENV_KEEP_SEGMENTS, ENV_POOL_THREADS,
    ENV_QUEUE_CAP, ENV_READ_CHUNK_BYTES,
};
use crate::consumer::MalformedLinePolicy;
use crate::errors::{ReqstatError, Result};
use crate::utils::{available_threads, env_parse_or, env_var_truthy};

/// How producers get at the input when more than one producer is configured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderStrategy {
    /// Every producer reads its own range of the one input file.
    #[default]
    InPlace,
    /// Ranges are first written out as segment files, one per producer.
    PreSplit,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsumerTopology {
    /// Paired throughput and latency consumers, each on its own queue.
    #[default]
    Specialized,
    /// Consumers that update both maps from one shared queue.
    Combined,
}

/// What a producer's I/O failure does to its pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadFailurePolicy {
    /// Log it and lose the rest of that range.
    #[default]
    Absorb,
    /// Let the pass drain, then fail it.
    Fail,
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineConfig {
    pub write_path: PathBuf,
    pub read_path: PathBuf,
    pub producers: usize,
    pub reader: ReaderStrategy,
    pub topology: ConsumerTopology,
    pub threshold: Option<u64>,
    pub queue_capacity: usize,
    pub read_chunk_bytes: usize,
    pub pool_threads: usize,
    pub on_read_error: ReadFailurePolicy,
    pub on_malformed: MalformedLinePolicy,
    pub output_dir: Option<PathBuf>,
    pub keep_segments: bool,
}

impl PipelineConfig {
    pub fn new(write_path: impl Into<PathBuf>, read_path: impl Into<PathBuf>) -> Self {
        Self {
            write_path: write_path.into(),
            read_path: read_path.into(),
            producers: DEFAULT_PRODUCERS,
            reader: ReaderStrategy::default(),
            topology: ConsumerTopology::default(),
            threshold: None,
            queue_capacity: DEFAULT_QUEUE_CAP,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            pool_threads: available_threads(),
            on_read_error: ReadFailurePolicy::default(),
            on_malformed: MalformedLinePolicy::default(),
            output_dir: None,
            keep_segments: false,
        }
    }

    /// Applies the `REQSTAT_*` tuning variables on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        self.queue_capacity = env_parse_or(ENV_QUEUE_CAP, self.queue_capacity);
        self.read_chunk_bytes = env_parse_or(ENV_READ_CHUNK_BYTES, self.read_chunk_bytes);
        self.pool_threads = env_parse_or(ENV_POOL_THREADS, self.pool_threads);
        self.keep_segments = self.keep_segments || env_var_truthy(ENV_KEEP_SEGMENTS);
        self
    }

    /// Consumers launched per pass. The pool is sized so producers and consumers all run at once.
    pub fn consumers_per_pass(&self) -> usize {
        let slots = self.pool_threads.saturating_sub(self.producers);
        match self.topology {
            ConsumerTopology::Specialized => (slots / 2).max(1) * 2,
            ConsumerTopology::Combined => slots.max(1),
        }
    }

    /// Worker threads needed for one pass: every producer plus every consumer.
    pub fn pool_size(&self) -> usize {
        self.pool_threads.max(self.producers + self.consumers_per_pass())
    }

    pub fn validate(&self) -> Result<()> {
        if self.producers == 0 {
            return Err(ReqstatError::invalid("producers", "must be >= 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ReqstatError::invalid("queue_capacity", "must be >= 1"));
        }
        if self.read_chunk_bytes == 0 {
            return Err(ReqstatError::invalid("read_chunk_bytes", "must be >= 1"));
        }
        if self.pool_threads == 0 {
            return Err(ReqstatError::invalid("pool_threads", "must be >= 1"));
        }
        if self.threshold == Some(0) {
            return Err(ReqstatError::invalid("threshold", "must be >= 1"));
        }
        validate_input(&self.write_path)?;
        validate_input(&self.read_path)?;
        Ok(())
    }
}

fn csv_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w-]+\.csv$").expect("static regex"))
}

/// Accepts an existing regular file whose name is word characters or dashes ending in `.csv`.
pub fn validate_input(path: &Path) -> Result<()> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    if !csv_name_re().is_match(&name) {
        return Err(ReqstatError::UnsupportedInput {
            path: path.to_path_buf(),
            reason: "expected a name like requests-POSTraw.csv".into(),
        });
    }
    if !path.is_file() {
        return Err(ReqstatError::MissingInput { path: path.to_path_buf() });
    }
    Ok(())
}
