use reqstat::{
    run, Bucket, ConsumerTopology, FrozenWorkload, MalformedLinePolicy, Orchestrator, PipelineConfig, ReadFailurePolicy,
    ReaderStrategy, ReqstatError, Workload,
};
use rstest::rstest;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn log_lines(method: &str, rows: &[(i64, i32)]) -> String {
    let mut s = String::new();
    for (ts, latency) in rows {
        writeln!(s, "\"{}\",\"{}\",\"{}\",\"200\"", ts, method, latency).unwrap();
    }
    s
}

/// Deterministic log: timestamps advance 0..=3 ms per line, latencies cycle through 1..=250.
fn synthetic(method: &str, lines: usize) -> String {
    let mut ts = 1_700_000_000_123i64;
    let rows: Vec<(i64, i32)> = (0..lines)
        .map(|i| {
            ts += (i % 4) as i64;
            (ts, (i * 37 % 250) as i32 + 1)
        })
        .collect();
    log_lines(method, &rows)
}

fn inputs(post: &str, get: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let post_path = dir.path().join("runPOSTraw.csv");
    let get_path = dir.path().join("runGETraw.csv");
    std::fs::write(&post_path, post).unwrap();
    std::fs::write(&get_path, get).unwrap();
    (dir, post_path, get_path)
}

fn config(post: &Path, get: &Path, producers: usize, reader: ReaderStrategy, topology: ConsumerTopology) -> PipelineConfig {
    let mut cfg = PipelineConfig::new(post, get);
    cfg.producers = producers;
    cfg.reader = reader;
    cfg.topology = topology;
    cfg.pool_threads = 4;
    cfg.queue_capacity = 64;
    cfg.read_chunk_bytes = 97;
    cfg
}

fn ingest(cfg: PipelineConfig) -> (FrozenWorkload, FrozenWorkload) {
    let mut orchestrator = Orchestrator::new(cfg).unwrap();
    let (write, read, _) = orchestrator.ingest().unwrap();
    (write, read)
}

const EXAMPLE: &[(i64, i32)] = &[(1000, 50), (1000, 60), (2000, 40), (2000, 70), (3000, 30)];

#[test]
fn worked_example_buckets() {
    let (_dir, post, get) = inputs(&log_lines("POST", &[(1000, 10)]), &log_lines("GET", EXAMPLE));
    let (_, read) = ingest(config(&post, &get, 1, ReaderStrategy::InPlace, ConsumerTopology::Specialized));

    let seconds: Vec<(i64, u64, i64)> =
        read.throughput.values().map(|b| (b.second(), b.count(), b.mean_latency())).collect();
    assert_eq!(seconds, vec![(1, 2, 55), (2, 2, 55), (3, 1, 30)]);
    let latencies: Vec<(i32, u64)> = read.latency.values().map(|b| (b.latency(), b.count())).collect();
    assert_eq!(latencies, vec![(30, 1), (40, 1), (50, 1), (60, 1), (70, 1)]);
}

#[rstest]
fn every_line_counted_once(
    #[values(1, 2, 4, 8)] producers: usize,
    #[values(ReaderStrategy::InPlace, ReaderStrategy::PreSplit)] reader: ReaderStrategy,
    #[values(ConsumerTopology::Specialized, ConsumerTopology::Combined)] topology: ConsumerTopology,
) {
    let (_dir, post, get) = inputs(&synthetic("POST", 1_500), &synthetic("GET", 700));
    let (write, read) = ingest(config(&post, &get, producers, reader, topology));
    assert_eq!(write.throughput.total_count(), 1_500);
    assert_eq!(write.latency.total_count(), 1_500);
    assert_eq!(read.throughput.total_count(), 700);
    assert_eq!(read.latency.total_count(), 700);
}

#[rstest]
fn results_do_not_depend_on_producer_count(
    #[values(ConsumerTopology::Specialized, ConsumerTopology::Combined)] topology: ConsumerTopology,
) {
    let (_dir, post, get) = inputs(&synthetic("POST", 10_000), &synthetic("GET", 10_000));
    let (base_write, base_read) = ingest(config(&post, &get, 1, ReaderStrategy::InPlace, topology));
    for producers in [2, 4, 8] {
        let (write, read) = ingest(config(&post, &get, producers, ReaderStrategy::InPlace, topology));
        assert_eq!(write.contents(), base_write.contents(), "{} producers", producers);
        assert_eq!(read.contents(), base_read.contents(), "{} producers", producers);
    }
}

#[test]
fn results_do_not_depend_on_topology_or_reader() {
    let (_dir, post, get) = inputs(&synthetic("POST", 10_000), &synthetic("GET", 10_000));
    let (base_write, base_read) = ingest(config(&post, &get, 4, ReaderStrategy::InPlace, ConsumerTopology::Specialized));
    for (reader, topology) in [
        (ReaderStrategy::InPlace, ConsumerTopology::Combined),
        (ReaderStrategy::PreSplit, ConsumerTopology::Specialized),
        (ReaderStrategy::PreSplit, ConsumerTopology::Combined),
    ] {
        let (write, read) = ingest(config(&post, &get, 4, reader, topology));
        assert_eq!(write.contents(), base_write.contents(), "{:?} {:?}", reader, topology);
        assert_eq!(read.contents(), base_read.contents(), "{:?} {:?}", reader, topology);
    }
}

#[test]
fn split_segments_are_removed_after_the_pass() {
    let (dir, post, get) = inputs(&synthetic("POST", 200), &synthetic("GET", 200));
    ingest(config(&post, &get, 3, ReaderStrategy::PreSplit, ConsumerTopology::Specialized));
    for i in 0..3 {
        assert!(!dir.path().join(format!("runPOSTraw{}.csv", i)).exists());
        assert!(!dir.path().join(format!("runGETraw{}.csv", i)).exists());
    }
}

#[test]
fn kept_segments_stay_on_disk() {
    let (dir, post, get) = inputs(&synthetic("POST", 200), &synthetic("GET", 200));
    let mut cfg = config(&post, &get, 2, ReaderStrategy::PreSplit, ConsumerTopology::Combined);
    cfg.keep_segments = true;
    ingest(cfg);
    let joined: String = (0..2)
        .map(|i| std::fs::read_to_string(dir.path().join(format!("runPOSTraw{}.csv", i))).unwrap())
        .collect();
    assert_eq!(joined, synthetic("POST", 200));
}

#[test]
fn full_run_writes_every_report() {
    let (dir, post, get) = inputs(&log_lines("POST", EXAMPLE), &log_lines("GET", EXAMPLE));
    let out = dir.path().join("reports");
    let mut cfg = config(&post, &get, 2, ReaderStrategy::InPlace, ConsumerTopology::Specialized);
    cfg.threshold = Some(2);
    cfg.output_dir = Some(out.clone());
    let output = run(cfg).unwrap();

    let mut expected: Vec<PathBuf> = [
        "runPOST-result.csv",
        "runGET-result.csv",
        "runcombined.csv",
        "runPOST-latency.csv",
        "runGET-latency.csv",
        "runPOST-peak.csv",
    ]
    .iter()
    .map(|n| out.join(n))
    .collect();
    expected.sort();
    assert_eq!(output.summary.reports, expected);
    assert_eq!(output.summary.failed_reports, 0);

    let combined = std::fs::read_to_string(out.join("runcombined.csv")).unwrap();
    let lines: Vec<&str> = combined.lines().collect();
    assert_eq!(lines[2], "\"1\",\"2\",\"55\",\"1\",\"2\",\"55\",\"4\"");
    assert_eq!(lines.last().copied(), Some("Peak throughput: 4"));

    let peak = std::fs::read_to_string(out.join("runPOST-peak.csv")).unwrap();
    assert!(peak.contains("The duration of the peak phase in seconds: 1"));

    let write = output.summary.pass(Workload::Write).unwrap();
    assert_eq!(write.lines_emitted, 5);
    assert_eq!(write.reference_ms, Some(1000));
    assert_eq!(output.workload(Workload::Read).latency.total_count(), 5);
}

#[test]
fn missing_input_fails_before_any_pass() {
    let (dir, post, _get) = inputs("", "");
    let cfg = PipelineConfig::new(post, dir.path().join("absentGETraw.csv"));
    let err = Orchestrator::new(cfg).err().unwrap();
    assert!(matches!(err.downcast_ref::<ReqstatError>(), Some(ReqstatError::MissingInput { .. })));
}

#[test]
fn header_line_is_skipped() {
    let post = format!("\"timestamp\",\"method\",\"latency\",\"status\"\n{}", log_lines("POST", EXAMPLE));
    let (_dir, post, get) = inputs(&post, &log_lines("GET", EXAMPLE));
    let mut orchestrator = Orchestrator::new(config(&post, &get, 2, ReaderStrategy::InPlace, ConsumerTopology::Combined)).unwrap();
    let (write, read, passes) = orchestrator.ingest().unwrap();
    assert_eq!(write.contents(), read.contents());
    assert_eq!(passes[0].reference_ms, Some(1000));
    assert_eq!(passes[0].malformed, 1);
}

#[test]
fn garbage_after_header_does_not_abort_the_pass() {
    let post = format!(
        "\"timestamp\",\"method\",\"latency\",\"status\"\n\"oops\",\"m\",\"1\"\n{}",
        log_lines("POST", EXAMPLE)
    );
    let (_dir, post, get) = inputs(&post, &log_lines("GET", EXAMPLE));
    let mut cfg = config(&post, &get, 1, ReaderStrategy::InPlace, ConsumerTopology::Combined);
    cfg.on_malformed = MalformedLinePolicy::Skip;
    let mut orchestrator = Orchestrator::new(cfg).unwrap();
    let (write, read, passes) = orchestrator.ingest().unwrap();
    assert_eq!(write.contents(), read.contents());
    assert_eq!(passes[0].reference_ms, Some(1000));
    assert_eq!(passes[0].malformed, 2);
}

#[test]
fn empty_input_gives_empty_pass() {
    let (dir, post, get) = inputs("", &log_lines("GET", EXAMPLE));
    let mut cfg = config(&post, &get, 4, ReaderStrategy::InPlace, ConsumerTopology::Specialized);
    cfg.output_dir = Some(dir.path().to_path_buf());
    let output = run(cfg).unwrap();
    assert!(output.write.throughput.is_empty());
    assert_eq!(output.read.throughput.len(), 3);
    assert_eq!(output.summary.pass(Workload::Write).unwrap().reference_ms, None);
    let result = std::fs::read_to_string(dir.path().join("runPOST-result.csv")).unwrap();
    assert_eq!(result, "\"Second\",\"Count\",\"Latency\"\n");
}

#[test]
fn malformed_lines_are_skipped_by_default() {
    let post = format!("{}garbage line\n\"1000\",\"POST\",\"oops\"\n", log_lines("POST", EXAMPLE));
    let (_dir, post, get) = inputs(&post, &log_lines("GET", EXAMPLE));
    let mut cfg = config(&post, &get, 1, ReaderStrategy::InPlace, ConsumerTopology::Combined);
    cfg.on_malformed = MalformedLinePolicy::Skip;
    let mut orchestrator = Orchestrator::new(cfg).unwrap();
    let (write, _, passes) = orchestrator.ingest().unwrap();
    assert_eq!(write.throughput.total_count(), 5);
    assert_eq!(passes[0].malformed, 2);
    assert_eq!(passes[0].aborted_consumers, 0);
}

#[test]
fn fail_policy_turns_closed_queue_into_pass_error() {
    // The lone consumer aborts on the first line, so the producer loses its queue.
    let post = format!("garbage\n{}", synthetic("POST", 500));
    let (_dir, post, get) = inputs(&post, &log_lines("GET", EXAMPLE));
    let mut cfg = config(&post, &get, 1, ReaderStrategy::InPlace, ConsumerTopology::Combined);
    cfg.pool_threads = 2;
    cfg.queue_capacity = 1;
    cfg.on_malformed = MalformedLinePolicy::AbortConsumer;
    cfg.on_read_error = ReadFailurePolicy::Fail;
    let mut orchestrator = Orchestrator::new(cfg).unwrap();
    let err = orchestrator.run_pass(Workload::Write).unwrap_err();
    assert!(matches!(err.downcast_ref::<ReqstatError>(), Some(ReqstatError::QueueClosed { .. })));
}

#[test]
fn absorb_policy_completes_the_pass_after_a_lost_range() {
    // The lone consumer aborts on the first line, so the producer loses its queue.
    let post = format!("garbage\n{}", synthetic("POST", 500));
    let (_dir, post, get) = inputs(&post, &log_lines("GET", EXAMPLE));
    let mut cfg = config(&post, &get, 1, ReaderStrategy::InPlace, ConsumerTopology::Combined);
    cfg.pool_threads = 2;
    cfg.queue_capacity = 1;
    cfg.on_malformed = MalformedLinePolicy::AbortConsumer;
    cfg.on_read_error = ReadFailurePolicy::Absorb;
    let mut orchestrator = Orchestrator::new(cfg).unwrap();
    let stats = orchestrator.run_pass(Workload::Write).unwrap();
    assert_eq!(stats.aborted_ranges, 1);
    assert_eq!(stats.aborted_consumers, 1);
    assert_eq!(stats.records, 0);

    // The next pass runs on the same pool with fresh barriers.
    let read = orchestrator.run_pass(Workload::Read).unwrap();
    assert_eq!(read.aborted_ranges, 0);
    assert_eq!(read.records, 5);
}
