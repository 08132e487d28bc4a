use anyhow::{Context, Result};
use memchr::memchr;
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::io::{open_reader, open_writer};
use crate::record::parse_timestamp;

/// Half-open byte range `[begin, end)` of an input file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub begin: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(begin: u64, end: u64) -> Self { Self { begin, end } }

    pub fn len(&self) -> u64 { self.end.saturating_sub(self.begin) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Splits `bytes` into `n` contiguous ranges whose internal boundaries sit right after a `\n`.
///
/// Boundary `i` is found by scanning forward from `i * len / n` (or from the previous
/// boundary, whichever is later) to the next terminator. Ranges may be empty when a
/// single line is longer than `len / n`.
pub fn compute_ranges(bytes: &[u8], n: usize) -> Vec<ByteRange> {
    let n = n.max(1);
    let len = bytes.len();
    let mut ranges = Vec::with_capacity(n);
    let mut begin = 0usize;
    for i in 1..n {
        let target = (i as u128 * len as u128 / n as u128) as usize;
        let from = target.max(begin);
        let boundary = match memchr(b'\n', &bytes[from..]) {
            Some(p) => from + p + 1,
            None => len,
        };
        ranges.push(ByteRange::new(begin as u64, boundary as u64));
        begin = boundary;
    }
    ranges.push(ByteRange::new(begin as u64, len as u64));
    ranges
}

/// Plans `n` line-aligned ranges over the file at `path`.
pub fn plan_ranges(path: &Path, n: usize) -> Result<Vec<ByteRange>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata().with_context(|| format!("stat {}", path.display()))?.len();
    if len == 0 {
        return Ok(compute_ranges(&[], n));
    }
    let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?;
    let ranges = compute_ranges(&map[..], n);
    debug!(path = %path.display(), bytes = len, ranges = ?ranges, "planned partition ranges");
    Ok(ranges)
}

/// Reads the dataset's reference timestamp from the first line whose leading field is numeric.
///
/// Lines before it (a header, stray garbage) are left to the consumers' malformed-line
/// policy. Returns `None` for an empty file or one with no parsable timestamp.
pub fn probe_reference_timestamp(path: &Path) -> Result<Option<i64>> {
    let mut reader = open_reader(path).with_context(|| format!("open {}", path.display()))?;
    let mut line = Vec::new();
    let mut skipped = 0usize;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            debug!(path = %path.display(), skipped, "no reference timestamp found");
            return Ok(None);
        }
        match parse_timestamp(trim_line_end(&line)) {
            Ok(ts) => return Ok(Some(ts)),
            Err(e) => {
                skipped += 1;
                debug!(path = %path.display(), skipped, "line is not a record, probing the next one: {}", e);
            }
        }
    }
}

/// Strips a trailing `\n` and optional `\r`.
pub fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Path of segment `index` for `path`: `name.csv` becomes `name{index}.csv`.
pub fn segment_path(path: &Path, index: usize, out_dir: Option<&Path>) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}{}", stem, index),
    };
    match out_dir {
        Some(dir) => dir.join(name),
        None => path.with_file_name(name),
    }
}

/// Materializes every range of `path` as its own segment file, in parallel.
pub fn split_file(path: &Path, ranges: &[ByteRange], out_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata().with_context(|| format!("stat {}", path.display()))?.len();
    let map = if len == 0 { None } else { Some(unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?) };
    let bytes: &[u8] = map.as_deref().unwrap_or(&[]);

    let segments: Vec<PathBuf> = (0..ranges.len()).map(|i| segment_path(path, i, out_dir)).collect();
    ranges
        .par_iter()
        .zip(segments.par_iter())
        .try_for_each(|(range, seg)| -> Result<()> {
            let slice = &bytes[range.begin as usize..range.end as usize];
            let mut w: BufWriter<File> = open_writer(seg)?;
            w.write_all(slice).with_context(|| format!("write {}", seg.display()))?;
            w.flush().with_context(|| format!("flush {}", seg.display()))?;
            debug!(segment = %seg.display(), bytes = slice.len(), "wrote split segment");
            Ok(())
        })?;
    info!(path = %path.display(), segments = segments.len(), "split input into segments");
    Ok(segments)
}
