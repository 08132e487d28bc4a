use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let file = File::create(path.as_ref()).with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

pub fn open_reader(path: impl AsRef<Path>) -> Result<BufReader<File>> {
    let file = File::open(path.as_ref()).with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(BufReader::new(file))
}

/// Best-effort removal of temporary files; failures are only logged.
pub fn remove_files(paths: &[PathBuf]) {
    for p in paths {
        if let Err(e) = fs::remove_file(p) {
            warn!("remove {}: {}", p.display(), e);
        }
    }
}

/// Report destination for `input`: the stem loses a trailing `raw` and gains `suffix`.
///
/// `data/POSTraw.csv` with suffix `-result.csv` becomes `data/POST-result.csv`.
pub fn report_path(input: &Path, suffix: &str, out_dir: Option<&Path>) -> PathBuf {
    let name = format!("{}{}", report_stem(input), suffix);
    match out_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

pub fn report_stem(input: &Path) -> String {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    match stem.strip_suffix("raw") {
        Some(s) => s.to_string(),
        None => stem,
    }
}
