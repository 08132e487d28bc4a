use memchr::memmem;
use std::borrow::Cow;

use crate::constants::{FIELD_LATENCY, FIELD_METHOD, FIELD_TIMESTAMP, UNIT_MS};
use crate::errors::{ReqstatError, Result};

/// Field boundary inside a line: a comma with a quote on both sides.
const FIELD_BOUNDARY: &[u8] = b"\",\"";

/// One request parsed from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    pub timestamp_ms: i64,
    pub method: Cow<'a, str>,
    pub latency_ms: i32,
}

/// Splits `line` on quote-delimited commas and strips the quote characters from each field.
pub fn split_fields(line: &[u8]) -> Vec<Cow<'_, [u8]>> {
    let mut fields = Vec::with_capacity(4);
    let mut start = 0usize;
    for pos in memmem::find_iter(line, FIELD_BOUNDARY) {
        // pos points at the closing quote; the comma follows it
        fields.push(strip_quotes(&line[start..pos + 1]));
        start = pos + 2;
    }
    fields.push(strip_quotes(&line[start..]));
    fields
}

fn strip_quotes(field: &[u8]) -> Cow<'_, [u8]> {
    let trimmed = field.strip_prefix(b"\"").unwrap_or(field);
    let trimmed = trimmed.strip_suffix(b"\"").unwrap_or(trimmed);
    if memchr::memchr(b'"', trimmed).is_none() {
        Cow::Borrowed(trimmed)
    } else {
        Cow::Owned(trimmed.iter().copied().filter(|&b| b != b'"').collect())
    }
}

fn parse_num<T: std::str::FromStr>(line: &[u8], field: &[u8], name: &str) -> Result<T> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .ok_or_else(|| ReqstatError::malformed(line, format!("{name} field is not an integer")))
}

/// Parses the leading timestamp field only.
pub fn parse_timestamp(line: &[u8]) -> Result<i64> {
    let end = memmem::find(line, FIELD_BOUNDARY).map(|p| p + 1).unwrap_or(line.len());
    let field = strip_quotes(&line[..end]);
    parse_num(line, &field, "timestamp")
}

pub fn parse_line(line: &[u8]) -> Result<Record<'_>> {
    let mut fields = split_fields(line);
    if fields.len() <= FIELD_LATENCY {
        return Err(ReqstatError::malformed(
            line,
            format!("expected at least {} fields, found {}", FIELD_LATENCY + 1, fields.len()),
        ));
    }
    let timestamp_ms = parse_num(line, &fields[FIELD_TIMESTAMP], "timestamp")?;
    let latency_ms = parse_num(line, &fields[FIELD_LATENCY], "latency")?;
    let method = match std::mem::take(&mut fields[FIELD_METHOD]) {
        Cow::Borrowed(b) => String::from_utf8_lossy(b),
        Cow::Owned(v) => Cow::Owned(String::from_utf8_lossy(&v).into_owned()),
    };
    Ok(Record { timestamp_ms, method, latency_ms })
}

/// Second bucket of `timestamp_ms`, re-phased to the sub-second offset of `reference_ms`.
///
/// Timestamps whose millisecond offset is below the reference offset belong to the
/// previous bucket, so every bucket spans `[k*1000 + off, (k+1)*1000 + off)`.
pub fn bucket_second(timestamp_ms: i64, reference_ms: i64) -> i64 {
    let second = timestamp_ms / UNIT_MS;
    if timestamp_ms % UNIT_MS < reference_ms % UNIT_MS { second - 1 } else { second }
}
