use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::utils::mean_or_zero;

/// An aggregation record keyed by one value, mutated through atomics only.
///
/// Buckets are shared between consumer threads, so every mutation goes through
/// `&self`. Two buckets compare equal when their keys are equal.
pub trait Bucket: Send + Sync + 'static {
    type Key: Copy + Ord + Hash + Eq + Send + Sync + Debug + 'static;

    fn new(key: Self::Key) -> Self;
    fn key(&self) -> Self::Key;
    /// Folds one request with the given latency into the bucket.
    fn add(&self, latency_ms: i32);
    fn count(&self) -> u64;
}

/// Requests that fell into one (re-phased) second.
#[derive(Debug)]
pub struct ThroughputBucket {
    second: i64,
    count: AtomicU64,
    total_latency: AtomicI64,
}

impl ThroughputBucket {
    pub fn second(&self) -> i64 { self.second }

    pub fn total_latency(&self) -> i64 { self.total_latency.load(Ordering::Relaxed) }

    pub fn mean_latency(&self) -> i64 {
        mean_or_zero(self.total_latency(), self.count())
    }
}

impl Bucket for ThroughputBucket {
    type Key = i64;

    fn new(second: i64) -> Self {
        Self { second, count: AtomicU64::new(0), total_latency: AtomicI64::new(0) }
    }

    fn key(&self) -> i64 { self.second }

    fn add(&self, latency_ms: i32) {
        self.total_latency.fetch_add(latency_ms as i64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn count(&self) -> u64 { self.count.load(Ordering::Relaxed) }
}

impl Clone for ThroughputBucket {
    fn clone(&self) -> Self {
        Self {
            second: self.second,
            count: AtomicU64::new(self.count()),
            total_latency: AtomicI64::new(self.total_latency()),
        }
    }
}

impl PartialEq for ThroughputBucket {
    fn eq(&self, other: &Self) -> bool { self.second == other.second }
}

impl Eq for ThroughputBucket {}

impl Hash for ThroughputBucket {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) { self.second.hash(state) }
}

impl Serialize for ThroughputBucket {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ThroughputBucket", 4)?;
        s.serialize_field("second", &self.second)?;
        s.serialize_field("count", &self.count())?;
        s.serialize_field("total_latency", &self.total_latency())?;
        s.serialize_field("mean_latency", &self.mean_latency())?;
        s.end()
    }
}

/// Histogram bin holding the number of requests with exactly one latency value.
#[derive(Debug)]
pub struct LatencyBucket {
    latency: i32,
    count: AtomicU64,
}

impl LatencyBucket {
    pub fn latency(&self) -> i32 { self.latency }
}

impl Bucket for LatencyBucket {
    type Key = i32;

    fn new(latency: i32) -> Self {
        Self { latency, count: AtomicU64::new(0) }
    }

    fn key(&self) -> i32 { self.latency }

    fn add(&self, _latency_ms: i32) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn count(&self) -> u64 { self.count.load(Ordering::Relaxed) }
}

impl Clone for LatencyBucket {
    fn clone(&self) -> Self {
        Self { latency: self.latency, count: AtomicU64::new(self.count()) }
    }
}

impl PartialEq for LatencyBucket {
    fn eq(&self, other: &Self) -> bool { self.latency == other.latency }
}

impl Eq for LatencyBucket {}

impl Hash for LatencyBucket {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) { self.latency.hash(state) }
}

impl Serialize for LatencyBucket {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("LatencyBucket", 2)?;
        s.serialize_field("latency", &self.latency)?;
        s.serialize_field("count", &self.count())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_bucket_mean_is_zero() {
        let b = ThroughputBucket::new(42);
        assert_eq!(b.count(), 0);
        assert_eq!(b.mean_latency(), 0);
    }

    #[test]
    fn mean_latency_is_integer_mean() {
        let b = ThroughputBucket::new(1);
        for l in [100, 200, 300] {
            b.add(l);
        }
        assert_eq!(b.count(), 3);
        assert_eq!(b.total_latency(), 600);
        assert_eq!(b.mean_latency(), 200);
    }

    #[test]
    fn equality_is_by_key_only() {
        let a = ThroughputBucket::new(7);
        let b = ThroughputBucket::new(7);
        b.add(10);
        assert_eq!(a, b);
        assert_ne!(LatencyBucket::new(1), LatencyBucket::new(2));
    }

    #[test]
    fn latency_bucket_counts_only() {
        let b = LatencyBucket::new(35);
        b.add(35);
        b.add(35);
        assert_eq!(b.latency(), 35);
        assert_eq!(b.count(), 2);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let b = Arc::new(ThroughputBucket::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        b.add(2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(b.count(), 8000);
        assert_eq!(b.total_latency(), 16000);
    }

    #[test]
    fn clone_snapshots_counters() {
        let b = ThroughputBucket::new(3);
        b.add(5);
        let c = b.clone();
        b.add(5);
        assert_eq!(c.count(), 1);
        assert_eq!(b.count(), 2);
    }
}
