use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::bucket::{Bucket, LatencyBucket, ThroughputBucket};
use crate::pipeline::Workload;

/// Concurrent map from bucket key to bucket.
///
/// A key's bucket is inserted at most once (first insert wins) and never
/// replaced or removed; all later updates go through the bucket's atomics.
pub struct AggregationMap<B: Bucket> {
    buckets: DashMap<B::Key, B>,
}

impl<B: Bucket + Clone> AggregationMap<B> {
    pub fn new() -> Self { Self { buckets: DashMap::new() } }

    /// Insert-if-absent, then fold `latency_ms` into the bucket for `key`.
    pub fn record(&self, key: B::Key, latency_ms: i32) {
        if let Some(bucket) = self.buckets.get(&key) {
            bucket.add(latency_ms);
            return;
        }
        // The read guard above is released; taking the shard write lock here cannot self-deadlock.
        self.buckets.entry(key).or_insert_with(|| B::new(key)).add(latency_ms);
    }

    pub fn len(&self) -> usize { self.buckets.len() }

    pub fn is_empty(&self) -> bool { self.buckets.is_empty() }

    pub fn total_count(&self) -> u64 { self.buckets.iter().map(|b| b.count()).sum() }

    /// Ordered, read-only copy of the map. Only meaningful once every writer has finished.
    pub fn freeze(&self) -> FrozenMap<B> {
        let buckets = self.buckets.iter().map(|e| (*e.key(), e.value().clone())).collect();
        FrozenMap { buckets }
    }
}

impl<B: Bucket + Clone> Default for AggregationMap<B> {
    fn default() -> Self { Self::new() }
}

/// Ordered snapshot of an [`AggregationMap`] handed to reporting.
#[derive(Clone, Debug)]
pub struct FrozenMap<B: Bucket> {
    buckets: BTreeMap<B::Key, B>,
}

impl<B: Bucket> FrozenMap<B> {
    pub fn len(&self) -> usize { self.buckets.len() }

    pub fn is_empty(&self) -> bool { self.buckets.is_empty() }

    pub fn get(&self, key: &B::Key) -> Option<&B> { self.buckets.get(key) }

    /// Buckets in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = &B> { self.buckets.values() }

    pub fn keys(&self) -> impl Iterator<Item = &B::Key> { self.buckets.keys() }

    pub fn first_key(&self) -> Option<B::Key> { self.buckets.keys().next().copied() }

    pub fn last_key(&self) -> Option<B::Key> { self.buckets.keys().next_back().copied() }

    pub fn total_count(&self) -> u64 { self.buckets.values().map(|b| b.count()).sum() }
}

impl<B: Bucket + Serialize> Serialize for FrozenMap<B> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.buckets.values())
    }
}

/// Throughput and latency maps of one workload.
#[derive(Default)]
pub struct WorkloadMaps {
    pub throughput: AggregationMap<ThroughputBucket>,
    pub latency: AggregationMap<LatencyBucket>,
}

impl WorkloadMaps {
    pub fn freeze(&self) -> FrozenWorkload {
        FrozenWorkload { throughput: self.throughput.freeze(), latency: self.latency.freeze() }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FrozenWorkload {
    pub throughput: FrozenMap<ThroughputBucket>,
    pub latency: FrozenMap<LatencyBucket>,
}

impl FrozenWorkload {
    /// Flattened `(second, count, total_latency)` and `(latency, count)` rows; handy for comparing runs.
    pub fn contents(&self) -> (Vec<(i64, u64, i64)>, Vec<(i32, u64)>) {
        let t = self.throughput.values().map(|b| (b.second(), b.count(), b.total_latency())).collect();
        let l = self.latency.values().map(|b| (b.latency(), b.count())).collect();
        (t, l)
    }
}

/// The four maps of a run: one throughput and one latency map per workload.
#[derive(Default)]
pub struct Aggregates {
    write: WorkloadMaps,
    read: WorkloadMaps,
}

impl Aggregates {
    pub fn new() -> Self { Self::default() }

    pub fn workload(&self, workload: Workload) -> &WorkloadMaps {
        match workload {
            Workload::Write => &self.write,
            Workload::Read => &self.read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn same_key_updates_one_bucket() {
        let map: AggregationMap<ThroughputBucket> = AggregationMap::new();
        map.record(5, 10);
        map.record(5, 30);
        assert_eq!(map.len(), 1);
        let frozen = map.freeze();
        let b = frozen.get(&5).unwrap();
        assert_eq!(b.count(), 2);
        assert_eq!(b.mean_latency(), 20);
    }

    #[test]
    fn freeze_is_ordered() {
        let map: AggregationMap<LatencyBucket> = AggregationMap::new();
        for l in [70, 30, 50, 30] {
            map.record(l, l);
        }
        let frozen = map.freeze();
        assert_eq!(frozen.keys().copied().collect::<Vec<_>>(), vec![30, 50, 70]);
        assert_eq!(frozen.first_key(), Some(30));
        assert_eq!(frozen.last_key(), Some(70));
        assert_eq!(frozen.total_count(), 4);
    }

    #[test]
    fn racing_inserts_keep_one_bucket_per_key() {
        let map: Arc<AggregationMap<ThroughputBucket>> = Arc::new(AggregationMap::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..2000 {
                        map.record(i % 16, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 16);
        assert_eq!(map.total_count(), 16_000);
        let frozen = map.freeze();
        assert!(frozen.values().all(|b| b.count() == 1000));
    }

    #[test]
    fn empty_map_freezes_empty() {
        let maps = WorkloadMaps::default();
        let frozen = maps.freeze();
        assert!(frozen.throughput.is_empty());
        assert_eq!(frozen.latency.first_key(), None);
    }
}
