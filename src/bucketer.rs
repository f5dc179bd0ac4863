//! Deterministic assignment of a bucketing id to an entity of a traffic allocation.

use crate::{
    config::TrafficAllocation,
    sharder::{Murmur3Sharder, Sharder, MAX_TRAFFIC_VALUE},
};

/// Maps `bucketing_id + entity_id` to a bucket value and walks a traffic allocation.
#[derive(Debug, Clone, Default)]
pub struct Bucketer<S = Murmur3Sharder> {
    sharder: S,
}

impl Bucketer {
    pub fn new() -> Self {
        Bucketer {
            sharder: Murmur3Sharder,
        }
    }
}

impl<S: Sharder> Bucketer<S> {
    pub fn with_sharder(sharder: S) -> Self {
        Bucketer { sharder }
    }

    /// Bucket value in `[0, MAX_TRAFFIC_VALUE)` for the given ids.
    pub fn bucket_value(&self, bucketing_id: &str, entity_id: &str) -> u32 {
        let key = [bucketing_id, entity_id].concat();
        self.sharder.get_shard(key, MAX_TRAFFIC_VALUE)
    }

    /// Entity id of the allocation entry the user falls into, if any.
    ///
    /// `entity_id` is the id salting the hash: the experiment id when choosing a variation, the
    /// group id when choosing a group member.
    pub fn bucket<'a>(
        &self,
        bucketing_id: &str,
        entity_id: &str,
        allocation: &'a [TrafficAllocation],
    ) -> Option<&'a str> {
        let bucket_value = self.bucket_value(bucketing_id, entity_id);
        let result = allocate(bucket_value, allocation);
        log::debug!(target: "experiment_engine",
            bucketing_id = bucketing_id,
            entity_id = entity_id,
            bucket_value = bucket_value,
            allocated_entity_id = result.unwrap_or("");
            "bucketed user");
        result
    }
}

/// Walk `allocation` in order and return the first entry whose `end_of_range` is above
/// `bucket_value`. Entries with an empty entity id represent de-allocated traffic.
pub fn allocate(bucket_value: u32, allocation: &[TrafficAllocation]) -> Option<&str> {
    allocation
        .iter()
        .find(|entry| bucket_value < entry.end_of_range)
        .map(|entry| entry.entity_id.as_str())
        .filter(|entity_id| !entity_id.is_empty())
}

/// Shorthand for bucketing with the default sharder.
pub fn bucket<'a>(
    bucketing_id: &str,
    entity_id: &str,
    allocation: &'a [TrafficAllocation],
) -> Option<&'a str> {
    Bucketer::new().bucket(bucketing_id, entity_id, allocation)
}
