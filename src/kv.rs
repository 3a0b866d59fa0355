use std::sync::Mutex;

use crate::utils::types::KvMap;

/// The two key-value shards of one node: keys it owns and keys replicated
/// on behalf of predecessors.
///
/// Handlers may run on concurrent dispatch tasks, so each map carries its
/// own lock, independent of the routing mutex.
#[derive(Default)]
pub struct KvShards {
    primary: Mutex<KvMap>,
    replica: Mutex<KvMap>,
}

impl KvShards {
    pub fn put_primary(&self, key: String, value: String) {
        self.primary.lock().unwrap().insert(key, value);
    }

    pub fn put_replica(&self, key: String, value: String) {
        self.replica.lock().unwrap().insert(key, value);
    }

    /// Resolves a key the way the LOOKUP handler does: the primary shard
    /// wins, the replica shard answers for lost predecessors.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.primary.lock().unwrap().get(key) {
            return Some(value.clone());
        }
        self.replica.lock().unwrap().get(key).cloned()
    }

    pub fn primary_len(&self) -> usize {
        self.primary.lock().unwrap().len()
    }

    pub fn replica_len(&self) -> usize {
        self.replica.lock().unwrap().len()
    }

    pub fn primary_keys(&self) -> Vec<String> {
        self.primary.lock().unwrap().keys().cloned().collect()
    }

    pub fn replica_keys(&self) -> Vec<String> {
        self.replica.lock().unwrap().keys().cloned().collect()
    }

    /// Empties the primary shard for handover to the successor on leave.
    pub fn drain_primary(&self) -> Vec<(String, String)> {
        self.primary.lock().unwrap().drain().collect()
    }

    /// Empties the replica shard for handover to the successor on leave.
    pub fn drain_replica(&self) -> Vec<(String, String)> {
        self.replica.lock().unwrap().drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_shadows_replica() {
        let shards = KvShards::default();
        shards.put_replica("city".into(), "old".into());
        assert_eq!(shards.get("city").as_deref(), Some("old"));

        shards.put_primary("city".into(), "new".into());
        assert_eq!(shards.get("city").as_deref(), Some("new"));
    }

    #[test]
    fn test_missing_key_resolves_to_none() {
        let shards = KvShards::default();
        assert_eq!(shards.get("nothing"), None);
    }

    #[test]
    fn test_drain_empties_shards() {
        let shards = KvShards::default();
        shards.put_primary("a".into(), "1".into());
        shards.put_primary("b".into(), "2".into());
        shards.put_replica("c".into(), "3".into());

        let mut drained = shards.drain_primary();
        drained.sort();
        assert_eq!(
            drained,
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );
        assert_eq!(shards.primary_len(), 0);
        assert_eq!(shards.drain_replica().len(), 1);
        assert_eq!(shards.replica_len(), 0);
    }
}
