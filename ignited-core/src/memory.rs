//! In-memory key-value store implementation
//!
//! Stores all rows in `BTreeMap`s (one per family) behind `Arc<RwLock>` for
//! interior mutability, making it thread-safe and suitable for
//! multi-threaded async runtimes. Ordered maps give cheap partition scans:
//! a server's rows are exactly the key range `[mask << 32, mask << 32 | MAX]`.

use crate::error::Result;
use crate::keys::ServerMask;
use crate::store::{Family, KvStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

/// In-memory [`KvStore`] for tests and the default embedded backend.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    families: Arc<RwLock<HashMap<Family, BTreeMap<u64, Vec<u8>>>>>,
}

impl Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let families = self.families.read();
        let rows: usize = families.values().map(BTreeMap::len).sum();
        f.debug_struct("MemoryKvStore")
            .field("families", &families.len())
            .field("rows", &rows)
            .finish()
    }
}

impl MemoryKvStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total row count across all families (test helper).
    pub fn row_count(&self) -> usize {
        self.families.read().values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, family: Family, key: u64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .families
            .read()
            .get(&family)
            .and_then(|rows| rows.get(&key).cloned()))
    }

    async fn put(&self, family: Family, key: u64, value: Vec<u8>) -> Result<()> {
        self.families
            .write()
            .entry(family)
            .or_default()
            .insert(key, value);
        Ok(())
    }

    async fn scan_partition(
        &self,
        family: Family,
        mask: ServerMask,
    ) -> Result<Vec<(u64, Vec<u8>)>> {
        Ok(self
            .families
            .read()
            .get(&family)
            .map(|rows| {
                rows.range(mask.range_start()..=mask.range_end())
                    .map(|(k, v)| (*k, v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = MemoryKvStore::new();
        let mask = ServerMask::of("apache");

        store
            .put(Family::BuildRefs, mask.key(7), b"hello".to_vec())
            .await
            .unwrap();
        let got = store.get(Family::BuildRefs, mask.key(7)).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));

        // Different family, same key: independent
        assert!(store
            .get(Family::FatBuilds, mask.key(7))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn scan_is_partition_scoped() {
        let store = MemoryKvStore::new();
        let apache = ServerMask::of("apache");
        let private = ServerMask::of("private");

        for id in [1u32, 2, 3] {
            store
                .put(Family::BuildRefs, apache.key(id), vec![id as u8])
                .await
                .unwrap();
        }
        store
            .put(Family::BuildRefs, private.key(1), vec![99])
            .await
            .unwrap();

        let rows = store
            .scan_partition(Family::BuildRefs, apache)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|(k, _)| ServerMask::split(*k).0 == apache));
    }
}
