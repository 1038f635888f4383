//! Bidirectional string <-> integer dictionary
//!
//! Everything above this layer stores integers instead of repeated strings.
//! The dictionary is shared across servers, append-only, and lives for the
//! process lifetime. Ids are monotonic from 0 and never reused; -1
//! ([`StringId::NONE`]) is the "unknown/null" sentinel and is never
//! allocated.
//!
//! ## Persistence
//!
//! Rows live in the [`Family::DictWords`] keyspace under a reserved
//! partition mask (logical code `_dict`), so the same composite-key scheme
//! used for per-server entities applies. The next-id counter persists in
//! [`Family::DictSeq`]. New entries hit the store *before* the id is
//! published; a store failure rolls the in-memory state back and surfaces
//! loudly. Returning a wrong or guessed id is the worst corruption this
//! design can suffer, so the write path blocks rather than degrade.

use crate::error::{Error, Result};
use crate::keys::{ServerMask, StringId};
use crate::store::{Family, KvStore};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Logical code of the dictionary's own store partition.
const DICT_CODE: &str = "_dict";

struct DictInner {
    /// id -> string; index is the id
    forward: Vec<Arc<str>>,
    /// string -> id
    reverse: HashMap<Arc<str>, StringId>,
}

/// Shared bidirectional string dictionary.
///
/// All lookups after [`StringCompactor::load`] are served from memory;
/// only new-string allocation touches the backing store. Allocation is
/// single-writer: concurrent first-use of the same string agrees on exactly
/// one id (losers of the race observe and reuse the winner's entry).
pub struct StringCompactor {
    kv: Arc<dyn KvStore>,
    mask: ServerMask,
    inner: RwLock<DictInner>,
}

impl Debug for StringCompactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringCompactor")
            .field("mask", &self.mask)
            .finish()
    }
}

impl StringCompactor {
    /// Load the full dictionary from the backing store.
    ///
    /// The next id is the max of the persisted sequence counter and the
    /// highest stored word id + 1, so a crash between the word write and the
    /// counter write cannot shrink the id space.
    pub async fn load(kv: Arc<dyn KvStore>) -> Result<Self> {
        let mask = ServerMask::of(DICT_CODE);
        let rows = kv.scan_partition(Family::DictWords, mask).await?;

        let mut max_id: i64 = -1;
        let mut entries: Vec<(u32, Arc<str>)> = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            let (_, id) = ServerMask::split(key);
            let word = std::str::from_utf8(&bytes)
                .map_err(|e| Error::dictionary(format!("Non-UTF-8 word at id {id}: {e}")))?;
            entries.push((id, Arc::from(word)));
            max_id = max_id.max(i64::from(id));
        }

        let persisted_seq = match kv.get(Family::DictSeq, mask.key(0)).await? {
            Some(bytes) => serde_json::from_slice::<u32>(&bytes)?,
            None => 0,
        };
        let next = u32::try_from(max_id + 1)
            .map_err(|_| Error::dictionary("Dictionary id space exhausted"))?
            .max(persisted_seq);

        let mut forward: Vec<Arc<str>> = vec![Arc::from(""); next as usize];
        let mut reverse = HashMap::with_capacity(entries.len());
        for (id, word) in entries {
            reverse.insert(word.clone(), StringId(id as i32));
            forward[id as usize] = word;
        }

        tracing::debug!(words = forward.len(), "Loaded string dictionary");
        Ok(Self {
            kv,
            mask,
            inner: RwLock::new(DictInner { forward, reverse }),
        })
    }

    /// Look up or allocate the id for a string. Idempotent.
    ///
    /// Fails loudly if the backing store cannot persist a new entry; the
    /// in-memory dictionary is left untouched in that case.
    pub async fn id(&self, value: &str) -> Result<StringId> {
        {
            let inner = self.inner.read().await;
            if let Some(id) = inner.reverse.get(value) {
                return Ok(*id);
            }
        }

        // Slow path: allocate under the write lock. The double-check makes
        // the losers of a concurrent first-use race reuse the winner's id.
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.reverse.get(value) {
            return Ok(*id);
        }

        let next = u32::try_from(inner.forward.len())
            .map_err(|_| Error::dictionary("Dictionary id space exhausted"))?;
        if next > i32::MAX as u32 {
            return Err(Error::dictionary("Dictionary id space exhausted"));
        }

        // Persist word then counter before publishing. Holding the write
        // lock across the store round-trip serializes all allocation; that
        // blocking is the price of never handing out an unconfirmed id.
        self.kv
            .put(
                Family::DictWords,
                self.mask.key(next),
                value.as_bytes().to_vec(),
            )
            .await
            .map_err(|e| Error::dictionary(format!("Failed to persist word: {e}")))?;
        self.kv
            .put(
                Family::DictSeq,
                self.mask.key(0),
                serde_json::to_vec(&(next + 1))?,
            )
            .await
            .map_err(|e| Error::dictionary(format!("Failed to persist sequence: {e}")))?;

        let word: Arc<str> = Arc::from(value);
        inner.forward.push(word.clone());
        let id = StringId(next as i32);
        inner.reverse.insert(word, id);
        Ok(id)
    }

    /// Read-only lookup; never allocates.
    pub async fn lookup(&self, value: &str) -> Option<StringId> {
        self.inner.read().await.reverse.get(value).copied()
    }

    /// Reverse lookup. `None` for [`StringId::NONE`] and unknown ids.
    pub async fn string(&self, id: StringId) -> Option<Arc<str>> {
        if !id.is_present() {
            return None;
        }
        let inner = self.inner.read().await;
        inner.forward.get(id.0 as usize).cloned()
    }

    /// Number of allocated entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.forward.len()
    }

    /// Whether the dictionary is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKvStore;

    #[tokio::test]
    async fn id_is_idempotent_and_bidirectional() {
        let kv = Arc::new(MemoryKvStore::new());
        let dict = StringCompactor::load(kv).await.unwrap();

        let a = dict.id("refs/heads/master").await.unwrap();
        let b = dict.id("SUCCESS").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(dict.id("refs/heads/master").await.unwrap(), a);
        assert_eq!(dict.string(a).await.as_deref(), Some("refs/heads/master"));
        assert_eq!(dict.string(b).await.as_deref(), Some("SUCCESS"));
        assert_eq!(dict.lookup("refs/heads/master").await, Some(a));
        assert_eq!(dict.lookup("nope").await, None);
        assert!(dict.string(StringId::NONE).await.is_none());
    }

    #[tokio::test]
    async fn ids_survive_reload_from_store() {
        let kv = Arc::new(MemoryKvStore::new());
        let first;
        let second;
        {
            let dict = StringCompactor::load(kv.clone()).await.unwrap();
            first = dict.id("Build / Apache / PR").await.unwrap();
            second = dict.id("FAILURE").await.unwrap();
        }

        let dict = StringCompactor::load(kv).await.unwrap();
        assert_eq!(dict.len().await, 2);
        assert_eq!(dict.id("Build / Apache / PR").await.unwrap(), first);
        assert_eq!(dict.id("FAILURE").await.unwrap(), second);
        // New allocations continue after the reloaded high-water mark
        let third = dict.id("UNKNOWN").await.unwrap();
        assert_eq!(third.0, 2);
    }

    #[tokio::test]
    async fn concurrent_first_use_agrees_on_one_id() {
        let kv = Arc::new(MemoryKvStore::new());
        let dict = Arc::new(StringCompactor::load(kv).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dict = dict.clone();
            handles.push(tokio::spawn(
                async move { dict.id("contended-word").await },
            ));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(dict.len().await, 1);
    }
}
