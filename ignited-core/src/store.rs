//! Key-value store contract and typed entity stores
//!
//! This module defines the storage traits the mirror runs on. The physical
//! engine is not mandated; anything that can implement partitioned
//! get/put/get_many/scan works ([`crate::memory::MemoryKvStore`] is the
//! built-in backend).
//!
//! ## Change-aware writes
//!
//! Every save goes through [`EntityStore::save_if_changed`]: read the current
//! row, compare the freshly built value structurally, and skip the physical
//! write when nothing changed. Downstream consumers (run-history ingestion,
//! read caches) key off "actually saved" signals, so no-op writes must not
//! produce them.

use crate::error::Result;
use crate::keys::ServerMask;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// Logical keyspace families, one per entity kind.
///
/// Filesystem- or column-oriented stores typically map these to separate
/// trees/column families; the in-memory store keys a map per family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Family {
    /// Lightweight build references
    BuildRefs,
    /// Full build projections (tests, problems, statistics, changes)
    FatBuilds,
    /// Build type (configuration) records
    BuildTypes,
    /// VCS change records
    Changes,
    /// Test mute records
    Mutes,
    /// Build log check results
    LogChecks,
    /// Rolling run-history aggregates
    RunHistory,
    /// Dictionary words (id -> string bytes)
    DictWords,
    /// Dictionary sequence counter
    DictSeq,
}

impl Family {
    /// Stable name, used for logging and store layout.
    pub fn as_str(self) -> &'static str {
        match self {
            Family::BuildRefs => "build_refs",
            Family::FatBuilds => "fat_builds",
            Family::BuildTypes => "build_types",
            Family::Changes => "changes",
            Family::Mutes => "mutes",
            Family::LogChecks => "log_checks",
            Family::RunHistory => "run_history",
            Family::DictWords => "dict_words",
            Family::DictSeq => "dict_seq",
        }
    }
}

/// Partitioned key-value store contract.
///
/// Keys are the composite `(mask << 32) | id` scheme from [`crate::keys`].
/// Per-key atomicity is all that is required of implementations;
/// get-then-put races are tolerated by the callers because every write is
/// idempotent and change-aware.
#[async_trait]
pub trait KvStore: Debug + Send + Sync {
    /// Read one row. `Ok(None)` when absent.
    async fn get(&self, family: Family, key: u64) -> Result<Option<Vec<u8>>>;

    /// Write one row, replacing any previous value.
    async fn put(&self, family: Family, key: u64, value: Vec<u8>) -> Result<()>;

    /// Read many rows; absent keys are simply missing from the result.
    async fn get_many(&self, family: Family, keys: &[u64]) -> Result<Vec<(u64, Vec<u8>)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(family, *key).await? {
                out.push((*key, value));
            }
        }
        Ok(out)
    }

    /// Iterate every row of one server partition, ordered by key.
    async fn scan_partition(&self, family: Family, mask: ServerMask)
        -> Result<Vec<(u64, Vec<u8>)>>;
}

/// A compacted entity persistable through an [`EntityStore`].
///
/// Equality must be structural over all compacted fields; the change-aware
/// save relies on it. `upgrade` is the lazy schema-migration hook: older
/// stored shapes are brought to the current one on read, never by a blocking
/// migration and never by refusing the read.
pub trait CompactedEntity:
    Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static
{
    /// Keyspace family this entity persists in
    const FAMILY: Family;

    /// Entity id folded into the partition's composite key
    fn entity_id(&self) -> u32;

    /// Lazily upgrade an older stored shape to the current schema.
    fn upgrade(self) -> Self {
        self
    }
}

/// Outcome of a change-aware save.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The value differed and a physical write happened
    Saved,
    /// The stored value was structurally identical; no write
    Unchanged,
}

impl SaveOutcome {
    /// Whether a physical write happened
    pub fn was_saved(self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

/// Typed accessor for one entity family over a shared [`KvStore`].
pub struct EntityStore<T> {
    kv: Arc<dyn KvStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            kv: self.kv.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> Debug for EntityStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("kv", &self.kv)
            .finish()
    }
}

impl<T: CompactedEntity> EntityStore<T> {
    /// Create a typed store over the shared key-value backend.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            _entity: PhantomData,
        }
    }

    fn decode(bytes: &[u8]) -> Result<T> {
        let entity: T = serde_json::from_slice(bytes)?;
        Ok(entity.upgrade())
    }

    /// Read one entity. Older schema versions are upgraded on the way out.
    pub async fn get(&self, mask: ServerMask, id: u32) -> Result<Option<T>> {
        match self.kv.get(T::FAMILY, mask.key(id)).await? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read many entities keyed by id; absent ids are missing from the map.
    pub async fn get_many(&self, mask: ServerMask, ids: &[u32]) -> Result<HashMap<u32, T>> {
        let keys: Vec<u64> = ids.iter().map(|id| mask.key(*id)).collect();
        let rows = self.kv.get_many(T::FAMILY, &keys).await?;
        let mut out = HashMap::with_capacity(rows.len());
        for (key, bytes) in rows {
            let (_, id) = ServerMask::split(key);
            out.insert(id, Self::decode(&bytes)?);
        }
        Ok(out)
    }

    /// Save the entity only if it differs from the stored value.
    ///
    /// A row that fails to decode (corrupt or unrecognized) is overwritten
    /// rather than propagated: the fresh value is authoritative.
    pub async fn save_if_changed(&self, mask: ServerMask, entity: &T) -> Result<SaveOutcome> {
        let key = mask.key(entity.entity_id());
        if let Some(bytes) = self.kv.get(T::FAMILY, key).await? {
            match serde_json::from_slice::<T>(&bytes) {
                Ok(existing) => {
                    if existing.upgrade() == *entity {
                        return Ok(SaveOutcome::Unchanged);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        family = T::FAMILY.as_str(),
                        key,
                        error = %e,
                        "Undecodable stored row, overwriting"
                    );
                }
            }
        }
        let bytes = serde_json::to_vec(entity)?;
        self.kv.put(T::FAMILY, key, bytes).await?;
        Ok(SaveOutcome::Saved)
    }

    /// Save a batch, returning only the entities that actually got written.
    pub async fn put_all(&self, mask: ServerMask, entities: Vec<T>) -> Result<Vec<T>> {
        let mut saved = Vec::new();
        for entity in entities {
            if self.save_if_changed(mask, &entity).await?.was_saved() {
                saved.push(entity);
            }
        }
        Ok(saved)
    }

    /// Read every entity of one server partition.
    pub async fn scan(&self, mask: ServerMask) -> Result<Vec<T>> {
        let rows = self.kv.scan_partition(T::FAMILY, mask).await?;
        let mut out = Vec::with_capacity(rows.len());
        for (_, bytes) in rows {
            out.push(Self::decode(&bytes)?);
        }
        Ok(out)
    }
}
