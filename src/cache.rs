use crate::error::{PipelineError, Result};
use crate::family::Family;
use crate::store::{EntryStore, Selector, StoredEntry};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    CostAggregation = 0,
    MetaDerivation = 1,
    StatisticsEmission = 2,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::CostAggregation,
        Stage::MetaDerivation,
        Stage::StatisticsEmission,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::CostAggregation => "cost aggregation",
            Stage::MetaDerivation => "meta derivation",
            Stage::StatisticsEmission => "statistics emission",
        };
        f.write_str(label)
    }
}

/// Durable unit of work: one family plus its stage completion bitmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub family: Family,
    pub done: [bool; 3],
}

impl CacheEntry {
    pub fn is_done(&self, stage: Stage) -> bool {
        self.done[stage.index()]
    }

    pub fn mark_done(&mut self, stage: Stage) {
        self.done[stage.index()] = true;
    }
}

impl StoredEntry for CacheEntry {
    fn entry_id(&self) -> String {
        self.id.clone()
    }

    fn reference(&self) -> &str {
        &self.family.key
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCount {
    pub done: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub entries: usize,
    pub stages: [StageCount; 3],
}

impl CacheMetadata {
    /// Nothing was ingested yet, or the last run was cleared.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn is_drained(&self) -> bool {
        self.entries > 0 && self.stages[Stage::StatisticsEmission.index()].pending == 0
    }

    /// Lowest stage that still has work left.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| self.stages[stage.index()].pending > 0)
    }
}

pub struct CacheManager<'s> {
    store: &'s mut dyn EntryStore<CacheEntry>,
    next_seq: usize,
}

impl<'s> CacheManager<'s> {
    pub fn new(store: &'s mut dyn EntryStore<CacheEntry>) -> Result<Self> {
        let next_seq = store.count_matching(&Selector::All)?;
        Ok(Self { store, next_seq })
    }

    /// Persists a freshly built family. Entry ids carry an insertion sequence so
    /// repeated family keys are kept apart and entries iterate in creation order.
    pub fn insert_family(&mut self, family: Family) -> Result<CacheEntry> {
        let entry = CacheEntry {
            id: format!("{:08}_{}", self.next_seq, family.key),
            family,
            done: [false; 3],
        };
        self.next_seq += 1;
        debug!("Caching family {} as {}", entry.family.key, entry.id);
        self.store.upsert(entry)
    }

    pub fn save(&mut self, entry: CacheEntry) -> Result<CacheEntry> {
        self.store.upsert(entry)
    }

    pub fn load(&self, entry_id: &str) -> Result<CacheEntry> {
        self.store
            .get(entry_id)?
            .ok_or_else(|| PipelineError::MissingCacheEntry(entry_id.to_string()))
    }

    pub fn entry_ids(&self) -> Result<Vec<String>> {
        self.store.entry_ids(&Selector::All)
    }

    pub fn metadata(&self) -> Result<CacheMetadata> {
        let mut metadata = CacheMetadata::default();
        for entry in self.store.iterate(&Selector::All)? {
            metadata.entries += 1;
            for stage in Stage::ALL {
                let count = &mut metadata.stages[stage.index()];
                if entry.is_done(stage) {
                    count.done += 1;
                } else {
                    count.pending += 1;
                }
            }
        }
        Ok(metadata)
    }

    pub fn pending(&self, stage: Stage) -> Result<usize> {
        Ok(self.metadata()?.stages[stage.index()].pending)
    }

    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.store.delete_matching(&Selector::All)?;
        self.next_seq = 0;
        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }
}
