//! Per-invocation control loop.
//!
//! Each call to [`Scheduler::invoke`] re-reads the cache from the store, advances
//! exactly one phase (ingestion or the lowest unfinished stage) and returns a
//! [`ProgressSummary`]. Entries are processed one at a time and the time budget
//! is checked after each, so work resumes on the next invocation where it
//! stopped.
//!
//! Nothing guards against two overlapping invocations. Both may process the same
//! pending entries; the done bitmap keeps every entry from being handled twice
//! within one invocation, but not across concurrent ones.

use crate::builder::FamilyBuilder;
use crate::cache::{CacheEntry, CacheManager, CacheMetadata, Stage};
use crate::cost::aggregate_costs;
use crate::error::{Result, RunIssue};
use crate::meta::derive_meta;
use crate::reference::ReferenceParser;
use crate::schema::{CaseRecord, CostRecord, PipelineConfig};
use crate::statistics::{
    FlushCounts, StatisticsAccumulator, TabularSink, ROLLUP_CHECKPOINT_ID,
};
use crate::store::{EntryStore, Selector};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Monotonic time source used for the invocation budget.
pub trait Clock {
    fn elapsed(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Everything an invocation reads from or writes to.
pub struct PipelineStores<'a> {
    pub cases: &'a dyn EntryStore<CaseRecord>,
    pub costs: &'a dyn EntryStore<CostRecord>,
    pub cache: &'a mut dyn EntryStore<CacheEntry>,
    pub rollups: &'a mut dyn EntryStore<StatisticsAccumulator>,
    pub output: &'a mut dyn TabularSink,
}

/// Stores the statistics stage writes to besides the cache.
struct StageOutputs<'a> {
    rollups: &'a mut dyn EntryStore<StatisticsAccumulator>,
    output: &'a mut dyn TabularSink,
}

/// Collaborators a stage handler may use.
pub struct StageContext<'a> {
    pub costs: &'a dyn EntryStore<CostRecord>,
    pub parser: &'a dyn ReferenceParser,
    pub accumulator: &'a mut StatisticsAccumulator,
    pub issues: &'a mut Vec<RunIssue>,
}

pub type StageHandler = fn(&mut CacheEntry, &mut StageContext<'_>) -> Result<()>;

/// Stage handlers, indexed by [`Stage::index`].
pub const STAGE_HANDLERS: [StageHandler; 3] = [run_cost_stage, run_meta_stage, run_statistics_stage];

fn run_cost_stage(entry: &mut CacheEntry, ctx: &mut StageContext<'_>) -> Result<()> {
    aggregate_costs(&mut entry.family, ctx.costs, ctx.parser, ctx.issues)?;
    Ok(())
}

fn run_meta_stage(entry: &mut CacheEntry, _ctx: &mut StageContext<'_>) -> Result<()> {
    derive_meta(&mut entry.family);
    Ok(())
}

fn run_statistics_stage(entry: &mut CacheEntry, ctx: &mut StageContext<'_>) -> Result<()> {
    ctx.accumulator.add_family(&entry.family);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Processed,
    Skipped,
}

/// Runs `stage` on one entry unless the entry already went through it.
pub fn process_entry(
    stage: Stage,
    entry: &mut CacheEntry,
    ctx: &mut StageContext<'_>,
) -> Result<Outcome> {
    if entry.is_done(stage) {
        return Ok(Outcome::Skipped);
    }
    STAGE_HANDLERS[stage.index()](entry, ctx)?;
    entry.mark_done(stage);
    Ok(Outcome::Processed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ingestion,
    Stage(Stage),
    /// Every entry had finished. Checkpointed rollups left behind by an
    /// interrupted flush are emitted before the cache is reset.
    Drained,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub phase: Phase,
    pub label: String,
    pub processed: usize,
    pub skipped: usize,
    pub issues: Vec<RunIssue>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Stopped early because the time budget ran out.
    pub budget_exhausted: bool,
    /// Set when this invocation flushed the rollups and cleared the cache.
    pub flushed: Option<FlushCounts>,
    pub cache: CacheMetadata,
}

pub struct Scheduler<'a> {
    config: &'a PipelineConfig,
    parser: &'a dyn ReferenceParser,
}

impl<'a> Scheduler<'a> {
    pub fn new(config: &'a PipelineConfig, parser: &'a dyn ReferenceParser) -> Self {
        Self { config, parser }
    }

    pub fn invoke(&self, stores: &mut PipelineStores<'_>) -> Result<ProgressSummary> {
        self.invoke_with_clock(stores, &MonotonicClock::start())
    }

    pub fn invoke_with_clock(
        &self,
        stores: &mut PipelineStores<'_>,
        clock: &dyn Clock,
    ) -> Result<ProgressSummary> {
        let started_at = Utc::now();
        let cache = CacheManager::new(&mut *stores.cache)?;
        let metadata = cache.metadata()?;

        let mut summary = ProgressSummary {
            phase: Phase::Ingestion,
            label: String::new(),
            processed: 0,
            skipped: 0,
            issues: Vec::new(),
            started_at,
            elapsed_ms: 0,
            budget_exhausted: false,
            flushed: None,
            cache: metadata.clone(),
        };

        let outputs = StageOutputs {
            rollups: &mut *stores.rollups,
            output: &mut *stores.output,
        };
        if metadata.is_empty() {
            self.ingest(cache, stores.cases, &mut summary)?;
        } else if metadata.is_drained() {
            warn!(
                "Cache holds {} finished entries that were never flushed",
                metadata.entries
            );
            summary.flushed = self.finish_statistics(cache, outputs, None)?;
            summary.phase = Phase::Drained;
        } else if let Some(stage) = metadata.next_stage() {
            self.run_stage(stage, cache, stores.costs, outputs, clock, &mut summary)?;
        }

        summary.label = match summary.phase {
            Phase::Ingestion => "ingestion".to_string(),
            Phase::Stage(stage) => stage.to_string(),
            Phase::Drained => "drained".to_string(),
        };
        summary.cache = CacheManager::new(&mut *stores.cache)?.metadata()?;
        summary.elapsed_ms = clock.elapsed().as_millis() as u64;
        info!(
            "Invocation finished: {} processed={} skipped={} issues={} elapsed={}ms",
            summary.label,
            summary.processed,
            summary.skipped,
            summary.issues.len(),
            summary.elapsed_ms
        );
        Ok(summary)
    }

    /// Operator reset: drops every cache entry and the rollup checkpoint.
    pub fn reset(&self, stores: &mut PipelineStores<'_>) -> Result<usize> {
        let removed = CacheManager::new(&mut *stores.cache)?.clear()?;
        stores.rollups.delete_matching(&Selector::All)?;
        Ok(removed)
    }

    fn ingest(
        &self,
        mut cache: CacheManager<'_>,
        cases: &dyn EntryStore<CaseRecord>,
        summary: &mut ProgressSummary,
    ) -> Result<()> {
        info!("Cache is empty, building families");
        let mut builder = FamilyBuilder::new(self.config, self.parser);

        for case in cases.iterate(&Selector::All)? {
            if let Some(family) = builder.push(&case) {
                cache.insert_family(family)?;
                summary.processed += 1;
            }
        }
        if let Some(family) = builder.finish() {
            cache.insert_family(family)?;
            summary.processed += 1;
        }

        summary.skipped = builder.dropped();
        summary.issues = builder.into_issues();
        summary.phase = Phase::Ingestion;
        Ok(())
    }

    fn run_stage(
        &self,
        stage: Stage,
        mut cache: CacheManager<'_>,
        costs: &dyn EntryStore<CostRecord>,
        outputs: StageOutputs<'_>,
        clock: &dyn Clock,
        summary: &mut ProgressSummary,
    ) -> Result<()> {
        info!("Running stage {}", stage);
        summary.phase = Phase::Stage(stage);
        let budget = Duration::from_millis(self.config.time_budget_ms);

        let mut accumulator = match stage {
            Stage::StatisticsEmission => outputs
                .rollups
                .get(ROLLUP_CHECKPOINT_ID)?
                .unwrap_or_default(),
            _ => StatisticsAccumulator::new(),
        };

        let mut ctx = StageContext {
            costs,
            parser: self.parser,
            accumulator: &mut accumulator,
            issues: &mut summary.issues,
        };

        // Statistics entries are only marked done once the checkpoint holding
        // their contribution has been written.
        let mut deferred = Vec::new();
        for entry_id in cache.entry_ids()? {
            let mut entry = cache.load(&entry_id)?;
            match process_entry(stage, &mut entry, &mut ctx)? {
                Outcome::Skipped => {
                    summary.skipped += 1;
                    continue;
                }
                Outcome::Processed if stage == Stage::StatisticsEmission => {
                    deferred.push(entry);
                    summary.processed += 1;
                }
                Outcome::Processed => {
                    cache.save(entry)?;
                    summary.processed += 1;
                }
            }
            if clock.elapsed() > budget {
                debug!("Time budget of {:?} used up in stage {}", budget, stage);
                summary.budget_exhausted = true;
                break;
            }
        }

        if stage != Stage::StatisticsEmission {
            return Ok(());
        }

        outputs.rollups.upsert(accumulator.clone())?;
        for entry in deferred {
            cache.save(entry)?;
        }
        if cache.pending(Stage::StatisticsEmission)? == 0 {
            summary.flushed = self.finish_statistics(cache, outputs, Some(accumulator))?;
        }
        Ok(())
    }

    /// Emits the rollups and clears the cache along with the checkpoint.
    ///
    /// Without an `accumulator` the checkpoint is read back from the rollup
    /// store. Returns `None` when there was nothing to emit.
    fn finish_statistics(
        &self,
        mut cache: CacheManager<'_>,
        outputs: StageOutputs<'_>,
        accumulator: Option<StatisticsAccumulator>,
    ) -> Result<Option<FlushCounts>> {
        let accumulator = match accumulator {
            Some(accumulator) => Some(accumulator),
            None => outputs.rollups.get(ROLLUP_CHECKPOINT_ID)?,
        };
        let flushed = match accumulator {
            Some(mut accumulator) if !accumulator.is_empty() => Some(accumulator.flush(
                outputs.output,
                &self.config.grant_time_dataset,
                &self.config.yearly_dataset,
            )?),
            _ => None,
        };
        cache.clear()?;
        outputs.rollups.delete_matching(&Selector::All)?;
        Ok(flushed)
    }
}
