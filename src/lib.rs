//! # Patent Cost Timeline
//!
//! A resumable pipeline that folds patent case records and cost-ledger records
//! into per-family cost timelines and rolls them up into cost-to-grant and
//! yearly grant-rate statistics.
//!
//! ## Core Concepts
//!
//! - **Family**: all cases sharing a type + number key, built from a
//!   reference-sorted stream of case records
//! - **Bins**: fixed arrays of cost accumulators per case, one cell per elapsed
//!   year (or month) since filing, or since the grant for validations
//! - **Cache entry**: one family plus a completion flag per stage, persisted in
//!   an entry store so the work survives between invocations
//! - **Stages**: cost aggregation, meta derivation and statistics emission, run
//!   in that order, one stage per invocation, each bounded by a time budget
//!
//! ## Example
//!
//! ```rust,ignore
//! use patent_cost_timeline::*;
//!
//! let config = PipelineConfig::default();
//! let parser = OfficeReferenceParser;
//! let scheduler = Scheduler::new(&config, &parser);
//!
//! let mut stores = PipelineStores {
//!     cases: &cases,
//!     costs: &costs,
//!     cache: &mut cache,
//!     rollups: &mut rollups,
//!     output: &mut sink,
//! };
//!
//! // Call once per request until the rollups are flushed
//! let summary = scheduler.invoke(&mut stores)?;
//! println!("{}: {} processed", summary.label, summary.processed);
//! ```

pub mod builder;
pub mod cache;
pub mod cost;
pub mod error;
pub mod family;
pub mod meta;
pub mod reference;
pub mod scheduler;
pub mod schema;
pub mod statistics;
pub mod store;
pub mod utils;

pub use builder::FamilyBuilder;
pub use cache::{CacheEntry, CacheManager, CacheMetadata, Stage, StageCount};
pub use cost::aggregate_costs;
pub use error::{PipelineError, Result, RunIssue};
pub use family::{Bins, CaseAggregate, CaseMeta, Family, FamilyInfo};
pub use meta::derive_meta;
pub use reference::{OfficeReferenceParser, ParsedReference, ReferenceParser};
pub use scheduler::{
    process_entry, Clock, MonotonicClock, Outcome, Phase, PipelineStores, ProgressSummary,
    Scheduler, StageContext, STAGE_HANDLERS,
};
pub use schema::*;
pub use statistics::{
    FlushCounts, GrantTimeOutput, MemorySink, OutputRow, StatisticsAccumulator, TabularSink,
    YearlyOutput,
};
pub use store::{EntryStore, MemoryStore, Selector, StoredEntry};
pub use utils::*;

use log::{debug, info};

pub struct StatisticsProcessor;

impl StatisticsProcessor {
    /// Runs one invocation with the bundled reference parser.
    pub fn run_invocation(
        config: &PipelineConfig,
        stores: &mut PipelineStores<'_>,
    ) -> Result<ProgressSummary> {
        config.validate()?;
        info!(
            "Processing statistics invocation ({:?} bins, budget {} ms)",
            config.bins, config.time_budget_ms
        );

        let parser = OfficeReferenceParser;
        let summary = Scheduler::new(config, &parser).invoke(stores)?;

        for issue in &summary.issues {
            debug!("Issue during {}: {}", summary.label, issue);
        }
        Ok(summary)
    }

    /// Invokes repeatedly until the rollups are flushed, for callers that are
    /// not bound by a request time slice. Gives up after `max_invocations`.
    pub fn run_to_completion(
        config: &PipelineConfig,
        stores: &mut PipelineStores<'_>,
        max_invocations: usize,
    ) -> Result<Vec<ProgressSummary>> {
        let mut summaries = Vec::new();
        for _ in 0..max_invocations {
            let summary = Self::run_invocation(config, stores)?;
            let finished = summary.flushed.is_some() || summary.phase == Phase::Drained;
            let nothing_ingested = summary.phase == Phase::Ingestion && summary.cache.is_empty();
            summaries.push(summary);
            if finished || nothing_ingested {
                break;
            }
        }
        Ok(summaries)
    }
}

pub fn run_invocation(
    config: &PipelineConfig,
    stores: &mut PipelineStores<'_>,
) -> Result<ProgressSummary> {
    StatisticsProcessor::run_invocation(config, stores)
}
