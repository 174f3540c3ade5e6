//! Orchestration entry point with builder pattern
//!
//! `Engine::run` drives one target through a full batch: read the watermark,
//! extract the window, run the target's pipeline, advance the watermark. A
//! failure at any stage leaves the watermark untouched, so the next run
//! re-reads the same window and idempotent writes absorb the overlap.

use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use crate::config::{EngineConfig, TargetConfig};
use crate::consistency::{self, check_versions, ConsistencyIssue};
use crate::context::RunContext;
use crate::enrichment::{EnrichedRow, EnrichmentStage};
use crate::error::{ConfigError, EngineError};
use crate::expiry::ExpiryCloser;
use crate::hasher::RowHasher;
use crate::historizer::HistorizationPipeline;
use crate::logging::{LogLevel, RunLog};
use crate::record::{HistorizedVersion, SourceRecord, TransactionalRecord};
use crate::traits::{SourceExtract, TransactionalStore, VersionStore, WatermarkStore};
use crate::transactional::TransactionalPipeline;
use crate::types::{RunCounts, RunReport, Stage, TargetKind};
use crate::watermark::WatermarkTracker;

/// Store bound to a target, matching its kind
#[derive(Clone)]
pub enum TargetStore {
    Historized(Arc<dyn VersionStore>),
    Transactional(Arc<dyn TransactionalStore>),
}

impl TargetStore {
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetStore::Historized(_) => TargetKind::Historized,
            TargetStore::Transactional(_) => TargetKind::Transactional,
        }
    }
}

/// A stored version with its `valid_to` resolved against the configured
/// open-ended sentinel
#[derive(Debug, Clone, PartialEq)]
pub struct VersionSpan {
    pub version: HistorizedVersion,
    pub valid_to: DateTime<Utc>,
}

enum Pipeline {
    Historized(HistorizationPipeline, Arc<dyn VersionStore>),
    Transactional(TransactionalPipeline, Arc<dyn TransactionalStore>),
}

/// Incremental historization and merge engine over a set of targets
pub struct Engine {
    config: EngineConfig,
    source: Arc<dyn SourceExtract>,
    watermarks: WatermarkTracker,
    pipelines: HashMap<String, Pipeline>,
    enrichment: EnrichmentStage,
    log_level: LogLevel,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("targets", &self.config.target_names())
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a builder for constructing an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn watermarks(&self) -> &WatermarkTracker {
        &self.watermarks
    }

    /// Load everything ingested for `target` up to `cutoff`
    pub fn run(&self, target: &str, cutoff: DateTime<Utc>) -> Result<RunReport, EngineError> {
        let config = self
            .config
            .target(target)
            .map_err(|e| EngineError::from(e).at_stage(target, Stage::Configure, cutoff))?;
        let watermark = self
            .watermarks
            .get_cutoff(target)
            .map_err(|e| EngineError::from(e).at_stage(target, Stage::ReadWatermark, cutoff))?;

        if cutoff <= watermark {
            let ctx = RunContext::new(target, watermark, watermark);
            let mut log = RunLog::new(target, ctx.loaded_at(), self.log_level);
            let entry = log
                .entry(LogLevel::Info, "nothing to load")
                .with_metadata("watermark", watermark.to_rfc3339())
                .with_metadata("cutoff", cutoff.to_rfc3339());
            log.log(entry);
            return Ok(self.report(&ctx, RunCounts::default(), watermark, log));
        }

        let ctx = RunContext::new(target, watermark, cutoff);
        let mut log = RunLog::new(target, ctx.loaded_at(), self.log_level);
        let entry = log
            .entry(LogLevel::Info, "run started")
            .with_metadata("run_id", ctx.run_id())
            .with_metadata("window_start", watermark.to_rfc3339())
            .with_metadata("window_end", cutoff.to_rfc3339());
        log.log(entry);

        let counts = self.process_window(config, &ctx, &mut log)?;

        let new_watermark = self
            .watermarks
            .advance(target, cutoff)
            .map_err(|e| EngineError::from(e).at_stage(target, Stage::AdvanceWatermark, cutoff))?;
        log.info(format!("watermark advanced to {}", new_watermark.to_rfc3339()));

        Ok(self.report(&ctx, counts, new_watermark, log))
    }

    /// Re-process `(window_start, window_end]` of `target` regardless of the
    /// watermark. Writes are idempotent, so replaying a loaded window leaves
    /// the target unchanged. The watermark only moves forward.
    pub fn replay_window(
        &self,
        target: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<RunReport, EngineError> {
        let config = self
            .config
            .target(target)
            .map_err(|e| EngineError::from(e).at_stage(target, Stage::Configure, window_end))?;
        let ctx = RunContext::new(target, window_start, window_end);
        let mut log = RunLog::new(target, ctx.loaded_at(), self.log_level);
        let entry = log
            .entry(LogLevel::Info, "replaying window")
            .with_metadata("run_id", ctx.run_id());
        log.log(entry);

        let counts = self.process_window(config, &ctx, &mut log)?;
        let new_watermark = self
            .watermarks
            .advance(target, window_end)
            .map_err(|e| EngineError::from(e).at_stage(target, Stage::AdvanceWatermark, window_end))?;

        Ok(self.report(&ctx, counts, new_watermark, log))
    }

    /// Run every configured target up to `cutoff` in parallel, in config order.
    ///
    /// Targets are independent; one failing does not stop the others.
    pub fn run_all(&self, cutoff: DateTime<Utc>) -> Vec<(String, Result<RunReport, EngineError>)> {
        self.config
            .targets
            .par_iter()
            .map(|target| (target.target.clone(), self.run(&target.target, cutoff)))
            .collect()
    }

    /// Extract the window of `ctx` and merge it into the target store
    pub fn process_window(
        &self,
        config: &TargetConfig,
        ctx: &RunContext,
        log: &mut RunLog,
    ) -> Result<RunCounts, EngineError> {
        let target = config.target.as_str();
        let rows = self
            .source
            .read_window(target, ctx.window_start(), ctx.window_end())
            .map_err(|e| EngineError::from(e).at_stage(target, Stage::Extract, ctx.window_end()))?;

        let mut records = Vec::with_capacity(rows.len());
        let mut malformed = 0;
        for row in rows {
            let batch_id = row.batch_id.clone();
            match SourceRecord::from_row(row, config) {
                Ok(record) => records.push(record),
                Err(e) => {
                    malformed += 1;
                    let entry = log
                        .entry(LogLevel::Warn, format!("row rejected: {}", e))
                        .with_metadata("batch_id", batch_id);
                    log.log(entry);
                }
            }
        }
        log.debug(format!("extracted {} records", records.len()));

        let mut counts = match self.pipeline(target)? {
            Pipeline::Historized(pipeline, store) => pipeline.process(store.as_ref(), records, ctx, log)?,
            Pipeline::Transactional(pipeline, store) => pipeline.process(store.as_ref(), records, ctx, log)?,
        };
        counts.rejected += malformed;
        Ok(counts)
    }

    /// Close dangling open versions across the whole of a historized target
    pub fn repair(&self, target: &str) -> Result<usize, EngineError> {
        let store = self.version_store(target)?;
        let watermark = self.watermarks.get_cutoff(target)?;
        let mut log = RunLog::new(target, watermark, self.log_level);
        ExpiryCloser::new()
            .repair_all(store.as_ref(), &mut log)
            .map_err(|e| e.at_stage(target, Stage::CloseExpiry, watermark))
    }

    /// Current versions of a historized target, ordered by business key
    pub fn current_versions(&self, target: &str) -> Result<Vec<HistorizedVersion>, EngineError> {
        let store = self.version_store(target)?;
        let mut current: Vec<HistorizedVersion> = store
            .all_versions()?
            .into_iter()
            .filter(HistorizedVersion::is_current)
            .collect();
        current.sort_by(|a, b| a.business_key.cmp(&b.business_key));
        Ok(current)
    }

    /// Version of each business key valid at `at`, ordered by business key
    pub fn as_of(&self, target: &str, at: DateTime<Utc>) -> Result<Vec<HistorizedVersion>, EngineError> {
        let versions = self.version_store(target)?.all_versions()?;
        Ok(consistency::as_of(&versions, at, self.config.open_ended_valid_to)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Every version of `business_key`, oldest first. The current version
    /// ends at the configured `open_ended_valid_to`.
    pub fn history(&self, target: &str, business_key: &str) -> Result<Vec<VersionSpan>, EngineError> {
        let open_ended = self.config.open_ended_valid_to;
        Ok(self
            .version_store(target)?
            .versions_of(business_key)?
            .into_iter()
            .map(|version| VersionSpan {
                valid_to: version.valid_to(open_ended),
                version,
            })
            .collect())
    }

    /// Latest delivery per business key of a transactional target
    pub fn latest_view(&self, target: &str) -> Result<Vec<TransactionalRecord>, EngineError> {
        match self.pipeline(target)? {
            Pipeline::Transactional(_, store) => Ok(store.latest_view()?),
            Pipeline::Historized(..) => Err(wrong_kind(target, TargetKind::Transactional)),
        }
    }

    /// Interval invariants of a historized target
    pub fn check(&self, target: &str) -> Result<Vec<ConsistencyIssue>, EngineError> {
        let store = self.version_store(target)?;
        Ok(check_versions(&store.all_versions()?))
    }

    /// Consumption-ready rows of `target` as of `as_of`
    pub fn enrich(&self, target: &str, as_of: NaiveDate) -> Result<Vec<EnrichedRow>, EngineError> {
        let rows = match self.pipeline(target)? {
            Pipeline::Historized(_, store) => {
                self.enrichment.enrich_versions(target, &store.all_versions()?, as_of)?
            }
            Pipeline::Transactional(_, store) => {
                self.enrichment.enrich_records(target, &store.latest_view()?, as_of)?
            }
        };
        Ok(rows)
    }

    fn pipeline(&self, target: &str) -> Result<&Pipeline, EngineError> {
        self.pipelines.get(target).ok_or_else(|| {
            ConfigError::UnknownTarget {
                target: target.to_string(),
            }
            .into()
        })
    }

    fn version_store(&self, target: &str) -> Result<&Arc<dyn VersionStore>, EngineError> {
        match self.pipeline(target)? {
            Pipeline::Historized(_, store) => Ok(store),
            Pipeline::Transactional(..) => Err(wrong_kind(target, TargetKind::Historized)),
        }
    }

    fn report(&self, ctx: &RunContext, counts: RunCounts, new_watermark: DateTime<Utc>, log: RunLog) -> RunReport {
        RunReport {
            target: ctx.target().to_string(),
            run_id: ctx.run_id().to_string(),
            window_start: ctx.window_start(),
            window_end: ctx.window_end(),
            counts,
            new_watermark,
            log: log.into_entries(),
        }
    }
}

fn wrong_kind(target: &str, expected: TargetKind) -> EngineError {
    ConfigError::InvalidSetting {
        setting: target.to_string(),
        reason: format!("operation requires a {:?} target", expected),
    }
    .into()
}

/// Builder for constructing engines with a fluent API
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    source: Option<Arc<dyn SourceExtract>>,
    watermark_store: Option<Arc<dyn WatermarkStore>>,
    stores: HashMap<String, TargetStore>,
    enrichment: Option<EnrichmentStage>,
    log_level: Option<LogLevel>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn SourceExtract>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_watermark_store(mut self, store: Arc<dyn WatermarkStore>) -> Self {
        self.watermark_store = Some(store);
        self
    }

    pub fn with_version_store(mut self, target: &str, store: Arc<dyn VersionStore>) -> Self {
        self.stores.insert(target.to_string(), TargetStore::Historized(store));
        self
    }

    pub fn with_transactional_store(mut self, target: &str, store: Arc<dyn TransactionalStore>) -> Self {
        self.stores.insert(target.to_string(), TargetStore::Transactional(store));
        self
    }

    /// Enrichers used by [`Engine::enrich`]; defaults to the retail set
    pub fn with_enrichment(mut self, enrichment: EnrichmentStage) -> Self {
        self.enrichment = Some(enrichment);
        self
    }

    /// Minimum level kept in each run report; defaults to `Info`
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Validate configuration against the bound stores and the extract
    /// schema, then build the engine. Nothing is written on failure.
    pub fn build(mut self) -> Result<Engine, EngineError> {
        let config = self.config.ok_or_else(|| missing("config"))?;
        let source = self.source.ok_or_else(|| missing("source"))?;
        let watermark_store = self.watermark_store.ok_or_else(|| missing("watermark_store"))?;
        config.validate()?;

        let hasher = RowHasher::new(config.numeric_scale);
        let mut pipelines = HashMap::new();
        for target in &config.targets {
            let store = self.stores.remove(&target.target).ok_or_else(|| ConfigError::UnboundTarget {
                target: target.target.clone(),
            })?;
            if store.kind() != target.kind {
                return Err(ConfigError::InvalidSetting {
                    setting: target.target.clone(),
                    reason: format!("configured as {:?} but bound to a {:?} store", target.kind, store.kind()),
                }
                .into());
            }

            let schema = source.schema(&target.target)?;
            target.validate_schema(&schema)?;

            let pipeline = match store {
                TargetStore::Historized(store) => {
                    Pipeline::Historized(HistorizationPipeline::new(target, hasher.clone(), config.open_ended_valid_to), store)
                }
                TargetStore::Transactional(store) => Pipeline::Transactional(
                    TransactionalPipeline::new(target, hasher.clone(), config.epsilon),
                    store,
                ),
            };
            pipelines.insert(target.target.clone(), pipeline);
        }

        if let Some(target) = self.stores.keys().next() {
            return Err(ConfigError::UnknownTarget {
                target: target.clone(),
            }
            .into());
        }

        Ok(Engine {
            watermarks: WatermarkTracker::new(watermark_store),
            enrichment: self.enrichment.unwrap_or_else(EnrichmentStage::retail),
            log_level: self.log_level.unwrap_or(LogLevel::Info),
            config,
            source,
            pipelines,
        })
    }
}

fn missing(component: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        setting: component.to_string(),
        reason: "is required".to_string(),
    }
}
