//! Deterministic Historization and Merge Engine (DHME)
//!
//! Incrementally merges append-only extracts into a target layer: slowly
//! changing entities keep a full version history with non-overlapping
//! validity intervals, orders-like entities are deduplicated and validated.
//! Re-running any batch produces the same target state.

pub mod classifier;
pub mod config;
pub mod consistency;
pub mod context;
pub mod dedup;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod expiry;
pub mod hasher;
pub mod historizer;
pub mod lifecycle;
pub mod logging;
pub mod memory;
pub mod record;
pub mod rule_set;
pub mod serialization;
pub mod surrogate;
pub mod traits;
pub mod transactional;
pub mod types;
pub mod validator;
pub mod watermark;
pub mod writer;

// Re-export core types and traits
pub use classifier::{ChangeClassifier, Classification, ClassifiedRecord};
pub use config::{EngineConfig, TargetConfig};
pub use consistency::{check_versions, ConsistencyIssue, TargetComparison};
pub use context::{DeterministicTime, RunContext};
pub use dedup::Deduplicator;
pub use engine::{Engine, EngineBuilder, TargetStore, VersionSpan};
pub use enrichment::{EnrichedRow, Enricher, EnrichmentStage};
pub use error::{ConfigError, EngineError, LifecycleError, RecordError, SerializationError, StorageError};
pub use expiry::ExpiryCloser;
pub use hasher::RowHasher;
pub use historizer::HistorizationPipeline;
pub use lifecycle::VersionState;
pub use logging::{LogEntry, LogLevel, RunLog};
pub use memory::{MemorySource, MemoryTransactionalStore, MemoryVersionStore, MemoryWatermarkStore};
pub use record::{HistorizedVersion, LateArrival, SourceRecord, SourceRow, TransactionalRecord};
pub use rule_set::{RuleDescriptor, RulePredicate, RuleSet, Severity};
pub use serialization::{BincodeCodec, JsonCodec, SnapshotCodec};
pub use surrogate::SurrogateKeyGenerator;
pub use traits::{SourceExtract, TransactionalStore, VersionStore, WatermarkStore};
pub use transactional::TransactionalPipeline;
pub use types::{
    AttributeValue, Attributes, ChangeKind, RowHash, RunCounts, RunReport, Stage, SurrogateKey, TargetDigest,
    TargetKind, ValidationStatus,
};
pub use validator::Validator;
pub use watermark::WatermarkTracker;
pub use writer::VersionWriter;
