pub mod catalog;
pub mod compute;
pub mod config;
pub mod domain;
pub mod errors;
pub mod geometry;
pub mod materializer;
pub mod metrics;
pub mod pipeline;
pub mod provenance;
pub mod services;
pub mod units;

pub use catalog::{
    resolve_rule_sets, RuleSelection, SelectionPath, DEFAULT_RULE_SET_NAMES,
};
pub use compute::{compute_items, ComputedLine, MasterDefaults, ResolvedRate};
pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat};
pub use domain::attempt::{AttemptId, ValidationAttempt, ValidationStatus};
pub use domain::boq::{Boq, BoqId, BoqItem, BoqItemId, BoqStatus, CalculationTrace};
pub use domain::rules::{
    BoqCategory, CategoryId, MasterRuleItem, MasterRuleItemId, MasterRuleSet, MasterRuleSetId,
    RuleItem, RuleItemId, RuleSet, RuleSetId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use geometry::{normalize, ExtractedPayload, GeometryReport, NormalizedRoom, RawRoom};
pub use materializer::{materialize, MaterializedRuleSet};
pub use metrics::{derive_metrics, FLOOR_AREA_M2, SLAB_VOLUME_M3};
pub use pipeline::{
    EstimateRequest, InMemoryPipelineStore, PipelineEngine, PipelineResult, PipelineStore,
    StageResult, StoreError,
};
pub use services::{ExtractionService, SelectionService, ServiceError};
pub use units::{meter_factor, split_compound_unit, RateBasis};
