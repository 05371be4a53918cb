//! The estimation pipeline: a small state machine that runs validation,
//! rule selection, and BOQ compute over the seam traits.

pub mod engine;
pub mod states;
pub mod store;

pub use engine::PipelineEngine;
pub use states::{
    ComputeOutcome, EstimateRequest, PipelineResult, PipelineStage, RulesOutcome, StageResult,
    ValidationOutcome,
};
pub use store::{InMemoryPipelineStore, PipelineStore, StoreError};
