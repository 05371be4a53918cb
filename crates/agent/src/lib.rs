//! LLM adapters - extraction and rule-set selection over OpenRouter
//!
//! This crate plugs the two provider-backed seams into the pipeline:
//! - Structured extraction: free-form building descriptions → the fixed
//!   geometry schema (`extraction`)
//! - Rule-set selection: catalog names + extracted context → applicable
//!   master rule set names (`selection`)
//!
//! Both ride on one chat transport (`llm`) that talks to the OpenRouter
//! chat completions API with JSON-mode output and bounded retries.
//!
//! # Safety Principle
//!
//! The LLM is strictly a translator. It NEVER decides quantities, rates,
//! or formulas. Those are deterministic decisions made by the estimation
//! core; a model reply can at most shape the input or narrow the catalog,
//! and every selection is re-validated against the catalog before use.

pub mod extraction;
pub mod llm;
pub mod selection;

pub use extraction::LlmExtractor;
pub use llm::{extract_json_block, ChatClient, ChatMessage, OpenRouterClient};
pub use selection::LlmSelector;
