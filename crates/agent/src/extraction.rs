//! Structured extraction over the chat transport.
//!
//! The prompt pins a fixed schema; anything else the model says is
//! discarded. Unit strings are passed through untouched so the geometry
//! normalizer can attribute conversion failures to the user's own units.

use async_trait::async_trait;
use tracing::debug;

use takeoff_core::geometry::ExtractedPayload;
use takeoff_core::services::{ExtractionService, ServiceError};

use crate::llm::{extract_json_block, ChatClient, ChatMessage};

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract building inputs. Return ONLY JSON. Schema: \
{ rooms: [ { name, length:{value,unit}, width:{value,unit}, height:{value,unit}, \
wall_thickness:{value,unit}, relations:[{source,relation,target}] } ], \
global_wall_thickness:{value,unit}|null, floor_height:{value,unit}|null, \
project_type: string|null }. \
Units examples: m, cm, mm, ft, in. Preserve the user's original unit strings. \
Set project_type only when the text names a work scope (for example flooring or earthwork).";

pub struct LlmExtractor<C> {
    client: C,
}

impl<C> LlmExtractor<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

fn extraction_messages(raw_input_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
        ChatMessage::user(format!("Input:\n{raw_input_text}")),
    ]
}

#[async_trait]
impl<C: ChatClient> ExtractionService for LlmExtractor<C> {
    async fn extract(&self, raw_input_text: &str) -> Result<ExtractedPayload, ServiceError> {
        let content = self.client.chat(&extraction_messages(raw_input_text)).await?;
        let value = extract_json_block(&content)?;
        let payload: ExtractedPayload = serde_json::from_value(value).map_err(|error| {
            ServiceError::Malformed(format!("payload does not match the schema: {error}"))
        })?;

        debug!(
            event_name = "extraction.completed",
            rooms = payload.rooms.len(),
            has_project_type = payload.project_type.is_some(),
        );
        Ok(payload)
    }
}
