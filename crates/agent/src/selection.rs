//! Rule-set selection over the chat transport.
//!
//! The model only picks names from the catalog it is shown. Replies that
//! stray from the reply shape degrade to an empty selection, which the
//! resolver turns into the deterministic fallback.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use takeoff_core::services::{
    SelectionRequest, SelectionResponse, SelectionService, ServiceError,
};

use crate::llm::{extract_json_block, ChatClient, ChatMessage};

const SELECTION_SYSTEM_PROMPT: &str = "You are a civil estimation assistant. From the provided \
catalog of master rule set names, choose which apply to the user's described scope. Return ONLY \
JSON: {\"selected\": [names], \"notes\": string}. Choose only from the provided names. If there \
is insufficient information, return an empty list. Keep it concise.";

pub struct LlmSelector<C> {
    client: C,
}

impl<C> LlmSelector<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

fn selection_messages(request: &SelectionRequest<'_>) -> Vec<ChatMessage> {
    let user_payload = json!({
        "catalog_names": request.catalog_names,
        "extracted_payload": request.extracted_payload,
        "raw_input_excerpt": request.raw_input_excerpt,
    });
    vec![
        ChatMessage::system(SELECTION_SYSTEM_PROMPT),
        ChatMessage::user(user_payload.to_string()),
    ]
}

fn parse_reply(value: &Value) -> SelectionResponse {
    let selected = value
        .get("selected")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let notes = value.get("notes").and_then(Value::as_str).map(str::to_string);
    SelectionResponse { selected, notes }
}

#[async_trait]
impl<C: ChatClient> SelectionService for LlmSelector<C> {
    async fn select_rule_sets(
        &self,
        request: SelectionRequest<'_>,
    ) -> Result<SelectionResponse, ServiceError> {
        let content = self.client.chat(&selection_messages(&request)).await?;
        let value = extract_json_block(&content)?;
        let response = parse_reply(&value);

        debug!(
            event_name = "selection.completed",
            selected = response.selected.len(),
            catalog = request.catalog_names.len(),
        );
        Ok(response)
    }
}
