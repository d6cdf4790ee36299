//! Context transfer for human handoff
//!
//! Assembles what a human agent needs to pick up a call mid-stream:
//! call facts, a short conversation summary, the recent history, and
//! the customer's key points.

use serde_json::json;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::store::CallStore;
use crate::types::{Interaction, Speaker};

/// Turns included in the handoff history.
const HANDOFF_TURNS: usize = 10;

pub struct ContextTransfer {
    store: Arc<CallStore>,
}

impl ContextTransfer {
    pub fn new(store: Arc<CallStore>) -> Self {
        Self { store }
    }

    /// Build the handoff context for a call.
    pub async fn prepare_context(&self, call_id: &str) -> Result<HandoffContext> {
        let call = self
            .store
            .get_call(call_id)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("call {call_id}")))?;
        let history = self.store.interactions(call_id, Some(HANDOFF_TURNS)).await?;

        let summary = summarize(&history);
        let key_points = key_points(&history);

        let data = json!({
            "call_id": call.id,
            "call_sid": call.call_sid,
            "direction": call.direction.as_str(),
            "from_number": call.from_number,
            "to_number": call.to_number,
            "started_at": call.started_at.to_rfc3339(),
            "conversation_summary": summary,
            "conversation_history": history
                .iter()
                .map(|i| json!({
                    "speaker": i.speaker.as_str(),
                    "text": i.text,
                    "timestamp": i.timestamp.to_rfc3339(),
                }))
                .collect::<Vec<_>>(),
            "key_points": key_points,
        });

        Ok(HandoffContext { summary, data })
    }

    /// Persist prepared context onto the escalation row.
    pub async fn transfer_context(&self, escalation_id: i64, context: &HandoffContext) -> Result<()> {
        self.store
            .attach_escalation_context(escalation_id, &context.summary, &context.data)
            .await
    }
}

/// Prepared handoff payload.
#[derive(Debug, Clone)]
pub struct HandoffContext {
    pub summary: String,
    pub data: serde_json::Value,
}

/// First turn, a midpoint key point, and the latest turn, truncated.
fn summarize(history: &[Interaction]) -> String {
    if history.is_empty() {
        return "No conversation history available.".to_string();
    }

    let mut parts = Vec::new();
    parts.push(format!("Opening: {}", clip(&history[0].text, 100)));
    if history.len() > 2 {
        let middle = &history[history.len() / 2];
        parts.push(format!("Key point: {}", clip(&middle.text, 100)));
    }
    if history.len() > 1 {
        let last = &history[history.len() - 1];
        parts.push(format!("Latest: {}", clip(&last.text, 100)));
    }
    parts.join("\n")
}

/// Up to five substantial customer turns.
fn key_points(history: &[Interaction]) -> Vec<String> {
    history
        .iter()
        .filter(|i| i.speaker == Speaker::Customer && i.text.len() > 20)
        .map(|i| clip(&i.text, 200))
        .take(5)
        .collect()
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}
