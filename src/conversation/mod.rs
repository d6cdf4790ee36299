//! Per-call conversation state
//!
//! Every finalized turn is appended to the durable store and mirrored
//! into an in-memory ring of the most recent turns, from which a
//! bounded textual context window is rebuilt on each append. Observers
//! (dashboards, QA) can subscribe to appended-turn events.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::error::Result;
use crate::store::CallStore;
use crate::types::{Interaction, Speaker};

/// Most recent turns kept in memory per call.
const RECENT_TURNS: usize = 100;

/// Default character budget of the rebuilt context window.
const DEFAULT_CONTEXT_CHARS: usize = 10_000;

/// Event emitted after a turn is durably appended.
#[derive(Debug, Clone)]
pub struct InteractionEvent {
    pub call_id: String,
    pub interaction: Interaction,
}

#[derive(Debug, Clone)]
struct TurnEntry {
    speaker: Speaker,
    text: String,
}

/// Conversation log for one call.
pub struct ConversationLog {
    call_id: String,
    store: Arc<CallStore>,
    max_context_chars: usize,
    recent: Mutex<VecDeque<TurnEntry>>,
    context_window: Mutex<String>,
    events: broadcast::Sender<InteractionEvent>,
}

impl ConversationLog {
    pub fn new(call_id: impl Into<String>, store: Arc<CallStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            call_id: call_id.into(),
            store,
            max_context_chars: DEFAULT_CONTEXT_CHARS,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_TURNS)),
            context_window: Mutex::new(String::new()),
            events,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Append one finalized turn: persist, update the ring and the
    /// context window, notify subscribers.
    pub async fn add_interaction(
        &self,
        speaker: Speaker,
        text: &str,
        audio_url: Option<&str>,
        meta: Option<serde_json::Value>,
    ) -> Result<Interaction> {
        let interaction = self
            .store
            .add_interaction(
                &self.call_id,
                speaker,
                text,
                audio_url,
                meta.unwrap_or_else(|| serde_json::json!({})),
            )
            .await?;

        {
            let mut recent = self.recent.lock().await;
            if recent.len() == RECENT_TURNS {
                recent.pop_front();
            }
            recent.push_back(TurnEntry {
                speaker,
                text: text.to_string(),
            });
            let window = build_context_window(&recent, self.max_context_chars);
            *self.context_window.lock().await = window;
        }

        debug!(
            call_id = %self.call_id,
            speaker = %speaker,
            chars = text.len(),
            "interaction added"
        );

        let _ = self.events.send(InteractionEvent {
            call_id: self.call_id.clone(),
            interaction: interaction.clone(),
        });

        Ok(interaction)
    }

    /// Full history from the durable log, oldest first.
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<Interaction>> {
        self.store.interactions(&self.call_id, limit).await
    }

    /// Bounded context summary assembled from the in-memory ring:
    /// most recent turns first until the budget is hit, then reversed
    /// back into chronological order.
    pub async fn context_summary(&self, max_chars: usize) -> String {
        let recent = self.recent.lock().await;
        build_context_window(&recent, max_chars)
    }

    /// The context window maintained on every append.
    pub async fn context_window(&self) -> String {
        self.context_window.lock().await.clone()
    }

    /// Subscribe to appended-turn events.
    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.events.subscribe()
    }
}

fn build_context_window(recent: &VecDeque<TurnEntry>, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;
    for turn in recent.iter().rev() {
        let line = format!("{}: {}", turn.speaker.as_str().to_uppercase(), turn.text);
        if total + line.len() > max_chars {
            break;
        }
        total += line.len();
        parts.push(line);
    }
    parts.reverse();
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallDirection;

    async fn test_log() -> (ConversationLog, Arc<CallStore>) {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let call = store
            .create_call(None, CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
            .await
            .unwrap();
        (ConversationLog::new(call.id, store.clone()), store)
    }

    #[tokio::test]
    async fn test_append_and_history() {
        let (log, _store) = test_log().await;
        log.add_interaction(Speaker::Customer, "hello", None, None)
            .await
            .unwrap();
        log.add_interaction(Speaker::Ai, "hi, how can I help?", None, None)
            .await
            .unwrap();

        let history = log.history(None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].speaker, Speaker::Customer);
        assert_eq!(history[1].speaker, Speaker::Ai);
    }

    #[tokio::test]
    async fn test_context_window_budget() {
        let (log, _store) = test_log().await;
        for i in 0..20 {
            log.add_interaction(Speaker::Customer, &format!("message number {i}"), None, None)
                .await
                .unwrap();
        }

        // A tight budget keeps only the most recent turns, in
        // chronological order.
        let summary = log.context_summary(60).await;
        assert!(summary.len() <= 60);
        assert!(summary.contains("message number 19"));
        assert!(!summary.contains("message number 0\n"));
        if let Some((first, last)) = summary.split_once('\n') {
            assert!(first < last);
        }
    }

    #[tokio::test]
    async fn test_recent_ring_is_bounded() {
        let (log, _store) = test_log().await;
        for i in 0..(RECENT_TURNS + 10) {
            log.add_interaction(Speaker::Ai, &format!("turn {i}"), None, None)
                .await
                .unwrap();
        }
        let recent = log.recent.lock().await;
        assert_eq!(recent.len(), RECENT_TURNS);
        assert_eq!(recent.front().unwrap().text, "turn 10");
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (log, _store) = test_log().await;
        let mut rx = log.subscribe();
        log.add_interaction(Speaker::Customer, "hello", None, None)
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.interaction.text, "hello");
    }
}
