//! Escalation coordination
//!
//! Evaluates configured triggers against each customer turn, and when
//! one fires (or the model invokes the escalate tool) finds an
//! available human agent, creates the escalation row, and attaches the
//! handoff context. The bridge is not torn down here; the model stays
//! in the call until a separate transfer decision.

pub mod context_transfer;
pub mod router;
pub mod sentiment;

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EscalationConfig;
use crate::error::{BridgeError, Result};
use crate::store::CallStore;
use crate::types::{EscalationRecord, TriggerType};
use context_transfer::ContextTransfer;
use router::AgentRouter;
use sentiment::SentimentAnalyzer;

pub use context_transfer::HandoffContext;
pub use sentiment::{SentimentLabel, SentimentScore};

const DEFAULT_SENTIMENT_THRESHOLD: f32 = -0.5;
const DEFAULT_COMPLEXITY_THRESHOLD: f32 = 0.8;

/// A fired escalation trigger.
#[derive(Debug, Clone)]
pub struct EscalationTrigger {
    pub trigger_type: TriggerType,
    pub reason: String,
    pub details: serde_json::Value,
}

pub struct EscalationCoordinator {
    store: Arc<CallStore>,
    router: AgentRouter,
    context_transfer: ContextTransfer,
    sentiment: SentimentAnalyzer,
}

impl EscalationCoordinator {
    pub fn new(store: Arc<CallStore>) -> Self {
        Self {
            router: AgentRouter::new(store.clone()),
            context_transfer: ContextTransfer::new(store.clone()),
            sentiment: SentimentAnalyzer::new(),
            store,
        }
    }

    /// Evaluate each configured trigger against the latest turn.
    /// Returns the first trigger that fires.
    pub fn check_triggers(
        &self,
        latest_text: &str,
        config: &EscalationConfig,
    ) -> Option<EscalationTrigger> {
        if !config.enabled || latest_text.is_empty() {
            return None;
        }

        for rule in &config.triggers {
            match rule.trigger.as_str() {
                "sentiment" => {
                    let threshold = rule.threshold.unwrap_or(DEFAULT_SENTIMENT_THRESHOLD);
                    let result = self.sentiment.analyze(latest_text);
                    if result.score <= threshold {
                        return Some(EscalationTrigger {
                            trigger_type: TriggerType::Sentiment,
                            reason: "Negative sentiment detected".to_string(),
                            details: json!({
                                "score": result.score,
                                "label": result.label.as_str(),
                                "threshold": threshold,
                            }),
                        });
                    }
                }
                "keyword" => {
                    let text_lower = latest_text.to_lowercase();
                    if let Some(hit) = rule
                        .keywords
                        .iter()
                        .find(|k| text_lower.contains(&k.to_lowercase()))
                    {
                        return Some(EscalationTrigger {
                            trigger_type: TriggerType::Keyword,
                            reason: "Escalation keyword detected".to_string(),
                            details: json!({ "keyword": hit }),
                        });
                    }
                }
                "complexity" => {
                    let threshold = rule.threshold.unwrap_or(DEFAULT_COMPLEXITY_THRESHOLD);
                    let score = complexity_score(latest_text);
                    if score >= threshold {
                        return Some(EscalationTrigger {
                            trigger_type: TriggerType::Complexity,
                            reason: "High complexity detected".to_string(),
                            details: json!({ "score": score, "threshold": threshold }),
                        });
                    }
                }
                other => warn!(trigger = %other, "unknown escalation trigger type"),
            }
        }
        None
    }

    /// Escalate a call: find an agent, create the pending row, hand
    /// the context over, and mark the agent busy.
    pub async fn escalate(
        &self,
        call_id: &str,
        trigger: EscalationTrigger,
    ) -> Result<EscalationRecord> {
        let agent = self
            .router
            .find_available_agent(&[], &[])
            .await?
            .ok_or_else(|| BridgeError::NotFound("no available agents".to_string()))?;

        let context = self.context_transfer.prepare_context(call_id).await?;
        let created = self
            .store
            .create_escalation(
                call_id,
                trigger.trigger_type,
                trigger.details,
                Some(&agent.id),
                None,
                serde_json::json!({}),
            )
            .await?;
        self.context_transfer
            .transfer_context(created.id, &context)
            .await?;
        self.router.mark_agent_busy(&agent.id).await?;

        info!(
            call_id = %call_id,
            escalation_id = created.id,
            agent_id = %agent.id,
            trigger = trigger.trigger_type.as_str(),
            "call escalated"
        );
        self.store
            .get_escalation(created.id)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("escalation {}", created.id)))
    }

    /// Close out an escalation and return its agent to the pool.
    pub async fn complete(&self, escalation_id: i64) -> Result<()> {
        let escalation = self
            .store
            .get_escalation(escalation_id)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("escalation {escalation_id}")))?;
        self.store
            .update_escalation_status(escalation_id, crate::types::EscalationStatus::Completed)
            .await?;
        if let Some(agent_id) = escalation.assigned_agent_id {
            self.router.mark_agent_available(&agent_id).await?;
        }
        Ok(())
    }
}

/// Bounded complexity heuristic: average words per sentence normalized
/// against a 20-word ceiling.
fn complexity_score(text: &str) -> f32 {
    let words = text.split_whitespace().count();
    let sentences = text.split('.').filter(|s| !s.trim().is_empty()).count().max(1);
    let avg = words as f32 / sentences as f32;
    (avg / 20.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerRule;
    use crate::types::{CallDirection, EscalationStatus, HumanAgent, Speaker};

    fn keyword_config(keywords: &[&str]) -> EscalationConfig {
        EscalationConfig {
            enabled: true,
            triggers: vec![TriggerRule {
                trigger: "keyword".to_string(),
                threshold: None,
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            }],
        }
    }

    fn agent(id: &str) -> HumanAgent {
        HumanAgent {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{id}@example.com"),
            is_available: true,
            is_active: true,
            skills: vec![],
            departments: vec![],
            active_escalations: 0,
            total_escalations: 0,
            last_active_at: None,
        }
    }

    #[test]
    fn test_keyword_trigger() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let coordinator = EscalationCoordinator::new(store);
        let config = keyword_config(&["manager"]);

        let fired = coordinator
            .check_triggers("I want to speak to a Manager", &config)
            .unwrap();
        assert_eq!(fired.trigger_type, TriggerType::Keyword);
        assert_eq!(fired.details["keyword"], "manager");

        assert!(coordinator
            .check_triggers("everything is fine", &config)
            .is_none());
    }

    #[test]
    fn test_sentiment_trigger() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let coordinator = EscalationCoordinator::new(store);
        let config = EscalationConfig {
            enabled: true,
            triggers: vec![TriggerRule {
                trigger: "sentiment".to_string(),
                threshold: Some(-0.5),
                keywords: vec![],
            }],
        };

        let fired = coordinator
            .check_triggers("this is absolutely terrible and unacceptable, worst service", &config)
            .unwrap();
        assert_eq!(fired.trigger_type, TriggerType::Sentiment);
        assert!(coordinator
            .check_triggers("thanks, that helps a lot", &config)
            .is_none());
    }

    #[test]
    fn test_complexity_trigger() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let coordinator = EscalationCoordinator::new(store);
        let config = EscalationConfig {
            enabled: true,
            triggers: vec![TriggerRule {
                trigger: "complexity".to_string(),
                threshold: Some(0.8),
                keywords: vec![],
            }],
        };

        let rambling = "I need to port three numbers from two different carriers while keeping \
                        the billing account linked to the old contract that my colleague set up";
        assert!(coordinator.check_triggers(rambling, &config).is_some());
        assert!(coordinator.check_triggers("Short question.", &config).is_none());
    }

    #[test]
    fn test_disabled_config_never_fires() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let coordinator = EscalationCoordinator::new(store);
        let mut config = keyword_config(&["manager"]);
        config.enabled = false;
        assert!(coordinator.check_triggers("manager now", &config).is_none());
    }

    #[tokio::test]
    async fn test_escalate_assigns_agent_and_context() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        store.upsert_agent(&agent("a1")).await.unwrap();
        let call = store
            .create_call(None, CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
            .await
            .unwrap();
        store
            .add_interaction(
                &call.id,
                Speaker::Customer,
                "I want to speak to a manager right now",
                None,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let coordinator = EscalationCoordinator::new(store.clone());
        let escalation = coordinator
            .escalate(
                &call.id,
                EscalationTrigger {
                    trigger_type: TriggerType::Keyword,
                    reason: "Escalation keyword detected".to_string(),
                    details: serde_json::json!({"keyword": "manager"}),
                },
            )
            .await
            .unwrap();

        assert_eq!(escalation.status, EscalationStatus::Pending);
        assert_eq!(escalation.assigned_agent_id.as_deref(), Some("a1"));
        assert!(escalation.conversation_summary.is_some());

        // Agent is now busy.
        assert!(store.available_agents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_escalate_without_agents_fails() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let call = store
            .create_call(None, CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
            .await
            .unwrap();
        let coordinator = EscalationCoordinator::new(store);
        let result = coordinator
            .escalate(
                &call.id,
                EscalationTrigger {
                    trigger_type: TriggerType::CustomerRequest,
                    reason: "customer asked".to_string(),
                    details: serde_json::json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(BridgeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_complete_releases_agent() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        store.upsert_agent(&agent("a1")).await.unwrap();
        let call = store
            .create_call(None, CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
            .await
            .unwrap();
        store
            .add_interaction(&call.id, Speaker::Customer, "please escalate this call now", None, serde_json::json!({}))
            .await
            .unwrap();

        let coordinator = EscalationCoordinator::new(store.clone());
        let escalation = coordinator
            .escalate(
                &call.id,
                EscalationTrigger {
                    trigger_type: TriggerType::CustomerRequest,
                    reason: "customer asked".to_string(),
                    details: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        coordinator.complete(escalation.id).await.unwrap();
        assert_eq!(store.available_agents().await.unwrap().len(), 1);
        let loaded = store.get_escalation(escalation.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EscalationStatus::Completed);
    }
}
