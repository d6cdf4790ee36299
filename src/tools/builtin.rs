//! Built-in tool handlers
//!
//! The seven tools the voice agent can invoke mid-call. Customer,
//! order, and ticket lookups return canned profiles until a CRM
//! backend is wired in; knowledge search and escalation are fully
//! live.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ToolContext, ToolDispatcher, ToolHandler};
use crate::error::{BridgeError, Result};
use crate::escalation::{EscalationCoordinator, EscalationTrigger};
use crate::knowledge::{RetrievalPipeline, SearchRequest};
use crate::telephony::call_state::{CallEvent, CallStateMachine};
use crate::types::TriggerType;

/// Shared dependencies of the builtin handlers.
#[derive(Clone)]
pub struct BuiltinToolDeps {
    pub escalation: Arc<EscalationCoordinator>,
    pub call_state: Arc<CallStateMachine>,
    pub knowledge: Option<Arc<RetrievalPipeline>>,
}

/// Register every builtin tool on a dispatcher.
pub fn register_builtin(dispatcher: &mut ToolDispatcher, deps: BuiltinToolDeps) {
    dispatcher.register("lookup_customer", Arc::new(LookupCustomer));
    dispatcher.register("schedule_appointment", Arc::new(ScheduleAppointment));
    dispatcher.register(
        "escalate_to_human",
        Arc::new(EscalateToHuman {
            escalation: deps.escalation,
            call_state: deps.call_state,
        }),
    );
    dispatcher.register(
        "search_knowledge_base",
        Arc::new(SearchKnowledgeBase {
            pipeline: deps.knowledge,
        }),
    );
    dispatcher.register("check_order_status", Arc::new(CheckOrderStatus));
    dispatcher.register("create_support_ticket", Arc::new(CreateSupportTicket));
    dispatcher.register("get_business_hours", Arc::new(GetBusinessHours));
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

// ─── lookup_customer ─────────────────────────────────────────────

struct LookupCustomer;

#[async_trait]
impl ToolHandler for LookupCustomer {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let phone_number = str_arg(&args, "phone_number");
        let email = str_arg(&args, "email");

        let profile = match (phone_number, email) {
            (Some(phone), _) => json!({
                "found": true,
                "name": "John Doe",
                "email": "john.doe@example.com",
                "phone": phone,
                "account_type": "Premium",
                "member_since": "2023-01-15",
                "previous_calls": 3,
            }),
            (None, Some(email)) => json!({
                "found": true,
                "name": "John Doe",
                "email": email,
                "phone": "+1234567890",
                "account_type": "Premium",
                "member_since": "2023-01-15",
                "previous_calls": 3,
            }),
            (None, None) => {
                return Ok(json!({ "error": "Either phone_number or email is required" }))
            }
        };

        info!(call_id = ?ctx.call_id, "customer lookup");
        Ok(profile)
    }
}

// ─── schedule_appointment ────────────────────────────────────────

struct ScheduleAppointment;

#[async_trait]
impl ToolHandler for ScheduleAppointment {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let (Some(date), Some(time), Some(service_type)) = (
            str_arg(&args, "date"),
            str_arg(&args, "time"),
            str_arg(&args, "service_type"),
        ) else {
            return Ok(json!({ "error": "date, time, and service_type are required" }));
        };

        let appointment_id = format!("APT-{}", Utc::now().format("%Y%m%d%H%M%S"));
        info!(call_id = ?ctx.call_id, appointment_id = %appointment_id, "appointment scheduled");
        Ok(json!({
            "success": true,
            "appointment_id": appointment_id,
            "date": date,
            "time": time,
            "service_type": service_type,
            "confirmation_number": appointment_id,
            "message": format!("Appointment scheduled for {date} at {time}"),
        }))
    }
}

// ─── escalate_to_human ───────────────────────────────────────────

struct EscalateToHuman {
    escalation: Arc<EscalationCoordinator>,
    call_state: Arc<CallStateMachine>,
}

#[async_trait]
impl ToolHandler for EscalateToHuman {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let Some(call_id) = ctx.call_id.as_deref() else {
            return Ok(json!({ "error": "call_id is required for escalation" }));
        };
        let reason = str_arg(&args, "reason").unwrap_or("customer_request");
        let priority = str_arg(&args, "priority").unwrap_or("medium");

        let trigger_type = match reason {
            "customer_request" => TriggerType::CustomerRequest,
            // complex_issue, technical_problem
            _ => TriggerType::Complexity,
        };
        let trigger = EscalationTrigger {
            trigger_type,
            reason: reason.to_string(),
            details: json!({ "reason": reason, "priority": priority }),
        };

        let escalation = self
            .escalation
            .escalate(call_id, trigger)
            .await
            .map_err(|e| BridgeError::ToolExecution(format!("Escalation failed: {e}")))?;

        if let Err(e) = self
            .call_state
            .transition(call_id, CallEvent::EscalationRequested)
            .await
        {
            warn!(call_id = %call_id, error = %e, "escalated call could not change status");
        }

        Ok(json!({
            "success": true,
            "escalation_id": escalation.id,
            "status": "pending",
            "message": "Call escalation initiated. You will be connected to a specialist shortly.",
        }))
    }
}

// ─── search_knowledge_base ───────────────────────────────────────

struct SearchKnowledgeBase {
    pipeline: Option<Arc<RetrievalPipeline>>,
}

#[async_trait]
impl ToolHandler for SearchKnowledgeBase {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let Some(query) = str_arg(&args, "query") else {
            return Ok(json!({ "error": "query is required" }));
        };
        let Some(pipeline) = &self.pipeline else {
            return Ok(json!({ "error": "Knowledge base not available" }));
        };

        let mut request = SearchRequest::new(query);
        request.namespace = ctx.business_id.clone();
        request.category = str_arg(&args, "category").map(str::to_string);
        request.vendor = str_arg(&args, "vendor").map(str::to_string);
        request.top_k = Some(3);

        let results = pipeline
            .search(&request)
            .await
            .map_err(|e| BridgeError::ToolExecution(format!("Knowledge search failed: {e}")))?;
        let spoken = pipeline.voice_formatter().format_for_voice(&results);

        Ok(json!({
            "success": true,
            "query": query,
            "results": results
                .iter()
                .map(|r| json!({
                    "content": r.metadata.content,
                    "source": r.metadata.source.clone().unwrap_or_default(),
                    "relevance_score": r.score,
                }))
                .collect::<Vec<_>>(),
            "count": results.len(),
            "spoken_summary": spoken,
        }))
    }
}

// ─── check_order_status ──────────────────────────────────────────

struct CheckOrderStatus;

#[async_trait]
impl ToolHandler for CheckOrderStatus {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let Some(order_id) = str_arg(&args, "order_id") else {
            return Ok(json!({ "error": "order_id is required" }));
        };

        info!(call_id = ?ctx.call_id, order_id = %order_id, "order status checked");
        Ok(json!({
            "order_id": order_id,
            "status": "shipped",
            "tracking_number": format!("TRACK-{order_id}"),
            "estimated_delivery": "2024-01-20",
            "items": [
                { "name": "Product A", "quantity": 1, "status": "shipped" },
            ],
            "shipping_address": "123 Main St, City, State 12345",
        }))
    }
}

// ─── create_support_ticket ───────────────────────────────────────

struct CreateSupportTicket;

#[async_trait]
impl ToolHandler for CreateSupportTicket {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let (Some(subject), Some(description)) =
            (str_arg(&args, "subject"), str_arg(&args, "description"))
        else {
            return Ok(json!({ "error": "subject and description are required" }));
        };
        let priority = str_arg(&args, "priority").unwrap_or("medium");

        let ticket_id = format!("TICKET-{}", Utc::now().format("%Y%m%d%H%M%S"));
        info!(
            call_id = ?ctx.call_id,
            ticket_id = %ticket_id,
            description_chars = description.len(),
            "support ticket created"
        );
        Ok(json!({
            "success": true,
            "ticket_id": ticket_id,
            "subject": subject,
            "priority": priority,
            "status": "open",
            "message": format!("Support ticket {ticket_id} has been created"),
        }))
    }
}

// ─── get_business_hours ──────────────────────────────────────────

struct GetBusinessHours;

#[async_trait]
impl ToolHandler for GetBusinessHours {
    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(json!({
            "monday": { "open": "09:00", "close": "17:00" },
            "tuesday": { "open": "09:00", "close": "17:00" },
            "wednesday": { "open": "09:00", "close": "17:00" },
            "thursday": { "open": "09:00", "close": "17:00" },
            "friday": { "open": "09:00", "close": "17:00" },
            "saturday": { "open": "10:00", "close": "14:00" },
            "sunday": { "closed": true },
            "timezone": "America/New_York",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KnowledgeConfig, ToolsConfig};
    use crate::knowledge::{ChunkMetadata, HashEmbedder, InMemoryVectorStore};
    use crate::store::CallStore;
    use crate::types::{CallDirection, CallStatus, HumanAgent, Speaker};

    async fn dispatcher_with_deps() -> (ToolDispatcher, Arc<CallStore>, String) {
        let store = Arc::new(CallStore::in_memory().unwrap());
        store
            .upsert_agent(&HumanAgent {
                id: "a1".to_string(),
                name: "Agent One".to_string(),
                email: "a1@example.com".to_string(),
                is_available: true,
                is_active: true,
                skills: vec![],
                departments: vec![],
                active_escalations: 0,
                total_escalations: 0,
                last_active_at: None,
            })
            .await
            .unwrap();
        let call = store
            .create_call(Some("CA1"), CallDirection::Inbound, "a", "b", None, json!({}))
            .await
            .unwrap();
        store
            .update_call_status(&call.id, CallStatus::InProgress)
            .await
            .unwrap();
        store
            .add_interaction(&call.id, Speaker::Customer, "please get me a human agent", None, json!({}))
            .await
            .unwrap();

        let mut knowledge_config = KnowledgeConfig::default();
        knowledge_config.similarity_threshold = 0.0;
        knowledge_config.cross_encoder = false;
        let pipeline = Arc::new(RetrievalPipeline::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::default()),
            None,
            knowledge_config,
        ));
        pipeline
            .ingest(
                vec![(
                    "kb-1".to_string(),
                    ChunkMetadata {
                        title: Some("Hours".to_string()),
                        content: "We are open weekdays nine to five.".to_string(),
                        ..Default::default()
                    },
                )],
                None,
            )
            .await
            .unwrap();

        let deps = BuiltinToolDeps {
            escalation: Arc::new(EscalationCoordinator::new(store.clone())),
            call_state: Arc::new(CallStateMachine::new(store.clone())),
            knowledge: Some(pipeline),
        };
        let mut dispatcher = ToolDispatcher::new(&ToolsConfig::default());
        register_builtin(&mut dispatcher, deps);
        (dispatcher, store, call.id)
    }

    #[tokio::test]
    async fn test_all_seven_tools_registered() {
        let (dispatcher, _store, _call_id) = dispatcher_with_deps().await;
        let names = dispatcher.tool_names();
        for expected in [
            "check_order_status",
            "create_support_ticket",
            "escalate_to_human",
            "get_business_hours",
            "lookup_customer",
            "schedule_appointment",
            "search_knowledge_base",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_lookup_customer_requires_identifier() {
        let (dispatcher, _store, _call_id) = dispatcher_with_deps().await;
        let result = dispatcher
            .dispatch("lookup_customer", json!({}), &ToolContext::default())
            .await;
        assert!(result["error"].as_str().is_some());

        let result = dispatcher
            .dispatch(
                "lookup_customer",
                json!({"phone_number": "+15550001"}),
                &ToolContext::default(),
            )
            .await;
        assert_eq!(result["found"], true);
        assert_eq!(result["phone"], "+15550001");
    }

    #[tokio::test]
    async fn test_schedule_appointment_validation() {
        let (dispatcher, _store, _call_id) = dispatcher_with_deps().await;
        let result = dispatcher
            .dispatch(
                "schedule_appointment",
                json!({"date": "2026-08-10"}),
                &ToolContext::default(),
            )
            .await;
        assert!(result["error"].as_str().unwrap().contains("required"));

        let result = dispatcher
            .dispatch(
                "schedule_appointment",
                json!({"date": "2026-08-10", "time": "14:00", "service_type": "consultation"}),
                &ToolContext::default(),
            )
            .await;
        assert_eq!(result["success"], true);
        assert!(result["appointment_id"].as_str().unwrap().starts_with("APT-"));
    }

    #[tokio::test]
    async fn test_check_order_status() {
        let (dispatcher, _store, _call_id) = dispatcher_with_deps().await;
        let result = dispatcher
            .dispatch(
                "check_order_status",
                json!({"order_id": "ORD-42"}),
                &ToolContext::default(),
            )
            .await;
        assert_eq!(result["order_id"], "ORD-42");
        assert_eq!(result["status"], "shipped");
        assert_eq!(result["tracking_number"], "TRACK-ORD-42");
    }

    #[tokio::test]
    async fn test_escalate_to_human_full_flow() {
        let (dispatcher, store, call_id) = dispatcher_with_deps().await;
        let ctx = ToolContext::for_call(call_id.clone(), None);
        let result = dispatcher
            .dispatch(
                "escalate_to_human",
                json!({"reason": "customer_request", "priority": "high"}),
                &ctx,
            )
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["status"], "pending");

        let call = store.get_call(&call_id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Escalated);
        assert!(call.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_escalate_without_call_context() {
        let (dispatcher, _store, _call_id) = dispatcher_with_deps().await;
        let result = dispatcher
            .dispatch("escalate_to_human", json!({}), &ToolContext::default())
            .await;
        assert!(result["error"].as_str().unwrap().contains("call_id"));
    }

    #[tokio::test]
    async fn test_search_knowledge_base() {
        let (dispatcher, _store, _call_id) = dispatcher_with_deps().await;
        let result = dispatcher
            .dispatch(
                "search_knowledge_base",
                json!({"query": "when are you open on weekdays"}),
                &ToolContext::default(),
            )
            .await;
        assert_eq!(result["success"], true);
        assert!(result["count"].as_u64().unwrap() >= 1);
        assert!(result["results"][0]["content"].as_str().unwrap().contains("weekdays"));

        let result = dispatcher
            .dispatch("search_knowledge_base", json!({}), &ToolContext::default())
            .await;
        assert!(result["error"].as_str().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn test_create_support_ticket_and_hours() {
        let (dispatcher, _store, _call_id) = dispatcher_with_deps().await;
        let result = dispatcher
            .dispatch(
                "create_support_ticket",
                json!({"subject": "Broken webhook", "description": "Status callbacks stopped"}),
                &ToolContext::default(),
            )
            .await;
        assert_eq!(result["success"], true);
        assert!(result["ticket_id"].as_str().unwrap().starts_with("TICKET-"));

        let hours = dispatcher
            .dispatch("get_business_hours", json!({}), &ToolContext::default())
            .await;
        assert_eq!(hours["monday"]["open"], "09:00");
        assert_eq!(hours["sunday"]["closed"], true);
    }
}
