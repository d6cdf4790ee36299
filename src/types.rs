//! Shared types used across modules
//!
//! This module contains the call-domain types that are used by multiple
//! modules to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a call relative to this system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(CallDirection::Inbound),
            "outbound" => Some(CallDirection::Outbound),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a call.
///
/// `Completed`, `Failed`, and `Escalated` are terminal: once a call
/// reaches one of them `ended_at` is stamped and no further transition
/// is accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Escalated,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "in_progress" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "failed" => Some(CallStatus::Failed),
            "escalated" => Some(CallStatus::Escalated),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Failed | CallStatus::Escalated
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Ai,
    Customer,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Ai => "ai",
            Speaker::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(Speaker::Ai),
            "customer" => Some(Speaker::Customer),
            _ => None,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call row as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Internal stable call id (UUID).
    pub id: String,
    /// Carrier-assigned SID; unique when present.
    pub call_sid: Option<String>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub from_number: String,
    pub to_number: String,
    pub business_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Free-form metadata (agent personality, stream parameters, ...).
    pub meta: serde_json::Value,
}

/// One spoken turn of a call. Append-only, ordered by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    pub call_id: String,
    pub speaker: Speaker,
    pub text: String,
    pub audio_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub meta: serde_json::Value,
}

/// Status of an escalation to a human agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::InProgress => "in_progress",
            EscalationStatus::Completed => "completed",
            EscalationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EscalationStatus::Pending),
            "in_progress" => Some(EscalationStatus::InProgress),
            "completed" => Some(EscalationStatus::Completed),
            "cancelled" => Some(EscalationStatus::Cancelled),
            _ => None,
        }
    }
}

/// What caused an escalation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Sentiment,
    Keyword,
    Complexity,
    CustomerRequest,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Sentiment => "sentiment",
            TriggerType::Keyword => "keyword",
            TriggerType::Complexity => "complexity",
            TriggerType::CustomerRequest => "customer_request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sentiment" => Some(TriggerType::Sentiment),
            "keyword" => Some(TriggerType::Keyword),
            "complexity" => Some(TriggerType::Complexity),
            "customer_request" => Some(TriggerType::CustomerRequest),
            _ => None,
        }
    }
}

/// An escalation row as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: i64,
    pub call_id: String,
    pub status: EscalationStatus,
    pub trigger_type: TriggerType,
    pub trigger_details: serde_json::Value,
    pub assigned_agent_id: Option<String>,
    pub conversation_summary: Option<String>,
    pub context_data: serde_json::Value,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A human agent that escalated calls can be handed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanAgent {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_available: bool,
    pub is_active: bool,
    pub skills: Vec<String>,
    pub departments: Vec<String>,
    pub active_escalations: u32,
    pub total_escalations: u32,
    pub last_active_at: Option<DateTime<Utc>>,
}
