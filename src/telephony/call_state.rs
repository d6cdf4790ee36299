//! Call lifecycle state machine
//!
//! `initiated → ringing → in_progress → {completed, failed,
//! escalated}`. Transitions are driven by carrier status callbacks and
//! internal events, persisted through the store (which stamps
//! `ended_at` on terminal states), and broadcast to observers.
//! Illegal transitions are rejected and logged; re-delivery of an
//! event that lands on the current status is a no-op, which keeps the
//! carrier webhooks idempotent.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use crate::store::CallStore;
use crate::types::CallStatus;

/// Events that can move a call between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Carrier reports the far end is ringing.
    CarrierRinging,
    /// Carrier reports the call was answered.
    CarrierAnswered,
    /// The media stream opened (treated like answer for inbound).
    MediaStarted,
    /// Carrier reports normal completion.
    CarrierCompleted,
    /// Carrier reports busy / failed / no answer.
    CarrierFailed,
    /// The escalate tool fired.
    EscalationRequested,
    /// The bridge hit a fatal transport error.
    BridgeFailed,
}

/// A persisted status change, for observers.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub call_id: String,
    pub from: CallStatus,
    pub to: CallStatus,
}

fn next_status(current: CallStatus, event: CallEvent) -> Option<CallStatus> {
    use CallEvent::*;
    use CallStatus::*;
    match (current, event) {
        (Initiated, CarrierRinging) => Some(Ringing),
        (Initiated | Ringing, CarrierAnswered | MediaStarted) => Some(InProgress),
        (InProgress, MediaStarted) => Some(InProgress),
        (InProgress | Ringing, CarrierCompleted) => Some(Completed),
        (Initiated | Ringing, CarrierFailed) => Some(Failed),
        (InProgress, EscalationRequested) => Some(Escalated),
        (current, BridgeFailed) if !current.is_terminal() => Some(Failed),
        _ => None,
    }
}

pub struct CallStateMachine {
    store: Arc<CallStore>,
    changes: broadcast::Sender<StatusChange>,
}

impl CallStateMachine {
    pub fn new(store: Arc<CallStore>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { store, changes }
    }

    /// Apply an event to a call. Returns the resulting status; a
    /// repeated event that would not move the call is a no-op.
    pub async fn transition(&self, call_id: &str, event: CallEvent) -> Result<CallStatus> {
        let call = self
            .store
            .get_call(call_id)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("call {call_id}")))?;

        let Some(next) = next_status(call.status, event) else {
            warn!(
                call_id = %call_id,
                status = %call.status,
                ?event,
                "illegal call state transition rejected"
            );
            return Err(BridgeError::Protocol(format!(
                "illegal transition from {} on {:?}",
                call.status, event
            )));
        };

        if next == call.status {
            return Ok(next);
        }

        self.store.update_call_status(call_id, next).await?;
        info!(call_id = %call_id, from = %call.status, to = %next, "call status changed");
        let _ = self.changes.send(StatusChange {
            call_id: call_id.to_string(),
            from: call.status,
            to: next,
        });
        Ok(next)
    }

    /// Map a carrier status-callback value onto a transition. Repeated
    /// terminal callbacks for the same SID are absorbed, keeping the
    /// webhook idempotent.
    pub async fn apply_carrier_status(&self, call_sid: &str, raw_status: &str) -> Result<CallStatus> {
        let call = self
            .store
            .get_call_by_sid(call_sid)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("call sid {call_sid}")))?;

        let event = match raw_status {
            "queued" | "initiated" => return Ok(call.status),
            "ringing" => CallEvent::CarrierRinging,
            "answered" | "in-progress" => CallEvent::CarrierAnswered,
            "completed" => CallEvent::CarrierCompleted,
            "busy" | "failed" | "no-answer" | "canceled" => CallEvent::CarrierFailed,
            other => {
                return Err(BridgeError::Protocol(format!(
                    "unknown carrier status: {other}"
                )))
            }
        };

        if call.status.is_terminal() {
            // Carrier retries its terminal callback; nothing to do.
            return Ok(call.status);
        }
        self.transition(&call.id, event).await
    }

    /// Subscribe to persisted status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }
}
