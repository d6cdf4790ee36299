//! Per-call bridge between the carrier media stream and the model
//! session
//!
//! Owns both directions: carrier µ-law frames are decoded, upsampled
//! to 24 kHz, and pushed into the model's input buffer; model audio is
//! downsampled to 8 kHz, µ-law encoded, and queued for the carrier
//! writer. Finalized transcripts are persisted as turns, customer
//! turns are run through the escalation triggers, and caller barge-in
//! interrupts in-flight model speech.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::call_state::{CallEvent, CallStateMachine};
use super::{FrameQueue, DEFAULT_FRAME_CAPACITY};
use crate::audio;
use crate::config::EscalationConfig;
use crate::conversation::ConversationLog;
use crate::error::Result;
use crate::escalation::EscalationCoordinator;
use crate::realtime::session::SessionConfig;
use crate::realtime::{RealtimeClient, RealtimeSession, SessionEvent, TranscriptSpeaker};
use crate::tools::{ToolContext, ToolDispatcher};
use crate::types::Speaker;

/// Per-call bridge. One open carrier socket and one open model socket
/// for as long as the call is live.
pub struct Bridge {
    call_id: String,
    call_sid: String,
    client: RealtimeClient,
    dispatcher: Arc<ToolDispatcher>,
    escalation: Arc<EscalationCoordinator>,
    escalation_config: EscalationConfig,
    call_state: Arc<CallStateMachine>,
    conversation: Arc<ConversationLog>,
    business_id: Option<String>,

    session: RwLock<Option<RealtimeSession>>,
    /// Carrier → model frames (raw µ-law payloads).
    to_model: Arc<FrameQueue>,
    /// Model → carrier frames (encoded µ-law payloads).
    to_carrier: Arc<FrameQueue>,
    active: AtomicBool,
    model_speaking: Arc<AtomicBool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Bridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        call_id: impl Into<String>,
        call_sid: impl Into<String>,
        business_id: Option<String>,
        client: RealtimeClient,
        dispatcher: Arc<ToolDispatcher>,
        escalation: Arc<EscalationCoordinator>,
        escalation_config: EscalationConfig,
        call_state: Arc<CallStateMachine>,
        conversation: Arc<ConversationLog>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            call_sid: call_sid.into(),
            client,
            dispatcher,
            escalation,
            escalation_config,
            call_state,
            conversation,
            business_id,
            session: RwLock::new(None),
            to_model: Arc::new(FrameQueue::new(DEFAULT_FRAME_CAPACITY)),
            to_carrier: Arc::new(FrameQueue::new(DEFAULT_FRAME_CAPACITY)),
            active: AtomicBool::new(false),
            model_speaking: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue of encoded µ-law frames for the carrier writer task.
    pub fn outbound_frames(&self) -> Arc<FrameQueue> {
        self.to_carrier.clone()
    }

    /// Connect the model session and spin up the two pump tasks. Fails
    /// fast (and leaves nothing running) on a bad session config.
    pub async fn start(self: &Arc<Self>, session_config: SessionConfig) -> Result<()> {
        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);
        let tool_ctx = ToolContext::for_call(self.call_id.clone(), self.business_id.clone());
        let session_id = format!("{}_{}", self.call_id, self.call_sid);

        let session = self
            .client
            .connect(
                session_id,
                session_config,
                self.dispatcher.clone(),
                tool_ctx,
                events_tx,
            )
            .await?;
        *self.session.write().await = Some(session.clone());
        self.active.store(true, Ordering::SeqCst);

        let pump = tokio::spawn(Self::run_uplink(self.to_model.clone(), session));
        let events = tokio::spawn(self.clone().run_events(events_rx));
        let mut tasks = self.tasks.lock().await;
        tasks.push(pump);
        tasks.push(events);

        info!(call_id = %self.call_id, call_sid = %self.call_sid, "bridge started");
        Ok(())
    }

    /// Carrier → model pump: decode µ-law, upsample 8→24 kHz, append
    /// to the model's input buffer.
    async fn run_uplink(queue: Arc<FrameQueue>, session: RealtimeSession) {
        while let Some(frame) = queue.pop().await {
            let pcm = audio::decode_ulaw(&frame);
            let upsampled = audio::upsample_x3(&pcm);
            if let Err(e) = session.send_audio(&upsampled).await {
                debug!(error = %e, "uplink ended");
                break;
            }
        }
    }

    /// Model → bridge event loop: audio downlink, transcript
    /// persistence, barge-in, escalation triggers, session teardown.
    async fn run_events(self: Arc<Self>, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Audio(pcm_bytes) => {
                    self.model_speaking.store(true, Ordering::SeqCst);
                    let pcm = audio::pcm16_from_bytes(&pcm_bytes);
                    let downsampled = audio::downsample_div3(&pcm);
                    let ulaw = audio::encode_ulaw(&downsampled);
                    self.to_carrier.push(ulaw);
                }

                SessionEvent::ResponseStarted => {}

                SessionEvent::ResponseAudioDone => {
                    self.model_speaking.store(false, Ordering::SeqCst);
                }

                SessionEvent::SpeechStarted => {
                    // Caller barge-in over model speech.
                    if self.model_speaking.load(Ordering::SeqCst) {
                        self.interrupt().await;
                    }
                }

                SessionEvent::Transcript {
                    text,
                    speaker,
                    is_delta,
                } => {
                    // Deltas may drive UIs but are never persisted.
                    if is_delta {
                        continue;
                    }
                    self.handle_final_transcript(&text, speaker).await;
                }

                SessionEvent::Event(value) => {
                    debug!(call_id = %self.call_id, event = %value["type"], "session event");
                }

                SessionEvent::Closed { reason } => {
                    if let Some(reason) = reason {
                        error!(call_id = %self.call_id, reason = %reason, "model session failed");
                        if self.is_active() {
                            if let Err(e) = self
                                .call_state
                                .transition(&self.call_id, CallEvent::BridgeFailed)
                                .await
                            {
                                warn!(call_id = %self.call_id, error = %e, "failed to mark call failed");
                            }
                        }
                    }
                    self.stop().await;
                    break;
                }
            }
        }
    }

    async fn handle_final_transcript(&self, text: &str, speaker: TranscriptSpeaker) {
        let speaker = match speaker {
            TranscriptSpeaker::Assistant => Speaker::Ai,
            TranscriptSpeaker::User => Speaker::Customer,
        };
        if let Err(e) = self
            .conversation
            .add_interaction(speaker, text, None, None)
            .await
        {
            error!(call_id = %self.call_id, error = %e, "failed to persist turn");
        }

        if speaker == Speaker::Customer {
            if let Some(trigger) = self
                .escalation
                .check_triggers(text, &self.escalation_config)
            {
                info!(
                    call_id = %self.call_id,
                    trigger = trigger.trigger_type.as_str(),
                    "escalation trigger fired"
                );
                match self.escalation.escalate(&self.call_id, trigger).await {
                    Ok(_) => {
                        if let Err(e) = self
                            .call_state
                            .transition(&self.call_id, CallEvent::EscalationRequested)
                            .await
                        {
                            warn!(call_id = %self.call_id, error = %e, "escalated call kept its status");
                        }
                    }
                    Err(e) => warn!(call_id = %self.call_id, error = %e, "escalation failed"),
                }
            }
        }
    }

    /// Carrier audio ingress. Never blocks; when the model side stalls
    /// the queue sheds the oldest frames. No-op once stopped.
    pub fn handle_telephony_audio(&self, ulaw: Vec<u8>) {
        if !self.is_active() {
            return;
        }
        self.to_model.push(ulaw);
    }

    /// Inject a user text message into the model session.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let session = self.session.read().await;
        match session.as_ref() {
            Some(session) => session.send_text(text).await,
            None => Ok(()),
        }
    }

    /// Abort in-flight model speech; queued downlink audio is flushed
    /// so the caller does not hear the tail of the cancelled response.
    pub async fn interrupt(&self) {
        self.model_speaking.store(false, Ordering::SeqCst);
        self.to_carrier.clear();
        let session = self.session.read().await;
        if let Some(session) = session.as_ref() {
            if let Err(e) = session.interrupt().await {
                warn!(call_id = %self.call_id, error = %e, "interrupt failed");
            }
        }
    }

    /// Tear the bridge down. Idempotent; a second call is a no-op.
    pub async fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(session) = self.session.write().await.take() {
                session.close().await;
            }
            self.to_model.close();
            self.to_carrier.close();
            if self.to_model.dropped_count() > 0 || self.to_carrier.dropped_count() > 0 {
                info!(
                    call_id = %self.call_id,
                    uplink_dropped = self.to_model.dropped_count(),
                    downlink_dropped = self.to_carrier.dropped_count(),
                    "frames shed under backpressure"
                );
            }
            info!(call_id = %self.call_id, call_sid = %self.call_sid, "bridge stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RealtimeConfig, ToolsConfig};
    use crate::store::CallStore;
    use crate::types::CallDirection;

    fn test_bridge() -> Arc<Bridge> {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let conversation = Arc::new(ConversationLog::new("call-1", store.clone()));
        Arc::new(Bridge::new(
            "call-1",
            "CA1",
            None,
            RealtimeClient::new(RealtimeConfig::default()),
            Arc::new(ToolDispatcher::new(&ToolsConfig::default())),
            Arc::new(EscalationCoordinator::new(store.clone())),
            EscalationConfig::default(),
            Arc::new(CallStateMachine::new(store)),
            conversation,
        ))
    }

    #[tokio::test]
    async fn test_audio_dropped_when_inactive() {
        let bridge = test_bridge();
        assert!(!bridge.is_active());
        bridge.handle_telephony_audio(vec![0xFF; 160]);
        assert!(bridge.to_model.is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let bridge = test_bridge();
        bridge.active.store(true, Ordering::SeqCst);
        bridge.stop().await;
        assert!(!bridge.is_active());
        // Second stop must be a no-op, not a panic or double close.
        bridge.stop().await;
        assert!(!bridge.is_active());
    }

    #[tokio::test]
    async fn test_queues_closed_after_stop() {
        let bridge = test_bridge();
        bridge.active.store(true, Ordering::SeqCst);
        bridge.stop().await;
        assert!(!bridge.to_model.push(vec![1]));
        assert!(!bridge.to_carrier.push(vec![1]));
    }

    #[tokio::test]
    async fn test_final_transcripts_persisted_deltas_skipped() {
        let store = Arc::new(CallStore::in_memory().unwrap());
        let call = store
            .create_call(Some("CA1"), CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
            .await
            .unwrap();
        let conversation = Arc::new(ConversationLog::new(call.id.clone(), store.clone()));
        let bridge = Arc::new(Bridge::new(
            call.id.clone(),
            "CA1",
            None,
            RealtimeClient::new(RealtimeConfig::default()),
            Arc::new(ToolDispatcher::new(&ToolsConfig::default())),
            Arc::new(EscalationCoordinator::new(store.clone())),
            EscalationConfig::default(),
            Arc::new(CallStateMachine::new(store.clone())),
            conversation,
        ));

        let (tx, rx) = mpsc::channel(8);
        let events = tokio::spawn(bridge.clone().run_events(rx));

        tx.send(SessionEvent::Transcript {
            text: "hel".to_string(),
            speaker: TranscriptSpeaker::Assistant,
            is_delta: true,
        })
        .await
        .unwrap();
        tx.send(SessionEvent::Transcript {
            text: "hello".to_string(),
            speaker: TranscriptSpeaker::User,
            is_delta: false,
        })
        .await
        .unwrap();
        drop(tx);
        events.await.unwrap();

        let turns = store.interactions(&call.id, None).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "hello");
        assert_eq!(turns[0].speaker, Speaker::Customer);
    }
}
