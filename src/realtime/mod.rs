//! Model realtime session client
//!
//! One WebSocket per call. The first frame on the wire is always
//! `session.update`; every outbound frame goes through a single writer
//! task so that ordering guarantee holds by construction. The reader
//! task parses the typed event taxonomy, reassembles streamed tool-call
//! arguments, executes tools in-band (serially, which preserves
//! completion-order injection of their outputs), and forwards audio,
//! transcripts, and control events to the bridge through a channel.

pub mod events;
pub mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::audio;
use crate::config::RealtimeConfig;
use crate::error::{BridgeError, Result};
use crate::tools::{ToolContext, ToolDispatcher};
use events::{ClientEvent, ConversationItem, ServerEvent};
use session::SessionConfig;

/// Repeated protocol failures within this window terminate the bridge.
const PROTOCOL_FAILURE_LIMIT: usize = 10;
const PROTOCOL_FAILURE_WINDOW: Duration = Duration::from_secs(30);

/// Which side of the conversation a transcript belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSpeaker {
    User,
    Assistant,
}

/// Events delivered from the session to its owner (the bridge).
#[derive(Debug)]
pub enum SessionEvent {
    /// PCM16 24 kHz audio bytes, already base64-decoded.
    Audio(Vec<u8>),
    Transcript {
        text: String,
        speaker: TranscriptSpeaker,
        is_delta: bool,
    },
    /// Server VAD heard the caller start speaking.
    SpeechStarted,
    /// A new model response began.
    ResponseStarted,
    /// The current response finished emitting audio.
    ResponseAudioDone,
    /// Any other event, surfaced raw.
    Event(serde_json::Value),
    /// The session ended; `reason` is set for abnormal closure.
    Closed { reason: Option<String> },
}

/// Factory for realtime sessions.
#[derive(Clone)]
pub struct RealtimeClient {
    config: RealtimeConfig,
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }

    /// Connect, send `session.update`, and spawn the reader/writer
    /// tasks. Audio can only be sent through the returned handle, so
    /// no audio can precede the session update.
    pub async fn connect(
        &self,
        session_id: impl Into<String>,
        session_config: SessionConfig,
        dispatcher: Arc<ToolDispatcher>,
        tool_ctx: ToolContext,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<RealtimeSession> {
        session_config.validate()?;

        let api_key = self.config.resolve_api_key().ok_or_else(|| {
            BridgeError::Configuration("realtime API key is not configured".to_string())
        })?;
        let session_id = session_id.into();

        let url = format!("{}?model={}", self.config.api_url, self.config.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| BridgeError::Configuration(e.to_string()))?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let (ws, _) = timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| BridgeError::Transport("realtime connect timed out".to_string()))??;
        let (mut write, read) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
        let active = Arc::new(AtomicBool::new(true));
        let discard_audio = Arc::new(AtomicBool::new(false));

        let session = RealtimeSession {
            session_id: session_id.clone(),
            outbound: outbound_tx,
            active: active.clone(),
            discard_audio: discard_audio.clone(),
        };

        // First frame on the wire. Queued before the reader exists, so
        // nothing can get ahead of it.
        session
            .send_event(&ClientEvent::SessionUpdate {
                session: session_config.to_payload(),
            })
            .await?;

        let writer_active = active.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
            writer_active.store(false, Ordering::SeqCst);
        });

        let reader = SessionReader {
            session_id,
            session: session.clone(),
            dispatcher,
            tool_ctx,
            events_tx,
            discard_audio,
            active,
            read_timeout: Duration::from_secs(self.config.read_timeout_secs),
        };
        tokio::spawn(reader.run(read));

        Ok(session)
    }
}

/// Handle to a live realtime session.
#[derive(Clone)]
pub struct RealtimeSession {
    session_id: String,
    outbound: mpsc::Sender<Message>,
    active: Arc<AtomicBool>,
    discard_audio: Arc<AtomicBool>,
}

impl RealtimeSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.outbound
            .send(Message::text(text))
            .await
            .map_err(|_| BridgeError::Transport("realtime session closed".to_string()))
    }

    /// Append one chunk of caller audio (PCM16 24 kHz) and commit it.
    pub async fn send_audio(&self, pcm: &[i16]) -> Result<()> {
        if !self.is_active() {
            return Err(BridgeError::Transport("session is not active".to_string()));
        }
        let encoded = BASE64.encode(audio::pcm16_to_bytes(pcm));
        self.send_event(&ClientEvent::InputAudioAppend { audio: encoded })
            .await?;
        self.send_event(&ClientEvent::InputAudioCommit).await
    }

    /// Inject a user text message (operator intervention, testing).
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::Message {
                role: "user".to_string(),
                content: text.to_string(),
            },
        })
        .await
    }

    /// Abort in-flight speech. Audio deltas are discarded until the
    /// server signals the next response boundary.
    pub async fn interrupt(&self) -> Result<()> {
        self.discard_audio.store(true, Ordering::SeqCst);
        self.send_event(&ClientEvent::ResponseInterrupt).await
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Message::Close(None)).await;
            info!(session_id = %self.session_id, "realtime session closed");
        }
    }
}

/// Streamed tool-call arguments being reassembled.
#[derive(Debug, Default)]
struct PendingToolCall {
    arguments: String,
}

struct SessionReader {
    session_id: String,
    session: RealtimeSession,
    dispatcher: Arc<ToolDispatcher>,
    tool_ctx: ToolContext,
    events_tx: mpsc::Sender<SessionEvent>,
    discard_audio: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl SessionReader {
    async fn run<S>(self, mut read: S)
    where
        S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let mut pending: HashMap<String, PendingToolCall> = HashMap::new();
        let mut assistant_transcript = String::new();
        let mut protocol_failures: Vec<Instant> = Vec::new();
        let mut awaiting_pong = false;
        let mut close_reason: Option<String> = None;

        loop {
            let msg = match timeout(self.read_timeout, read.next()).await {
                Err(_) => {
                    // Keep-alive: one unanswered ping is tolerated,
                    // a second silent interval is a dead socket.
                    if awaiting_pong {
                        close_reason = Some("read timeout".to_string());
                        break;
                    }
                    awaiting_pong = true;
                    if self
                        .session
                        .outbound
                        .send(Message::Ping(Vec::new().into()))
                        .await
                        .is_err()
                    {
                        close_reason = Some("writer gone".to_string());
                        break;
                    }
                    continue;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    close_reason = Some(e.to_string());
                    break;
                }
                Ok(Some(Ok(msg))) => {
                    awaiting_pong = false;
                    msg
                }
            };

            match msg {
                Message::Text(text) => {
                    let raw: serde_json::Value = match serde_json::from_str(text.as_str()) {
                        Ok(value) => value,
                        Err(e) => {
                            if record_protocol_failure(&mut protocol_failures) {
                                close_reason =
                                    Some("too many malformed events".to_string());
                                break;
                            }
                            warn!(session_id = %self.session_id, error = %e, "dropping malformed event");
                            continue;
                        }
                    };
                    let event = serde_json::from_value::<ServerEvent>(raw.clone())
                        .unwrap_or(ServerEvent::Unknown);
                    let fatal = self
                        .handle_event(
                            event,
                            raw,
                            &mut pending,
                            &mut assistant_transcript,
                            &mut protocol_failures,
                        )
                        .await;
                    if fatal {
                        close_reason = Some("too many malformed events".to_string());
                        break;
                    }
                }
                Message::Ping(payload) => {
                    let _ = self.session.outbound.send(Message::Pong(payload)).await;
                }
                Message::Close(frame) => {
                    debug!(session_id = %self.session_id, ?frame, "server closed session");
                    break;
                }
                _ => {}
            }
        }

        self.active.store(false, Ordering::SeqCst);
        if let Some(ref reason) = close_reason {
            error!(session_id = %self.session_id, reason = %reason, "realtime session ended abnormally");
        } else {
            info!(session_id = %self.session_id, "realtime session ended");
        }
        let _ = self
            .events_tx
            .send(SessionEvent::Closed {
                reason: close_reason,
            })
            .await;
    }

    async fn handle_event(
        &self,
        event: ServerEvent,
        raw: serde_json::Value,
        pending: &mut HashMap<String, PendingToolCall>,
        assistant_transcript: &mut String,
        protocol_failures: &mut Vec<Instant>,
    ) -> bool {
        match event {
            ServerEvent::AudioDelta { delta } => {
                if self.discard_audio.load(Ordering::SeqCst) {
                    return false;
                }
                match BASE64.decode(delta.as_bytes()) {
                    Ok(bytes) => {
                        let _ = self.events_tx.send(SessionEvent::Audio(bytes)).await;
                    }
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "dropping undecodable audio delta");
                        return record_protocol_failure(protocol_failures);
                    }
                }
            }

            ServerEvent::ResponseCreated => {
                // Response boundary: stop discarding post-interrupt audio.
                self.discard_audio.store(false, Ordering::SeqCst);
                let _ = self.events_tx.send(SessionEvent::ResponseStarted).await;
            }

            ServerEvent::AudioDone => {
                let _ = self.events_tx.send(SessionEvent::ResponseAudioDone).await;
            }

            ServerEvent::InputTranscriptionCompleted { transcript } => {
                if !transcript.is_empty() {
                    let _ = self
                        .events_tx
                        .send(SessionEvent::Transcript {
                            text: transcript,
                            speaker: TranscriptSpeaker::User,
                            is_delta: false,
                        })
                        .await;
                }
            }

            ServerEvent::AudioTranscriptDelta { delta } => {
                assistant_transcript.push_str(&delta);
                let _ = self
                    .events_tx
                    .send(SessionEvent::Transcript {
                        text: delta,
                        speaker: TranscriptSpeaker::Assistant,
                        is_delta: true,
                    })
                    .await;
            }

            ServerEvent::AudioTranscriptDone { transcript } => {
                let text = match transcript {
                    Some(t) if !t.is_empty() => t,
                    _ => std::mem::take(assistant_transcript),
                };
                assistant_transcript.clear();
                if !text.is_empty() {
                    let _ = self
                        .events_tx
                        .send(SessionEvent::Transcript {
                            text,
                            speaker: TranscriptSpeaker::Assistant,
                            is_delta: false,
                        })
                        .await;
                }
            }

            ServerEvent::FunctionCallArgumentsDelta {
                function_call_id,
                delta,
            } => {
                let Some(id) = function_call_id else {
                    warn!(session_id = %self.session_id, "arguments delta without function_call_id");
                    return false;
                };
                pending.entry(id).or_default().arguments.push_str(&delta);
            }

            ServerEvent::FunctionCallDone { function_call } => {
                let Some(id) = function_call.id else {
                    warn!(session_id = %self.session_id, "function_call.done without id");
                    return false;
                };
                // Buffered deltas win; fall back to event-embedded
                // arguments, then to an empty object.
                let arguments = pending
                    .remove(&id)
                    .map(|p| p.arguments)
                    .filter(|a| !a.is_empty())
                    .or(function_call.arguments)
                    .unwrap_or_else(|| "{}".to_string());
                let name = function_call.name.unwrap_or_default();
                self.execute_tool(&id, &name, &arguments).await;
            }

            ServerEvent::SpeechStarted => {
                let _ = self.events_tx.send(SessionEvent::SpeechStarted).await;
            }

            ServerEvent::Error { error } => {
                warn!(session_id = %self.session_id, error = %error, "realtime error event");
                let _ = self.events_tx.send(SessionEvent::Event(raw)).await;
            }

            ServerEvent::SessionCreated
            | ServerEvent::SessionUpdated
            | ServerEvent::SpeechStopped
            | ServerEvent::RateLimitsUpdated { .. }
            | ServerEvent::Unknown => {
                let _ = self.events_tx.send(SessionEvent::Event(raw)).await;
            }
        }
        false
    }

    /// Parse arguments, run the handler, inject the output. Executed
    /// inline so outputs are injected in completion order. A handler
    /// never runs with half-formed arguments.
    async fn execute_tool(&self, function_call_id: &str, name: &str, arguments: &str) {
        let output = match serde_json::from_str::<serde_json::Value>(arguments) {
            Ok(args) => {
                info!(session_id = %self.session_id, tool = %name, "executing tool");
                let result = self.dispatcher.dispatch(name, args, &self.tool_ctx).await;
                serde_json::to_string(&result)
                    .unwrap_or_else(|e| format!(r#"{{"error":"{e}"}}"#))
            }
            Err(e) => {
                warn!(session_id = %self.session_id, tool = %name, error = %e, "invalid tool arguments");
                r#"{"error":"invalid json arguments"}"#.to_string()
            }
        };

        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                function_call_id: function_call_id.to_string(),
                output,
            },
        };
        if let Err(e) = self.session.send_event(&event).await {
            error!(session_id = %self.session_id, error = %e, "failed to inject tool output");
        }
    }
}

/// Record a protocol failure; returns true when the failure budget in
/// the sliding window is exhausted.
fn record_protocol_failure(failures: &mut Vec<Instant>) -> bool {
    let now = Instant::now();
    failures.retain(|t| now.duration_since(*t) < PROTOCOL_FAILURE_WINDOW);
    failures.push(now);
    failures.len() > PROTOCOL_FAILURE_LIMIT
}
