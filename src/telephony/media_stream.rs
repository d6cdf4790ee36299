//! Carrier media-stream endpoint
//!
//! One WebSocket per call, JSON text frames. Inbound `start` frames
//! register the call and open the model side; `media` frames carry
//! base64 µ-law 8 kHz payloads; `stop` tears the bridge down. Frames
//! the endpoint does not understand (`mark`, new event kinds) are
//! ignored safely. The endpoint never blocks on the model side: media
//! is handed off through the bridge's bounded queues.

use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::call_manager::CallManager;

/// Carrier frame schema, tagged on `event`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaStreamEvent {
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaPayload,
        #[serde(rename = "streamSid")]
        #[serde(default)]
        stream_sid: Option<String>,
    },
    Stop {
        #[serde(rename = "streamSid")]
        #[serde(default)]
        stream_sid: Option<String>,
    },
    Mark {
        #[serde(default)]
        mark: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "callSid")]
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(rename = "streamSid")]
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(rename = "customParameters")]
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub payload: String,
}

/// Build an outbound media frame: base64 µ-law under the known
/// streamSid.
pub fn media_frame(stream_sid: &str, ulaw: &[u8]) -> String {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": BASE64.encode(ulaw) },
    })
    .to_string()
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// TwiML bootstrap returned to the carrier: greet, then connect the
/// bidirectional stream. All attribute values are XML-escaped. The
/// carrier identifies the call in the `start` event payload, not in
/// the URL.
pub fn generate_twiml(
    websocket_url: &str,
    greeting: &str,
    parameters: &[(String, String)],
) -> String {
    let params_xml: String = parameters
        .iter()
        .map(|(name, value)| {
            format!(
                r#"<Parameter name="{}" value="{}" />"#,
                xml_escape(name),
                xml_escape(value)
            )
        })
        .collect();

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "<Response>",
            "<Say>{}</Say>",
            "<Connect>",
            r#"<Stream url="{}">{}</Stream>"#,
            "</Connect>",
            "</Response>",
        ),
        xml_escape(greeting),
        xml_escape(websocket_url),
        params_xml
    )
}

/// Drive one carrier media-stream connection to completion.
pub async fn handle_media_stream(socket: WebSocket, manager: Arc<CallManager>) {
    info!("media stream connected");
    let (ws_tx, mut ws_rx) = socket.split();
    let mut ws_tx = Some(ws_tx);

    let mut call_sid: Option<String> = None;
    let mut stream_sid: Option<String> = None;
    let mut writer_task: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(Ok(message)) = ws_rx.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let event = match serde_json::from_str::<MediaStreamEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "dropping unparseable media-stream frame");
                continue;
            }
        };

        match event {
            MediaStreamEvent::Start { start } => {
                let (Some(sid), Some(ssid)) = (start.call_sid.clone(), start.stream_sid.clone())
                else {
                    warn!("start event missing callSid or streamSid, bridge not registered");
                    continue;
                };

                match manager
                    .handle_stream_start(&sid, &ssid, &start.custom_parameters)
                    .await
                {
                    Ok(bridge) => {
                        info!(call_sid = %sid, stream_sid = %ssid, "media stream started");
                        call_sid = Some(sid);
                        stream_sid = Some(ssid.clone());

                        // Outbound pump: drain the bridge's µ-law
                        // frames into carrier media messages.
                        if let Some(mut tx) = ws_tx.take() {
                            let frames = bridge.outbound_frames();
                            writer_task = Some(tokio::spawn(async move {
                                while let Some(frame) = frames.pop().await {
                                    let message = media_frame(&ssid, &frame);
                                    if tx.send(Message::Text(message.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }));
                        }
                    }
                    Err(e) => {
                        warn!(call_sid = %sid, error = %e, "failed to start call bridge");
                        break;
                    }
                }
            }

            MediaStreamEvent::Media { media, .. } => {
                // Media before a registered start is silently ignored.
                let Some(sid) = call_sid.as_deref() else {
                    continue;
                };
                match BASE64.decode(media.payload.as_bytes()) {
                    Ok(ulaw) => manager.handle_media_stream_audio(sid, ulaw).await,
                    Err(e) => debug!(call_sid = %sid, error = %e, "dropping undecodable media payload"),
                }
            }

            MediaStreamEvent::Stop { .. } => {
                info!(call_sid = ?call_sid, stream_sid = ?stream_sid, "media stream stopped");
                if let Some(sid) = call_sid.as_deref() {
                    manager.handle_stream_stop(sid).await;
                }
                break;
            }

            MediaStreamEvent::Mark { .. } | MediaStreamEvent::Other => {}
        }
    }

    // The carrier socket can drop without a stop event.
    if let Some(sid) = call_sid.as_deref() {
        manager.handle_stream_stop(sid).await;
    }
    if let Some(task) = writer_task {
        task.abort();
    }
    info!(call_sid = ?call_sid, "media stream disconnected");
}
