//! Typed event taxonomy for the model realtime protocol
//!
//! Both directions are serde-tagged on `type`. Server events the
//! client does not model explicitly fall into `Unknown` and are still
//! surfaced raw through the session event channel.

use serde::{Deserialize, Serialize};

/// Events consumed from the model server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// A new model response has started; marks the boundary after
    /// which previously discarded audio resumes delivery.
    #[serde(rename = "response.created")]
    ResponseCreated,

    /// Base64 PCM16 24 kHz audio chunk.
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    /// Final caller-side transcript of the most recent user turn.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// Assistant transcript delta.
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    /// Assistant transcript complete for the current response.
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Streamed piece of a tool call's JSON arguments.
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        function_call_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    /// Tool call finished streaming; arguments must now be parsed and
    /// the handler executed.
    #[serde(rename = "response.function_call.done")]
    FunctionCallDone {
        #[serde(default)]
        function_call: FunctionCall,
    },

    /// Server VAD detected the caller speaking (barge-in signal).
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: serde_json::Value,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

/// Identity and (optionally embedded) arguments of a finished tool
/// call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Events emitted to the model server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: serde_json::Value },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Abort in-flight speech on caller barge-in. The original
    /// protocol client used this event name; confirm against the
    /// current protocol revision before changing it.
    #[serde(rename = "response.interrupt")]
    ResponseInterrupt,
}

/// Items injectable into the model conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput {
        function_call_id: String,
        /// JSON-stringified tool result.
        output: String,
    },

    #[serde(rename = "message")]
    Message { role: String, content: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_audio_delta() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).unwrap();
        assert!(matches!(event, ServerEvent::AudioDelta { delta } if delta == "AAAA"));
    }

    #[test]
    fn test_parse_input_transcription() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello"}"#,
        )
        .unwrap();
        assert!(
            matches!(event, ServerEvent::InputTranscriptionCompleted { transcript } if transcript == "hello")
        );
    }

    #[test]
    fn test_parse_function_call_done_with_embedded_args() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.function_call.done",
                "function_call":{"id":"fc_1","name":"check_order_status","arguments":"{\"order_id\":\"ORD-42\"}"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::FunctionCallDone { function_call } => {
                assert_eq!(function_call.id.as_deref(), Some("fc_1"));
                assert_eq!(function_call.name.as_deref(), Some("check_order_status"));
                assert!(function_call.arguments.unwrap().contains("ORD-42"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"response.output_item.added","item":{}}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_serialize_tool_output() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                function_call_id: "fc_1".to_string(),
                output: r#"{"status":"shipped"}"#.to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversation.item.create");
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["function_call_id"], "fc_1");
    }

    #[test]
    fn test_serialize_unit_events() {
        let commit = serde_json::to_value(&ClientEvent::InputAudioCommit).unwrap();
        assert_eq!(commit["type"], "input_audio_buffer.commit");
        let interrupt = serde_json::to_value(&ClientEvent::ResponseInterrupt).unwrap();
        assert_eq!(interrupt["type"], "response.interrupt");
    }
}
