//! Session configuration for the model realtime protocol
//!
//! Built per call from config, personality, and tool set, validated
//! before connect, and serialized into the `session.update` payload
//! that must be the first frame on the wire.

use serde_json::json;

use crate::config::VadConfig;
use crate::error::{BridgeError, Result};

/// JSON-function-calling tool schema advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Wire shape: `{type:"function", function:{name, description, parameters}}`.
    pub fn to_value(&self) -> serde_json::Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Per-call session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub voice: String,
    pub instructions: String,
    pub temperature: f32,
    pub max_response_output_tokens: u32,
    pub transcription_model: String,
    pub vad: VadConfig,
    pub tools: Vec<ToolSchema>,
}

impl SessionConfig {
    /// Fail fast on invariant violations; a bridge must never
    /// partially start with a broken session.
    pub fn validate(&self) -> Result<()> {
        if self.instructions.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "session instructions must not be empty".to_string(),
            ));
        }
        if self.voice.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "session voice must not be empty".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(BridgeError::Configuration(format!(
                    "duplicate tool name: {}",
                    tool.name
                )));
            }
        }
        Ok(())
    }

    /// Append extra instructions (business context, operator notes).
    pub fn with_extra_instructions(mut self, extra: Option<&str>) -> Self {
        if let Some(extra) = extra {
            if !extra.trim().is_empty() {
                self.instructions.push_str("\n\n");
                self.instructions.push_str(extra);
            }
        }
        self
    }

    /// The `session` object of the `session.update` event.
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "modalities": ["audio", "text"],
            "voice": self.voice,
            "instructions": self.instructions,
            "temperature": self.temperature,
            "max_response_output_tokens": self.max_response_output_tokens,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": {
                "model": self.transcription_model,
            },
            "turn_detection": {
                "type": "server_vad",
                "threshold": self.vad.threshold,
                "prefix_padding_ms": self.vad.prefix_padding_ms,
                "silence_duration_ms": self.vad.silence_duration_ms,
            },
            "tools": self.tools.iter().map(ToolSchema::to_value).collect::<Vec<_>>(),
        })
    }
}
