//! Configuration management
//!
//! Manages bridge configuration: realtime model session settings,
//! webhook server, storage, agent personalities, escalation triggers,
//! and retrieval tuning. Loaded from TOML with serde defaults so a
//! missing file or partial file still yields a runnable config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Webhook + media-stream server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Realtime model session settings
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Default agent behaviour and named personalities
    #[serde(default)]
    pub agent: AgentConfig,
    /// Per-business overrides, keyed by business id
    #[serde(default)]
    pub businesses: HashMap<String, BusinessProfile>,
    /// Escalation trigger rules
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Retrieval pipeline tuning
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    /// Tool execution limits
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load from the default location, falling back to defaults if the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Default config file location (`~/.config/voicebridge/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("voicebridge").join("config.toml"))
    }

    /// Default database location (`~/.local/share/voicebridge/calls.db`).
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref path) = self.storage.db_path {
            return path.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicebridge")
            .join("calls.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL the carrier reaches us at, e.g.
    /// `https://agent.example.com`. Used to build the media-stream
    /// WebSocket URL in the TwiML bootstrap.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// WebSocket URL for the media stream, derived from `public_url`.
    pub fn media_stream_url(&self) -> String {
        match self.public_url.as_deref() {
            Some(base) => {
                let ws = base
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                format!("{}/media-stream", ws.trim_end_matches('/'))
            }
            None => format!("ws://{}:{}/media-stream", self.host, self.port),
        }
    }
}

/// Realtime model session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the realtime API.
    #[serde(default = "default_realtime_url")]
    pub api_url: String,
    #[serde(default = "default_realtime_model")]
    pub model: String,
    /// API key; falls back to `OPENAI_API_KEY` when unset.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub api_key: Option<String>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub vad: VadConfig,
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_response_tokens() -> u32 {
    4096
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_url: default_realtime_url(),
            model: default_realtime_model(),
            api_key: None,
            voice: default_voice(),
            temperature: default_temperature(),
            max_response_tokens: default_max_response_tokens(),
            transcription_model: default_transcription_model(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            vad: VadConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// Server-side voice activity detection settings sent in `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    500
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path; defaults to the platform data directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Default agent behaviour plus named personalities selectable per
/// call (via call metadata) or per business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Spoken by the carrier's `<Say>` while the stream connects.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default)]
    pub default_personality: Option<String>,
    #[serde(default)]
    pub personalities: HashMap<String, Personality>,
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant handling a phone call. \
     Be professional, friendly, and concise."
        .to_string()
}

fn default_greeting() -> String {
    "Connecting you to our assistant.".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            greeting: default_greeting(),
            default_personality: None,
            personalities: HashMap::new(),
        }
    }
}

/// A named agent personality: prompt, voice settings, and which tool
/// set the session advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub system_prompt: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// `customer_support` (default), `sales`, or `appointment`.
    #[serde(default)]
    pub toolset: Option<String>,
}

/// Per-business configuration consulted when a call carries a
/// `business_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub name: String,
    #[serde(default)]
    pub business_type: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Escalation trigger rules evaluated against each customer turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Vec<TriggerRule>,
}

fn default_true() -> bool {
    true
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            triggers: Vec::new(),
        }
    }
}

/// One escalation trigger rule. `trigger` selects the evaluator:
/// `sentiment` (score <= threshold), `keyword` (substring match), or
/// `complexity` (normalized score >= threshold).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRule {
    pub trigger: String,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Retrieval pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: f32,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
    /// Cross-encoder rerank; falls back to term overlap when disabled
    /// or failing.
    #[serde(default = "default_true")]
    pub cross_encoder: bool,
    /// One-call LLM query rewrite before retrieval.
    #[serde(default)]
    pub query_rewrite: bool,
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_semantic_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_diversity_threshold() -> f32 {
    0.7
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_rerank_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            diversity_threshold: default_diversity_threshold(),
            cache_enabled: true,
            embedding_model: default_embedding_model(),
            rerank_model: default_rerank_model(),
            cross_encoder: true,
            query_rewrite: false,
        }
    }
}

/// Tool execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Soft timeout applied to every handler unless overridden.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    /// Per-tool overrides, e.g. a longer budget for web research.
    #[serde(default)]
    pub timeout_overrides: HashMap<String, u64>,
}

fn default_tool_timeout() -> u64 {
    10
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            timeout_overrides: HashMap::new(),
        }
    }
}
