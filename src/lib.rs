//! Voicebridge - Real-Time Telephony Voice Agent
//!
//! Bridges a telephony carrier's media streams (8 kHz µ-law over
//! WebSocket) to a realtime conversational model (24 kHz PCM16 over
//! WebSocket) for live phone calls:
//! - Per-call audio bridge with sample-rate conversion and barge-in
//! - Typed realtime protocol client with in-band tool execution
//! - Call lifecycle state machine with durable turn logging
//! - Escalation to human agents on sentiment/keyword/complexity
//! - Hybrid retrieval pipeline behind the knowledge-base tool
//!
//! # Example
//!
//! ```ignore
//! use voicebridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     voicebridge::server::start(config).await
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod error;
pub mod config;
pub mod audio;
pub mod store; // Must come before conversation/escalation which depend on it
pub mod conversation;
pub mod knowledge;
pub mod escalation;
pub mod realtime;
pub mod tools;
pub mod telephony;
pub mod server;
pub mod cli;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::BridgeError;
pub use store::CallStore;

pub use telephony::{Bridge, CallManager, CallStateMachine};

pub use realtime::{RealtimeClient, RealtimeSession};

pub use knowledge::{RetrievalPipeline, SearchRequest};

pub use types::{CallDirection, CallStatus, Speaker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Real-Time Telephony Voice Agent", NAME, VERSION)
}
