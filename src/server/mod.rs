//! Carrier-facing web surface
//!
//! Three routes: `/voice` returns the TwiML bootstrap that connects
//! the carrier to our media stream, `/status` consumes call-status
//! callbacks and drives the state machine, and `/media-stream` is the
//! per-call WebSocket. Both webhooks are idempotent on the call SID.

use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::BridgeError;
use crate::knowledge::{
    EmbeddingCache, Embedder, HashEmbedder, HttpEmbedder, InMemoryVectorStore, RelevanceModel,
    RetrievalPipeline,
};
use crate::store::CallStore;
use crate::telephony::media_stream::{generate_twiml, handle_media_stream};
use crate::telephony::CallManager;
use crate::types::CallDirection;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub manager: Arc<CallManager>,
}

/// Build the retrieval pipeline from config: a real embedder and
/// cross-encoder when an API key is present, the deterministic hash
/// embedder otherwise.
pub fn build_knowledge_pipeline(config: &Config) -> Arc<RetrievalPipeline> {
    let api_key = config.realtime.resolve_api_key();
    let embedder: Arc<dyn Embedder> = match api_key.clone() {
        Some(key) => Arc::new(HttpEmbedder::new(
            key,
            config.knowledge.embedding_model.clone(),
            Arc::new(EmbeddingCache::new()),
        )),
        None => Arc::new(HashEmbedder::default()),
    };
    let relevance = api_key
        .map(|key| Arc::new(RelevanceModel::new(key, config.knowledge.rerank_model.clone())));
    Arc::new(RetrievalPipeline::new(
        Arc::new(InMemoryVectorStore::new()),
        embedder,
        relevance,
        config.knowledge.clone(),
    ))
}

/// Start the webhook + media-stream server.
pub async fn start(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let store = Arc::new(
        CallStore::new(config.database_path())
            .await
            .context("failed to open call store")?,
    );
    let knowledge = build_knowledge_pipeline(&config);
    let manager = Arc::new(CallManager::new(config.clone(), store, Some(knowledge)));

    let state = ServerState {
        config: config.clone(),
        manager,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/voice", post(voice_webhook))
        .route("/status", post(status_webhook))
        .route("/media-stream", get(media_stream_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!(addr = %addr, "voicebridge listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server address")?;
    axum::serve(listener, app).await.context("server error")
}

#[derive(Debug, Deserialize)]
struct VoiceWebhookParams {
    #[serde(rename = "CallSid")]
    call_sid: String,
    #[serde(rename = "From", default)]
    from: Option<String>,
    #[serde(rename = "To", default)]
    to: Option<String>,
    #[serde(rename = "Direction", default)]
    direction: Option<String>,
}

/// `/voice`: make sure a call row exists for the SID, then return the
/// TwiML that connects the carrier to the media stream.
async fn voice_webhook(
    State(state): State<ServerState>,
    Form(params): Form<VoiceWebhookParams>,
) -> Response {
    let store = state.manager.store();
    let existing = store.get_call_by_sid(&params.call_sid).await;
    match existing {
        Ok(Some(_)) => {}
        Ok(None) => {
            let direction = params
                .direction
                .as_deref()
                .and_then(CallDirection::parse)
                .unwrap_or(CallDirection::Inbound);
            if let Err(e) = store
                .create_call(
                    Some(&params.call_sid),
                    direction,
                    params.from.as_deref().unwrap_or("unknown"),
                    params.to.as_deref().unwrap_or("unknown"),
                    None,
                    serde_json::json!({}),
                )
                .await
            {
                warn!(call_sid = %params.call_sid, error = %e, "failed to create call row");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            info!(call_sid = %params.call_sid, "call registered from voice webhook");
        }
        Err(e) => {
            warn!(call_sid = %params.call_sid, error = %e, "call lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let twiml = generate_twiml(
        &state.config.server.media_stream_url(),
        &state.config.agent.greeting,
        &[],
    );
    ([(header::CONTENT_TYPE, "application/xml")], twiml).into_response()
}

#[derive(Debug, Deserialize)]
struct StatusWebhookParams {
    #[serde(rename = "CallSid")]
    call_sid: String,
    #[serde(rename = "CallStatus")]
    call_status: String,
}

/// `/status`: map the carrier status onto a state-machine event.
/// Always answers 200 so the carrier does not retry storms at us;
/// problems are logged.
async fn status_webhook(
    State(state): State<ServerState>,
    Form(params): Form<StatusWebhookParams>,
) -> StatusCode {
    match state
        .manager
        .call_state()
        .apply_carrier_status(&params.call_sid, &params.call_status)
        .await
    {
        Ok(status) => {
            info!(call_sid = %params.call_sid, status = %status, "carrier status applied");
            // A terminal carrier status also tears down any bridge
            // still registered for the SID.
            if status.is_terminal() {
                state.manager.stop_call_bridge(&params.call_sid).await;
            }
        }
        Err(BridgeError::NotFound(_)) => {
            warn!(call_sid = %params.call_sid, "status callback for unknown call");
        }
        Err(e) => {
            warn!(call_sid = %params.call_sid, error = %e, "status callback rejected");
        }
    }
    StatusCode::OK
}

async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> Response {
    let manager = state.manager.clone();
    ws.on_upgrade(move |socket| handle_media_stream(socket, manager))
}

async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let active = state.manager.active_call_count().await;
    axum::Json(serde_json::json!({
        "status": "ok",
        "active_calls": active,
        "version": crate::VERSION,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_knowledge_pipeline_without_key() {
        // No API key in the default config (ignoring ambient env).
        let mut config = Config::default();
        config.realtime.api_key = None;
        if std::env::var("OPENAI_API_KEY").is_err() {
            let _pipeline = build_knowledge_pipeline(&config);
        }
    }

    #[test]
    fn test_voice_params_parse_form() {
        let params: VoiceWebhookParams =
            serde_urlencoded_from_str("CallSid=CA1&From=%2B15550001&To=%2B15550002&Direction=inbound");
        assert_eq!(params.call_sid, "CA1");
        assert_eq!(params.from.as_deref(), Some("+15550001"));
        assert_eq!(params.direction.as_deref(), Some("inbound"));
    }

    #[test]
    fn test_status_params_parse_form() {
        let params: StatusWebhookParams =
            serde_urlencoded_from_str("CallSid=CA1&CallStatus=completed");
        assert_eq!(params.call_sid, "CA1");
        assert_eq!(params.call_status, "completed");
    }

    fn serde_urlencoded_from_str<T: serde::de::DeserializeOwned>(input: &str) -> T {
        serde_urlencoded::from_str(input).expect("valid form payload")
    }
}
