//! Call manager
//!
//! Process-wide registry of live bridges keyed by carrier SID. Builds
//! each bridge's session from the call row, the resolved personality,
//! and the business profile, and routes media-stream events to the
//! right bridge.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::bridge::Bridge;
use super::call_state::{CallEvent, CallStateMachine};
use crate::config::{Config, Personality};
use crate::conversation::ConversationLog;
use crate::error::{BridgeError, Result};
use crate::escalation::EscalationCoordinator;
use crate::knowledge::RetrievalPipeline;
use crate::realtime::session::SessionConfig;
use crate::realtime::RealtimeClient;
use crate::store::CallStore;
use crate::tools::builtin::{register_builtin, BuiltinToolDeps};
use crate::tools::{schemas, ToolDispatcher};
use crate::types::{CallDirection, CallRecord};

/// Owns every live bridge in the process. Exactly one per process.
pub struct CallManager {
    config: Arc<Config>,
    store: Arc<CallStore>,
    call_state: Arc<CallStateMachine>,
    escalation: Arc<EscalationCoordinator>,
    dispatcher: Arc<ToolDispatcher>,
    client: RealtimeClient,
    bridges: Mutex<HashMap<String, Arc<Bridge>>>,
}

impl CallManager {
    pub fn new(
        config: Arc<Config>,
        store: Arc<CallStore>,
        knowledge: Option<Arc<RetrievalPipeline>>,
    ) -> Self {
        let call_state = Arc::new(CallStateMachine::new(store.clone()));
        let escalation = Arc::new(EscalationCoordinator::new(store.clone()));
        let mut dispatcher = ToolDispatcher::new(&config.tools);
        register_builtin(
            &mut dispatcher,
            BuiltinToolDeps {
                escalation: escalation.clone(),
                call_state: call_state.clone(),
                knowledge,
            },
        );

        Self {
            client: RealtimeClient::new(config.realtime.clone()),
            config,
            store,
            call_state,
            escalation,
            dispatcher: Arc::new(dispatcher),
            bridges: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<CallStore> {
        self.store.clone()
    }

    pub fn call_state(&self) -> Arc<CallStateMachine> {
        self.call_state.clone()
    }

    /// Resolve the call row for a `start` event, creating one when the
    /// carrier connects a stream we have not seen a webhook for.
    async fn resolve_call(
        &self,
        call_sid: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<CallRecord> {
        if let Some(call) = self.store.get_call_by_sid(call_sid).await? {
            return Ok(call);
        }
        let business_id = parameters.get("business_id").map(String::as_str);
        let from = parameters.get("from").map(String::as_str).unwrap_or("unknown");
        let to = parameters.get("to").map(String::as_str).unwrap_or("unknown");
        let mut meta = serde_json::Map::new();
        if let Some(personality) = parameters.get("personality") {
            meta.insert(
                "agent_personality".to_string(),
                serde_json::Value::String(personality.clone()),
            );
        }
        self.store
            .create_call(
                Some(call_sid),
                CallDirection::Inbound,
                from,
                to,
                business_id,
                serde_json::Value::Object(meta),
            )
            .await
    }

    /// `start` event: make sure a call row exists, mark it in
    /// progress, and bring up its bridge. Re-delivery of `start` for
    /// an already-bridged SID returns the existing bridge.
    pub async fn handle_stream_start(
        &self,
        call_sid: &str,
        stream_sid: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<Arc<Bridge>> {
        if let Some(existing) = self.get_bridge(call_sid).await {
            return Ok(existing);
        }

        let call = self.resolve_call(call_sid, parameters).await?;
        self.call_state
            .transition(&call.id, CallEvent::MediaStarted)
            .await?;
        info!(call_id = %call.id, call_sid = %call_sid, stream_sid = %stream_sid, "stream start");
        self.start_call_bridge(&call.id, call_sid).await
    }

    /// Build and start the bridge for a call.
    pub async fn start_call_bridge(&self, call_id: &str, call_sid: &str) -> Result<Arc<Bridge>> {
        let call = self
            .store
            .get_call(call_id)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("call {call_id}")))?;

        let session_config = self.build_session_config(&call);
        let conversation = Arc::new(ConversationLog::new(call.id.clone(), self.store.clone()));
        let bridge = Arc::new(Bridge::new(
            call.id.clone(),
            call_sid,
            call.business_id.clone(),
            self.client.clone(),
            self.dispatcher.clone(),
            self.escalation.clone(),
            self.config.escalation.clone(),
            self.call_state.clone(),
            conversation,
        ));
        bridge.start(session_config).await?;

        self.bridges
            .lock()
            .await
            .insert(call_sid.to_string(), bridge.clone());
        info!(call_id = %call.id, call_sid = %call_sid, "call bridge started");
        Ok(bridge)
    }

    /// Agent settings resolution order: call metadata personality →
    /// business profile → global defaults.
    fn build_session_config(&self, call: &CallRecord) -> SessionConfig {
        let agent = &self.config.agent;
        let realtime = &self.config.realtime;
        let business = call
            .business_id
            .as_deref()
            .and_then(|id| self.config.businesses.get(id));

        let personality_name = call
            .meta
            .get("agent_personality")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| business.and_then(|b| b.personality.clone()))
            .or_else(|| agent.default_personality.clone());
        let personality: Option<&Personality> = personality_name
            .as_deref()
            .and_then(|name| agent.personalities.get(name));
        if personality_name.is_some() && personality.is_none() {
            warn!(personality = ?personality_name, "unknown personality, using defaults");
        }

        let system_prompt = personality
            .map(|p| p.system_prompt.clone())
            .or_else(|| business.and_then(|b| b.system_prompt.clone()))
            .unwrap_or_else(|| agent.system_prompt.clone());
        let voice = personality
            .and_then(|p| p.voice.clone())
            .or_else(|| business.and_then(|b| b.voice.clone()))
            .unwrap_or_else(|| realtime.voice.clone());
        let temperature = personality
            .and_then(|p| p.temperature)
            .or_else(|| business.and_then(|b| b.temperature))
            .unwrap_or(realtime.temperature);
        let tools = personality
            .and_then(|p| p.toolset.as_deref())
            .map(schemas::toolset_by_name)
            .unwrap_or_else(schemas::customer_support_tools);

        let business_context = business.map(|b| {
            let mut context = format!("Business: {}", b.name);
            if let Some(ref business_type) = b.business_type {
                context.push_str(&format!("\nType: {business_type}"));
            }
            context
        });

        SessionConfig {
            voice,
            instructions: system_prompt,
            temperature,
            max_response_output_tokens: realtime.max_response_tokens,
            transcription_model: realtime.transcription_model.clone(),
            vad: realtime.vad.clone(),
            tools,
        }
        .with_extra_instructions(business_context.as_deref())
    }

    /// Route a decoded media payload to its bridge. Unknown SIDs are
    /// warned about and dropped.
    pub async fn handle_media_stream_audio(&self, call_sid: &str, ulaw: Vec<u8>) {
        let bridge = self.get_bridge(call_sid).await;
        match bridge {
            Some(bridge) => bridge.handle_telephony_audio(ulaw),
            None => warn!(call_sid = %call_sid, "media for unknown call"),
        }
    }

    /// `stop` event or dropped socket: tear the bridge down and close
    /// out the call.
    pub async fn handle_stream_stop(&self, call_sid: &str) {
        let Some(bridge) = self.bridges.lock().await.remove(call_sid) else {
            return;
        };
        bridge.stop().await;
        if let Err(e) = self
            .call_state
            .transition(bridge.call_id(), CallEvent::CarrierCompleted)
            .await
        {
            // Normal when the call already failed or escalated.
            info!(call_sid = %call_sid, reason = %e, "stream stop without completion transition");
        }
    }

    /// Remove and stop a bridge. Idempotent.
    pub async fn stop_call_bridge(&self, call_sid: &str) {
        if let Some(bridge) = self.bridges.lock().await.remove(call_sid) {
            bridge.stop().await;
            info!(call_sid = %call_sid, "call bridge stopped");
        }
    }

    pub async fn get_bridge(&self, call_sid: &str) -> Option<Arc<Bridge>> {
        self.bridges.lock().await.get(call_sid).cloned()
    }

    pub async fn is_call_active(&self, call_sid: &str) -> bool {
        self.bridges.lock().await.contains_key(call_sid)
    }

    pub async fn active_call_count(&self) -> usize {
        self.bridges.lock().await.len()
    }
}
