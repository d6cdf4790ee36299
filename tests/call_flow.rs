//! Integration tests for the call pipeline:
//! - Call lifecycle: webhook-created row, state transitions, turn log
//! - Escalation: keyword trigger through agent assignment and handoff
//! - Retrieval: knowledge search behind the tool surface
//! - Wire formats: carrier frames and the audio path end to end

use std::collections::HashMap;
use std::sync::Arc;

use voicebridge::config::{Config, EscalationConfig, KnowledgeConfig, ToolsConfig, TriggerRule};
use voicebridge::escalation::EscalationCoordinator;
use voicebridge::knowledge::{
    ChunkMetadata, HashEmbedder, InMemoryVectorStore, RetrievalPipeline, SearchRequest,
};
use voicebridge::store::CallStore;
use voicebridge::telephony::call_state::{CallEvent, CallStateMachine};
use voicebridge::telephony::media_stream::{generate_twiml, media_frame, MediaStreamEvent};
use voicebridge::telephony::CallManager;
use voicebridge::tools::builtin::{register_builtin, BuiltinToolDeps};
use voicebridge::tools::{ToolContext, ToolDispatcher};
use voicebridge::types::{
    CallDirection, CallStatus, EscalationStatus, HumanAgent, Speaker, TriggerType,
};
use voicebridge::{audio, conversation::ConversationLog};

fn support_agent(id: &str) -> HumanAgent {
    HumanAgent {
        id: id.to_string(),
        name: format!("Agent {id}"),
        email: format!("{id}@example.com"),
        is_available: true,
        is_active: true,
        skills: vec!["support".to_string()],
        departments: vec!["voice".to_string()],
        active_escalations: 0,
        total_escalations: 0,
        last_active_at: None,
    }
}

// =====================================================================
// CALL LIFECYCLE
// =====================================================================

#[tokio::test]
async fn test_inbound_call_happy_path() {
    let store = Arc::new(CallStore::in_memory().unwrap());
    let machine = CallStateMachine::new(store.clone());

    let call = store
        .create_call(
            Some("CA100"),
            CallDirection::Inbound,
            "+15550001",
            "+15550002",
            None,
            serde_json::json!({}),
        )
        .await
        .unwrap();
    assert_eq!(call.status, CallStatus::Initiated);

    // Media start answers the call; both turns are logged; the carrier
    // stop completes it.
    machine.transition(&call.id, CallEvent::MediaStarted).await.unwrap();

    let log = ConversationLog::new(call.id.clone(), store.clone());
    log.add_interaction(Speaker::Customer, "hello", None, None)
        .await
        .unwrap();
    log.add_interaction(Speaker::Ai, "Hi! How can I help you today?", None, None)
        .await
        .unwrap();

    machine
        .transition(&call.id, CallEvent::CarrierCompleted)
        .await
        .unwrap();

    let call = store.get_call(&call.id).await.unwrap().unwrap();
    assert_eq!(call.status, CallStatus::Completed);
    assert!(call.ended_at.is_some());
    assert!(call.ended_at.unwrap() >= call.started_at);

    let turns = store.interactions(&call.id, None).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].speaker, Speaker::Customer);
    assert_eq!(turns[0].text, "hello");
    assert_eq!(turns[1].speaker, Speaker::Ai);
    assert!(turns[1].timestamp >= turns[0].timestamp);
}

#[tokio::test]
async fn test_status_webhook_sequence_is_idempotent() {
    let store = Arc::new(CallStore::in_memory().unwrap());
    let machine = CallStateMachine::new(store.clone());
    store
        .create_call(
            Some("CA200"),
            CallDirection::Outbound,
            "+15550001",
            "+15550002",
            None,
            serde_json::json!({}),
        )
        .await
        .unwrap();

    assert_eq!(
        machine.apply_carrier_status("CA200", "ringing").await.unwrap(),
        CallStatus::Ringing
    );
    assert_eq!(
        machine.apply_carrier_status("CA200", "no-answer").await.unwrap(),
        CallStatus::Failed
    );
    // The carrier retries terminal callbacks; they must be absorbed.
    assert_eq!(
        machine.apply_carrier_status("CA200", "no-answer").await.unwrap(),
        CallStatus::Failed
    );
}

// =====================================================================
// ESCALATION (keyword trigger → agent → handoff context)
// =====================================================================

#[tokio::test]
async fn test_keyword_escalation_end_to_end() {
    let store = Arc::new(CallStore::in_memory().unwrap());
    store.upsert_agent(&support_agent("a1")).await.unwrap();

    let call = store
        .create_call(
            Some("CA300"),
            CallDirection::Inbound,
            "+15550001",
            "+15550002",
            None,
            serde_json::json!({}),
        )
        .await
        .unwrap();
    let machine = CallStateMachine::new(store.clone());
    machine.transition(&call.id, CallEvent::MediaStarted).await.unwrap();

    let log = ConversationLog::new(call.id.clone(), store.clone());
    log.add_interaction(Speaker::Customer, "My account is locked again", None, None)
        .await
        .unwrap();
    log.add_interaction(Speaker::Ai, "Let me look into that for you.", None, None)
        .await
        .unwrap();
    log.add_interaction(
        Speaker::Customer,
        "No. I want to speak to a manager right now",
        None,
        None,
    )
    .await
    .unwrap();

    let coordinator = EscalationCoordinator::new(store.clone());
    let config = EscalationConfig {
        enabled: true,
        triggers: vec![TriggerRule {
            trigger: "keyword".to_string(),
            threshold: None,
            keywords: vec!["manager".to_string()],
        }],
    };

    let trigger = coordinator
        .check_triggers("No. I want to speak to a manager right now", &config)
        .expect("keyword should fire");
    assert_eq!(trigger.trigger_type, TriggerType::Keyword);

    let escalation = coordinator.escalate(&call.id, trigger).await.unwrap();
    machine
        .transition(&call.id, CallEvent::EscalationRequested)
        .await
        .unwrap();

    assert_eq!(escalation.status, EscalationStatus::Pending);
    assert_eq!(escalation.assigned_agent_id.as_deref(), Some("a1"));
    let summary = escalation.conversation_summary.unwrap();
    assert!(summary.contains("Opening:"));
    assert!(summary.contains("manager"));

    let call = store.get_call(&call.id).await.unwrap().unwrap();
    assert_eq!(call.status, CallStatus::Escalated);
    assert!(call.ended_at.is_some());

    // The assigned agent is out of the pool until completion.
    assert!(store.available_agents().await.unwrap().is_empty());
    coordinator.complete(escalation.id).await.unwrap();
    assert_eq!(store.available_agents().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_escalation_tool_resolves_exactly_once() {
    let store = Arc::new(CallStore::in_memory().unwrap());
    store.upsert_agent(&support_agent("a1")).await.unwrap();
    let call = store
        .create_call(Some("CA400"), CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
        .await
        .unwrap();
    store
        .update_call_status(&call.id, CallStatus::InProgress)
        .await
        .unwrap();
    store
        .add_interaction(&call.id, Speaker::Customer, "this is too complicated for a robot", None, serde_json::json!({}))
        .await
        .unwrap();

    let deps = BuiltinToolDeps {
        escalation: Arc::new(EscalationCoordinator::new(store.clone())),
        call_state: Arc::new(CallStateMachine::new(store.clone())),
        knowledge: None,
    };
    let mut dispatcher = ToolDispatcher::new(&ToolsConfig::default());
    register_builtin(&mut dispatcher, deps);

    let ctx = ToolContext::for_call(call.id.clone(), None);
    let result = dispatcher
        .dispatch(
            "escalate_to_human",
            serde_json::json!({"reason": "complex_issue"}),
            &ctx,
        )
        .await;
    assert_eq!(result["success"], true);

    // A second invocation finds no free agent and reports the error
    // back instead of raising.
    let again = dispatcher
        .dispatch(
            "escalate_to_human",
            serde_json::json!({"reason": "complex_issue"}),
            &ctx,
        )
        .await;
    assert!(again["error"].as_str().unwrap().contains("no available agents"));
}

// =====================================================================
// RETRIEVAL BEHIND THE TOOL SURFACE
// =====================================================================

async fn seeded_knowledge() -> Arc<RetrievalPipeline> {
    let mut config = KnowledgeConfig::default();
    config.similarity_threshold = 0.0;
    config.cross_encoder = false;
    let pipeline = Arc::new(RetrievalPipeline::new(
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(HashEmbedder::default()),
        None,
        config,
    ));
    pipeline
        .ingest(
            vec![
                (
                    "kb-keys".to_string(),
                    ChunkMetadata {
                        title: Some("API Key Rotation".to_string()),
                        source: Some("https://docs.example.com/keys".to_string()),
                        content: "Rotate an api key by creating a replacement key and revoking the old one."
                            .to_string(),
                        vendor: Some("openai".to_string()),
                        ..Default::default()
                    },
                ),
                (
                    "kb-hours".to_string(),
                    ChunkMetadata {
                        title: Some("Opening Hours".to_string()),
                        source: Some("https://docs.example.com/hours".to_string()),
                        content: "Support is staffed weekdays from nine to five eastern.".to_string(),
                        ..Default::default()
                    },
                ),
            ],
            Some("acme"),
        )
        .await
        .unwrap();
    pipeline
}

#[tokio::test]
async fn test_search_tool_returns_scored_results() {
    let pipeline = seeded_knowledge().await;
    let store = Arc::new(CallStore::in_memory().unwrap());
    let deps = BuiltinToolDeps {
        escalation: Arc::new(EscalationCoordinator::new(store.clone())),
        call_state: Arc::new(CallStateMachine::new(store)),
        knowledge: Some(pipeline),
    };
    let mut dispatcher = ToolDispatcher::new(&ToolsConfig::default());
    register_builtin(&mut dispatcher, deps);

    let ctx = ToolContext {
        call_id: Some("call-1".to_string()),
        business_id: Some("acme".to_string()),
    };
    let result = dispatcher
        .dispatch(
            "search_knowledge_base",
            serde_json::json!({"query": "how do I rotate an api key"}),
            &ctx,
        )
        .await;

    assert_eq!(result["success"], true);
    assert!(result["count"].as_u64().unwrap() >= 1);
    let top = &result["results"][0];
    assert!(top["content"].as_str().unwrap().contains("api key"));
    assert!(top["relevance_score"].as_f64().is_some());
    assert!(!result["spoken_summary"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_cached_search_is_stable() {
    let pipeline = seeded_knowledge().await;
    let mut request = SearchRequest::new("rotate api key");
    request.namespace = Some("acme".to_string());
    let cold = pipeline.search(&request).await.unwrap();
    let warm = pipeline.search(&request).await.unwrap();
    assert_eq!(cold, warm);
}

// =====================================================================
// WIRE FORMATS AND AUDIO PATH
// =====================================================================

#[test]
fn test_carrier_frame_round_trip() {
    // Inbound media frame → µ-law → PCM16 8k → PCM16 24k and back out
    // as an outbound frame, the way the bridge pumps audio.
    let pcm_8k: Vec<i16> = (0..160).map(|i| ((i * 97) % 4096 - 2048) as i16).collect();
    let ulaw_in = audio::encode_ulaw(&pcm_8k);

    let inbound = format!(
        r#"{{"event":"media","streamSid":"MZ1","media":{{"payload":"{}"}}}}"#,
        base64_encode(&ulaw_in)
    );
    let event: MediaStreamEvent = serde_json::from_str(&inbound).unwrap();
    let payload = match event {
        MediaStreamEvent::Media { media, .. } => base64_decode(&media.payload),
        other => panic!("unexpected event: {other:?}"),
    };

    let decoded = audio::decode_ulaw(&payload);
    let upsampled = audio::upsample_x3(&decoded);
    assert_eq!(upsampled.len(), (decoded.len() - 1) * 3 + 1);

    let downsampled = audio::downsample_div3(&upsampled);
    assert_eq!(downsampled.len(), decoded.len());
    let ulaw_out = audio::encode_ulaw(&downsampled);

    let frame = media_frame("MZ1", &ulaw_out);
    let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["event"], "media");
    assert_eq!(parsed["streamSid"], "MZ1");
    assert_eq!(
        base64_decode(parsed["media"]["payload"].as_str().unwrap()),
        ulaw_out
    );
}

#[test]
fn test_twiml_bootstrap_document() {
    let twiml = generate_twiml(
        "wss://agent.example.com/media-stream",
        "Connecting you to our assistant.",
        &[("business_id".to_string(), "acme".to_string())],
    );
    assert!(twiml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert!(twiml.contains(r#"<Stream url="wss://agent.example.com/media-stream">"#));
    assert!(twiml.contains(r#"<Parameter name="business_id" value="acme" />"#));
    assert!(twiml.ends_with("</Response>"));
}

#[tokio::test]
async fn test_manager_drops_media_for_unknown_sid() {
    let mut config = Config::default();
    // Unroutable session endpoint: the bridge start fails fast without
    // touching the network beyond a refused local connect.
    config.realtime.api_url = "ws://127.0.0.1:9".to_string();
    config.realtime.api_key = Some("test-key".to_string());
    let store = Arc::new(CallStore::in_memory().unwrap());
    let manager = CallManager::new(Arc::new(config), store, None);
    manager
        .handle_media_stream_audio("CA-unknown", vec![0xFF; 160])
        .await;
    assert!(!manager.is_call_active("CA-unknown").await);

    let mut parameters = HashMap::new();
    parameters.insert("from".to_string(), "+15550001".to_string());
    // A start for a SID the webhook never announced still creates the
    // call row (bridge start itself fails later without an API key,
    // which is fine here).
    let _ = manager.handle_stream_start("CA-late", "MZ9", &parameters).await;
    let call = manager.store().get_call_by_sid("CA-late").await.unwrap();
    assert!(call.is_some());
    assert_eq!(call.unwrap().from_number, "+15550001");
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn base64_decode(data: &str) -> Vec<u8> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(data).unwrap()
}
