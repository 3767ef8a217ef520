// ABOUTME: Integration tests for the agent gateway driven by the scripted mock backend.
// ABOUTME: Covers turn persistence, progress ordering, failures, overlap and session lifecycle.

use anyhow::anyhow;
use async_trait::async_trait;
use parley_agent::backends::mock::MockBackend;
use parley_agent::{AgentBackend, AgentRegistry, BackendKind, BackendsConfig, ErrorCode, IdentityContext, RawEvent};
use parley_core::gateway::{failure_text, FAILURE_PREFIX};
use parley_core::{
    AgentIdentity, Config, ConversationStore, CredentialProvider, Gateway, GatewayUpdate,
    IgnoreReason, Message, ProgressState, SqliteStore, StaticCredentials, SubmitOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

fn gateway_with(mock: MockBackend) -> (Gateway, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let gateway = Gateway::new(
        Box::new(mock),
        AgentIdentity::new("Agent"),
        store.clone(),
        Arc::new(StaticCredentials::default()),
    );
    (gateway, store)
}

fn drain(rx: &mut broadcast::Receiver<GatewayUpdate>) -> Vec<GatewayUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

fn progress_updates(updates: &[GatewayUpdate]) -> Vec<ProgressState> {
    updates
        .iter()
        .filter_map(|u| match u {
            GatewayUpdate::Progress(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

fn state(steps: u32, rationale: &str) -> ProgressState {
    ProgressState {
        steps_completed: steps,
        latest_rationale: rationale.to_string(),
    }
}

/// Store whose every operation fails
struct FailingStore;

impl ConversationStore for FailingStore {
    fn append(&self, _: &str, _: &[Message]) -> anyhow::Result<()> {
        Err(anyhow!("disk full"))
    }
    fn load(&self, _: &str) -> anyhow::Result<Vec<Message>> {
        Err(anyhow!("disk full"))
    }
    fn initialize(&self, _: &str) -> anyhow::Result<()> {
        Err(anyhow!("disk full"))
    }
    fn last_session_id(&self) -> anyhow::Result<Option<String>> {
        Err(anyhow!("disk full"))
    }
    fn set_last_session_id(&self, _: &str) -> anyhow::Result<()> {
        Err(anyhow!("disk full"))
    }
    fn clear_all(&self) -> anyhow::Result<()> {
        Err(anyhow!("disk full"))
    }
}

struct BrokenCredentials;

#[async_trait]
impl CredentialProvider for BrokenCredentials {
    async fn identity(&self) -> anyhow::Result<IdentityContext> {
        Err(anyhow!("token expired"))
    }
}

#[tokio::test]
async fn test_submit_stores_user_then_agent_message() {
    let (gateway, store) = gateway_with(MockBackend::new().on_prompt("hello").respond_final("hi there"));
    let session = gateway.resume_last_session();

    let outcome = gateway.submit("  hello  ").await;

    assert!(matches!(outcome, SubmitOutcome::Completed { .. }));
    let stored = store.load(&session.id).unwrap();
    assert_eq!(
        stored,
        vec![
            Message::user("hello"),
            Message {
                text: "hi there".to_string(),
                sender: "Agent".to_string(),
            },
        ]
    );
    assert_eq!(gateway.messages(), stored);
    assert_eq!(gateway.progress(), ProgressState::default());
    assert!(!gateway.is_in_flight());
}

#[tokio::test]
async fn test_progress_is_published_in_order() {
    let (gateway, _store) = gateway_with(MockBackend::new().on_prompt("go").respond_with(vec![
        RawEvent::progress("r1"),
        RawEvent::progress("r2"),
        RawEvent::Final("hello".to_string()),
    ]));
    gateway.resume_last_session();
    let mut rx = gateway.subscribe();

    let outcome = gateway.submit("go").await;
    assert_eq!(outcome.reply().map(|m| m.text.as_str()), Some("hello"));

    let updates = drain(&mut rx);
    assert_eq!(
        progress_updates(&updates),
        vec![state(0, ""), state(1, "r1"), state(2, "r2"), state(0, "")]
    );
    assert_eq!(updates.first(), Some(&GatewayUpdate::InFlight(true)));
    assert_eq!(updates.last(), Some(&GatewayUpdate::InFlight(false)));
}

#[tokio::test]
async fn test_user_message_is_shown_before_the_reply() {
    let (gateway, _store) = gateway_with(MockBackend::new().on_prompt("q").respond_final("a"));
    gateway.resume_last_session();
    let mut rx = gateway.subscribe();

    gateway.submit("q").await;

    let appended: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|u| match u {
            GatewayUpdate::MessageAppended(m) => Some(m.text),
            _ => None,
        })
        .collect();
    assert_eq!(appended, vec!["q", "a"]);
}

#[tokio::test]
async fn test_failure_trace_becomes_error_message() {
    let (gateway, store) = gateway_with(MockBackend::new().on_prompt("plan").respond_with(vec![
        RawEvent::progress("planning"),
        RawEvent::failure("x"),
        RawEvent::Final("should not appear".to_string()),
    ]));
    let session = gateway.resume_last_session();

    let outcome = gateway.submit("plan").await;

    let SubmitOutcome::Failed { reply, failure } = outcome else {
        panic!("expected a failed turn");
    };
    assert_eq!(failure.code, ErrorCode::BackendFailure);
    assert!(reply.text.starts_with(FAILURE_PREFIX));
    assert!(reply.text.contains("*x*"));

    let stored = store.load(&session.id).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1], reply);
    assert!(stored.iter().all(|m| m.text != "should not appear"));
    assert_eq!(gateway.progress(), ProgressState::default());
}

#[tokio::test]
async fn test_error_event_is_rendered_with_reason() {
    let (gateway, _store) = gateway_with(
        MockBackend::new()
            .on_prompt("hi")
            .respond_error(ErrorCode::Transport, "connection refused"),
    );
    gateway.resume_last_session();

    let outcome = gateway.submit("hi").await;
    let reply = outcome.reply().unwrap();
    assert_eq!(
        reply.text,
        "Sorry, something went wrong while processing your request.\n\n*connection refused*"
    );
}

#[tokio::test]
async fn test_blank_and_sessionless_submits_are_ignored() {
    let mock = MockBackend::new();
    let (gateway, _store) = gateway_with(mock.clone());

    assert_eq!(
        gateway.submit("anything").await,
        SubmitOutcome::Ignored(IgnoreReason::NoActiveSession)
    );
    gateway.resume_last_session();
    assert_eq!(
        gateway.submit("   \n").await,
        SubmitOutcome::Ignored(IgnoreReason::EmptyUtterance)
    );
    assert_eq!(mock.invocations(), 0);
    assert!(gateway.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_submit_is_rejected() {
    let mock = MockBackend::new()
        .on_prompt("first")
        .after(Duration::from_millis(100))
        .respond_final("one")
        .on_prompt("second")
        .respond_final("two");
    let (gateway, store) = gateway_with(mock.clone());
    let session = gateway.resume_last_session();

    let (first, second) = tokio::join!(gateway.submit("first"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(gateway.is_in_flight());
        gateway.submit("second").await
    });

    assert!(matches!(first, SubmitOutcome::Completed { .. }));
    assert_eq!(second, SubmitOutcome::Ignored(IgnoreReason::TurnInFlight));
    assert_eq!(mock.invocations(), 1);

    let texts: Vec<String> = store
        .load(&session.id)
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["first", "one"]);
}

#[tokio::test(start_paused = true)]
async fn test_session_changes_are_rejected_while_in_flight() {
    let mock = MockBackend::new()
        .on_prompt("slow")
        .after(Duration::from_millis(100))
        .respond_final("done");
    let (gateway, _store) = gateway_with(mock);
    let session = gateway.resume_last_session();

    let (_, (created, resumed, reset)) = tokio::join!(gateway.submit("slow"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        (
            gateway.create_session(),
            gateway.resume_last_session(),
            gateway.reset_all(),
        )
    });

    assert_eq!(created.id, session.id);
    assert_eq!(resumed.id, session.id);
    assert!(reset.is_err());
    assert_eq!(gateway.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_submit_clears_in_flight() {
    let mock = MockBackend::new()
        .on_prompt("slow")
        .after(Duration::from_secs(5))
        .respond_final("late");
    let (gateway, store) = gateway_with(mock);
    let session = gateway.resume_last_session();
    let mut rx = gateway.subscribe();

    let result = tokio::time::timeout(Duration::from_millis(50), gateway.submit("slow")).await;

    assert!(result.is_err());
    assert!(!gateway.is_in_flight());
    assert!(gateway.messages().is_empty());
    assert!(store.load(&session.id).unwrap().is_empty());

    let updates = drain(&mut rx);
    assert!(updates.iter().any(|u| matches!(
        u,
        GatewayUpdate::MessageRetracted(m) if m.text == "slow" && m.is_from_user()
    )));
    assert_eq!(updates.last(), Some(&GatewayUpdate::InFlight(false)));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_submit_keeps_earlier_turns() {
    let mock = MockBackend::new()
        .on_prompt("hi")
        .respond_final("hey")
        .on_prompt("slow")
        .after(Duration::from_secs(5))
        .respond_final("late");
    let (gateway, _store) = gateway_with(mock);
    gateway.resume_last_session();
    gateway.submit("hi").await;

    let result = tokio::time::timeout(Duration::from_millis(50), gateway.submit("slow")).await;

    assert!(result.is_err());
    let texts: Vec<String> = gateway.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["hi", "hey"]);
    assert_eq!(gateway.progress(), ProgressState::default());
}

#[tokio::test]
async fn test_reset_then_resume_yields_fresh_session() {
    let (gateway, store) = gateway_with(MockBackend::new().on_prompt("hi").respond_final("hey"));
    let old = gateway.resume_last_session();
    gateway.submit("hi").await;

    gateway.reset_all().unwrap();
    assert!(gateway.active_session().is_none());
    assert!(gateway.messages().is_empty());
    assert_eq!(
        gateway.submit("hi").await,
        SubmitOutcome::Ignored(IgnoreReason::NoActiveSession)
    );

    let fresh = gateway.resume_last_session();
    assert_ne!(fresh.id, old.id);
    assert!(gateway.messages().is_empty());
    assert!(store.load(&old.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_publishes_session_cleared() {
    let (gateway, _store) = gateway_with(MockBackend::new().on_prompt("hi").respond_final("hey"));
    gateway.resume_last_session();
    gateway.submit("hi").await;
    let mut rx = gateway.subscribe();

    gateway.reset_all().unwrap();

    let updates = drain(&mut rx);
    assert_eq!(
        updates,
        vec![
            GatewayUpdate::SessionCleared,
            GatewayUpdate::Progress(ProgressState::default()),
        ]
    );
}

#[tokio::test]
async fn test_long_turn_fits_in_configured_update_capacity() {
    let mut events: Vec<RawEvent> = (1..=1500).map(|i| RawEvent::progress(format!("r{i}"))).collect();
    events.push(RawEvent::Final("done".to_string()));
    let (gateway, _store) = gateway_with(MockBackend::new().on_prompt("go").respond_with(events));
    let gateway = gateway.with_update_capacity(4096);
    gateway.resume_last_session();
    let mut rx = gateway.subscribe();

    gateway.submit("go").await;

    let progress = progress_updates(&drain(&mut rx));
    assert_eq!(progress.len(), 1502);
    assert_eq!(progress[1500], state(1500, "r1500"));
}

#[tokio::test]
async fn test_small_update_capacity_lags_slow_subscriber() {
    let events = vec![
        RawEvent::progress("r1"),
        RawEvent::progress("r2"),
        RawEvent::progress("r3"),
        RawEvent::Final("done".to_string()),
    ];
    let (gateway, _store) = gateway_with(MockBackend::new().on_prompt("go").respond_with(events));
    let gateway = gateway.with_update_capacity(2);
    gateway.resume_last_session();
    let mut rx = gateway.subscribe();

    gateway.submit("go").await;

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(_))));
    assert_eq!(drain(&mut rx).last(), Some(&GatewayUpdate::InFlight(false)));
}

#[tokio::test]
async fn test_resume_restores_previous_conversation() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let first = Gateway::new(
        Box::new(MockBackend::new().on_prompt("hi").respond_final("hey")),
        AgentIdentity::new("Agent"),
        store.clone(),
        Arc::new(StaticCredentials::default()),
    );
    let session = first.resume_last_session();
    first.submit("hi").await;
    drop(first);

    let second = Gateway::new(
        Box::new(MockBackend::new()),
        AgentIdentity::new("Agent"),
        store.clone(),
        Arc::new(StaticCredentials::default()),
    );
    assert_eq!(second.resume_last_session().id, session.id);
    assert_eq!(second.messages().len(), 2);
}

#[tokio::test]
async fn test_store_failure_is_fail_open() {
    let gateway = Gateway::new(
        Box::new(MockBackend::new().on_prompt("hi").respond_final("still here")),
        AgentIdentity::new("Agent"),
        Arc::new(FailingStore),
        Arc::new(StaticCredentials::default()),
    );
    let mut rx = gateway.subscribe();

    let session = gateway.resume_last_session();
    let outcome = gateway.submit("hi").await;

    assert!(matches!(outcome, SubmitOutcome::Completed { .. }));
    assert_eq!(gateway.active_session(), Some(session));
    let texts: Vec<String> = gateway.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["hi", "still here"]);

    let degraded: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|u| match u {
            GatewayUpdate::PersistenceDegraded(w) => Some(w),
            _ => None,
        })
        .collect();
    assert!(!degraded.is_empty());
    assert!(degraded.iter().all(|w| w.contains("disk full")));
    assert!(degraded.iter().any(|w| w.contains("store turn")));
    // Store problems never become chat messages
    assert!(gateway.messages().iter().all(|m| !m.text.contains("disk full")));
}

#[tokio::test]
async fn test_credential_failure_is_auth_failed() {
    let mock = MockBackend::new();
    let gateway = Gateway::new(
        Box::new(mock.clone()),
        AgentIdentity::new("Agent"),
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(BrokenCredentials),
    );
    gateway.resume_last_session();

    let SubmitOutcome::Failed { failure, reply } = gateway.submit("hi").await else {
        panic!("expected a failed turn");
    };
    assert_eq!(failure.code, ErrorCode::AuthFailed);
    assert!(reply.text.contains("token expired"));
    assert_eq!(mock.invocations(), 0);
}

#[tokio::test]
async fn test_configuration_error_answers_every_submit() {
    let config = Config::parse(
        r#"
[backends.traced_streaming]
region = "us-east-1"
"#,
    )
    .unwrap();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let gateway = Gateway::from_config(
        &config,
        &AgentRegistry::default(),
        store.clone(),
        Arc::new(StaticCredentials::default()),
    );
    assert_eq!(gateway.backend_name(), "unconfigured");
    let session = gateway.resume_last_session();

    for _ in 0..2 {
        let SubmitOutcome::Failed { failure, reply } = gateway.submit("hi").await else {
            panic!("expected a failed turn");
        };
        assert_eq!(failure.code, ErrorCode::Configuration);
        assert_eq!(reply.text, failure_text(&failure));
        assert_eq!(reply.sender, "Agent");
    }
    assert_eq!(store.load(&session.id).unwrap().len(), 4);
}

#[tokio::test]
async fn test_from_config_uses_selected_display_name() {
    let config = Config::parse(
        r#"
[backends.synchronous]
enabled = true
endpoint = "http://localhost:9"
function_name = "chat"
display_name = "Concierge"
"#,
    )
    .unwrap();
    let mock = MockBackend::new().on_prompt("hi").respond_final("welcome");
    let registry = AgentRegistry::new().register(BackendKind::Synchronous, move |_config: &BackendsConfig| {
        let backend: Box<dyn AgentBackend> = Box::new(mock.clone());
        Ok(backend)
    });

    let gateway = Gateway::from_config(
        &config,
        &registry,
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(StaticCredentials::default()),
    );
    assert_eq!(gateway.identity().display_name, "Concierge");
    assert_eq!(gateway.backend_name(), "mock");
    gateway.resume_last_session();

    let outcome = gateway.submit("hi").await;
    let reply = outcome.reply().unwrap();
    assert_eq!(reply.sender, "Concierge");
    assert_eq!(reply.text, "welcome");
}

#[tokio::test]
async fn test_from_config_replaces_reserved_display_name() {
    let config = Config::parse(
        r#"
[backends.synchronous]
enabled = true
endpoint = "http://localhost:9"
function_name = "chat"
display_name = "user"
"#,
    )
    .unwrap();
    let mock = MockBackend::new().on_prompt("hi").respond_final("welcome");
    let registry = AgentRegistry::new().register(BackendKind::Synchronous, move |_config: &BackendsConfig| {
        let backend: Box<dyn AgentBackend> = Box::new(mock.clone());
        Ok(backend)
    });

    let gateway = Gateway::from_config(
        &config,
        &registry,
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(StaticCredentials::default()),
    );
    gateway.resume_last_session();

    let reply = gateway.submit("hi").await.reply().cloned().unwrap();
    assert!(!reply.is_from_user());
    assert_ne!(gateway.identity().display_name, "user");
}

#[tokio::test]
async fn test_create_session_is_debounced() {
    let (gateway, _store) = gateway_with(MockBackend::new().on_prompt("hi").respond_final("hey"));
    let gateway = gateway.with_session_debounce(Duration::from_secs(60));

    let first = gateway.create_session();
    let second = gateway.create_session();
    assert_eq!(first.id, second.id);

    gateway.submit("hi").await;
    let third = gateway.create_session();
    assert_ne!(third.id, first.id);
    assert!(gateway.messages().is_empty());
}

#[tokio::test]
async fn test_create_session_without_debounce_always_creates() {
    let (gateway, store) = gateway_with(MockBackend::new());
    let gateway = gateway.with_session_debounce(Duration::ZERO);

    let first = gateway.create_session();
    let second = gateway.create_session();
    assert_ne!(first.id, second.id);
    assert_eq!(store.last_session_id().unwrap(), Some(second.id));
}
