// ABOUTME: Tests for the orchestrator intake loop end to end
// ABOUTME: Validates coalescing, dedup, special commands, and dispatch handoff on a paused clock

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use confab::access::AccessPolicy;
use confab::commands::SpecialCommand;
use confab::config::Config;
use confab::dispatcher::Dispatcher;
use confab::event::{InboundEvent, MessageEvent, MessageKind, SourceRef};
use confab::orchestrator::Orchestrator;
use confab::traits::{
    BackendInvocation, BackendOutput, BotIdentity, ExecutionBackend, MessagingClient,
};

struct CapturingClient {
    replies: Mutex<Vec<(String, Vec<String>)>>,
    pushes: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl MessagingClient for CapturingClient {
    async fn send_reply(&self, handle: &str, messages: &[String]) -> Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push((handle.to_string(), messages.to_vec()));
        Ok(())
    }

    async fn send_push(&self, participant: &str, messages: &[String]) -> Result<()> {
        self.pushes
            .lock()
            .unwrap()
            .push((participant.to_string(), messages.to_vec()));
        Ok(())
    }

    async fn show_liveness(&self, _conversation: &str, _duration: Duration) -> Result<()> {
        Ok(())
    }

    async fn resolve_self_identity(&self) -> Result<BotIdentity> {
        Ok(BotIdentity {
            user_id: "BOT".to_string(),
            display_name: "confab".to_string(),
        })
    }
}

/// Always replies "ok"; records every invocation for assertions.
struct FixedBackend {
    invocations: Mutex<Vec<BackendInvocation>>,
}

#[async_trait]
impl ExecutionBackend for FixedBackend {
    async fn run(&self, invocation: &BackendInvocation) -> Result<BackendOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(BackendOutput {
            stdout: "ok\n".to_string(),
            stderr: String::new(),
            status: Some(0),
        })
    }
}

struct Pipeline {
    client: Arc<CapturingClient>,
    backend: Arc<FixedBackend>,
    intake: mpsc::Sender<InboundEvent>,
    task: JoinHandle<()>,
}

impl Pipeline {
    fn invocation_count(&self) -> usize {
        self.backend.invocations.lock().unwrap().len()
    }
}

/// Spawns the full intake loop against capture doubles.
fn start_pipeline(policy: AccessPolicy) -> Pipeline {
    let mut config = Config::default();
    config.line.channel_access_token = "token".to_string();
    config.backend.command = "test-backend".to_string();

    let client = Arc::new(CapturingClient {
        replies: Mutex::new(Vec::new()),
        pushes: Mutex::new(Vec::new()),
    });
    let backend = Arc::new(FixedBackend {
        invocations: Mutex::new(Vec::new()),
    });
    let dispatcher = Arc::new(Dispatcher::new(
        client.clone(),
        backend.clone(),
        policy.clone(),
        &config,
    ));
    let orchestrator = Orchestrator::new(client.clone(), dispatcher, policy, &config);

    let (intake, events) = mpsc::channel(64);
    let task = tokio::spawn(orchestrator.run(events));
    Pipeline {
        client,
        backend,
        intake,
        task,
    }
}

fn policy(allowed: &[&str], mapped: &[&str]) -> AccessPolicy {
    AccessPolicy::new(
        allowed.iter().map(|id| id.to_string()),
        mapped
            .iter()
            .map(|id| (id.to_string(), PathBuf::from("/srv/projects/alpha"))),
    )
}

fn group_text(group: &str, user: &str, id: &str, text: &str, token: &str) -> InboundEvent {
    InboundEvent::Message(MessageEvent {
        message_id: id.to_string(),
        source: SourceRef {
            user_id: Some(user.to_string()),
            group_id: Some(group.to_string()),
            room_id: None,
        },
        kind: MessageKind::Text,
        text: Some(text.to_string()),
        attachment_id: None,
        quoted_message_id: None,
        reply_handle: Some(token.to_string()),
        mentions_self: false,
        write_authorized: false,
        received_at: Utc::now(),
    })
}

fn direct_text(user: &str, id: &str, text: &str, token: &str) -> InboundEvent {
    let InboundEvent::Message(mut message) = group_text("unused", user, id, text, token) else {
        unreachable!()
    };
    message.source.group_id = None;
    InboundEvent::Message(message)
}

fn group_image(group: &str, user: &str, id: &str, token: &str) -> InboundEvent {
    let InboundEvent::Message(mut message) = group_text(group, user, id, "", token) else {
        unreachable!()
    };
    message.kind = MessageKind::Image;
    message.text = None;
    message.attachment_id = Some(id.to_string());
    InboundEvent::Message(message)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// =============================================================================
// SCENARIO: A burst within the debounce window becomes one merged turn
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_burst_coalesces_into_one_backend_call() {
    let pipeline = start_pipeline(policy(&["G1"], &["G1"]));

    pipeline
        .intake
        .send(group_text("G1", "U1", "m1", "a", "rt-1"))
        .await
        .unwrap();
    sleep_ms(1000).await;
    pipeline
        .intake
        .send(group_text("G1", "U1", "m2", "b", "rt-2"))
        .await
        .unwrap();

    // The window re-armed at the second event; nothing settles before 4000ms
    sleep_ms(2999).await;
    assert_eq!(pipeline.invocation_count(), 0);

    sleep_ms(1000).await;
    let invocations = pipeline.backend.invocations.lock().unwrap();
    assert_eq!(invocations.len(), 1, "one burst becomes one backend call");
    assert_eq!(invocations[0].text, "a\nb");
    assert_eq!(invocations[0].reply_handles, vec!["rt-1", "rt-2"]);
    assert!(invocations[0].write_authorized);
    drop(invocations);

    let replies = pipeline.client.replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "rt-1");
    assert_eq!(replies[0].1, vec!["ok".to_string()]);
    drop(replies);

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: Redelivered webhook events never reach the backend twice
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_duplicate_delivery_invokes_backend_once() {
    let pipeline = start_pipeline(policy(&[], &["G1"]));

    pipeline
        .intake
        .send(group_text("G1", "U1", "m1", "hello", "rt-1"))
        .await
        .unwrap();
    // Platform retry: same message id, fresh reply token
    pipeline
        .intake
        .send(group_text("G1", "U1", "m1", "hello", "rt-9"))
        .await
        .unwrap();

    sleep_ms(3100).await;
    {
        let invocations = pipeline.backend.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].reply_handles, vec!["rt-1"]);
    }

    // A late redelivery inside the dedup TTL buffers nothing either
    pipeline
        .intake
        .send(group_text("G1", "U1", "m1", "hello", "rt-10"))
        .await
        .unwrap();
    sleep_ms(4000).await;
    assert_eq!(pipeline.invocation_count(), 1);

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: Special commands answer immediately and skip the buffer
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_special_commands_bypass_the_pipeline() {
    let pipeline = start_pipeline(policy(&[], &[]));

    pipeline
        .intake
        .send(direct_text("U1", "m1", "!ping", "rt-1"))
        .await
        .unwrap();
    sleep_ms(10).await;

    {
        let replies = pipeline.client.replies.lock().unwrap();
        assert_eq!(replies.len(), 1, "command answered without waiting for the window");
        assert_eq!(replies[0].0, "rt-1");
        assert_eq!(
            replies[0].1,
            vec![SpecialCommand::Ping.response().to_string()]
        );
    }

    // Case and surrounding whitespace do not matter
    pipeline
        .intake
        .send(direct_text("U1", "m2", "  !WHERE  ", "rt-2"))
        .await
        .unwrap();
    sleep_ms(10).await;
    {
        let replies = pipeline.client.replies.lock().unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[1].1,
            vec![SpecialCommand::Where.response().to_string()]
        );
    }

    // Nothing was buffered, so nothing dispatches later
    sleep_ms(5000).await;
    assert_eq!(pipeline.invocation_count(), 0);

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: A special command without a reply handle falls back to push
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_special_command_without_handle_is_pushed() {
    let pipeline = start_pipeline(policy(&[], &[]));

    let InboundEvent::Message(mut message) = direct_text("U1", "m1", "!ping", "unused") else {
        unreachable!()
    };
    message.reply_handle = None;
    pipeline
        .intake
        .send(InboundEvent::Message(message))
        .await
        .unwrap();
    sleep_ms(10).await;

    assert!(pipeline.client.replies.lock().unwrap().is_empty());
    let pushes = pipeline.client.pushes.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, "U1");
    assert_eq!(pushes[0].1, vec![SpecialCommand::Ping.response().to_string()]);
    drop(pushes);

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: Conversations buffer and settle independently
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_conversations_settle_independently() {
    let pipeline = start_pipeline(policy(&[], &["G1", "G2"]));

    pipeline
        .intake
        .send(group_text("G1", "U1", "m1", "first room", "rt-1"))
        .await
        .unwrap();
    sleep_ms(1500).await;
    pipeline
        .intake
        .send(group_text("G2", "U2", "m2", "second room", "rt-2"))
        .await
        .unwrap();

    sleep_ms(1600).await; // 3100ms: only G1 has settled
    {
        let invocations = pipeline.backend.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].conversation_id, "G1");
    }

    sleep_ms(1500).await; // 4600ms: G2 settled too
    {
        let invocations = pipeline.backend.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[1].conversation_id, "G2");
    }

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: A burst containing an image dispatches as an image turn
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_image_burst_dispatches_image_turn() {
    let pipeline = start_pipeline(policy(&[], &["G1"]));

    pipeline
        .intake
        .send(group_image("G1", "U1", "m-img", "rt-1"))
        .await
        .unwrap();
    sleep_ms(100).await;
    pipeline
        .intake
        .send(group_text("G1", "U1", "m2", "caption", "rt-2"))
        .await
        .unwrap();

    sleep_ms(3200).await;
    let invocations = pipeline.backend.invocations.lock().unwrap();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].message_kind, MessageKind::Image);
    assert_eq!(
        invocations[0].message_id, "m-img",
        "image turns use the first image id so the backend can fetch it"
    );
    assert_eq!(invocations[0].text, "caption");
    drop(invocations);

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: Lifecycle and unsupported events never dispatch
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_lifecycle_events_are_ignored() {
    let pipeline = start_pipeline(policy(&[], &["G1", "U1"]));

    let source = SourceRef {
        user_id: Some("U1".to_string()),
        group_id: None,
        room_id: None,
    };
    pipeline
        .intake
        .send(InboundEvent::Follow(source.clone()))
        .await
        .unwrap();
    pipeline
        .intake
        .send(InboundEvent::Unfollow(source))
        .await
        .unwrap();
    pipeline
        .intake
        .send(InboundEvent::Join(SourceRef {
            user_id: None,
            group_id: Some("G1".to_string()),
            room_id: None,
        }))
        .await
        .unwrap();

    sleep_ms(5000).await;
    assert_eq!(pipeline.invocation_count(), 0);
    assert!(pipeline.client.replies.lock().unwrap().is_empty());

    pipeline.task.abort();
}

#[tokio::test(start_paused = true)]
async fn scenario_unsupported_kinds_never_dispatch() {
    let pipeline = start_pipeline(policy(&[], &["G1"]));

    let InboundEvent::Message(mut message) = group_text("G1", "U1", "m1", "", "rt-1") else {
        unreachable!()
    };
    message.kind = MessageKind::Other;
    message.text = None;
    pipeline
        .intake
        .send(InboundEvent::Message(message))
        .await
        .unwrap();

    sleep_ms(3500).await;
    assert_eq!(
        pipeline.invocation_count(),
        0,
        "a burst of only unsupported kinds produces no turn"
    );

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: A flushed conversation is immediately ready for a new burst
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_flush_frees_the_conversation() {
    let pipeline = start_pipeline(policy(&[], &["G1"]));

    pipeline
        .intake
        .send(group_text("G1", "U1", "m1", "one", "rt-1"))
        .await
        .unwrap();
    sleep_ms(3100).await;
    assert_eq!(pipeline.invocation_count(), 1);

    pipeline
        .intake
        .send(group_text("G1", "U1", "m2", "two", "rt-2"))
        .await
        .unwrap();
    sleep_ms(3100).await;
    let invocations = pipeline.backend.invocations.lock().unwrap();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[1].text, "two");
    drop(invocations);

    pipeline.task.abort();
}

// =============================================================================
// SCENARIO: The write flag follows the allow-set, per participant source
// =============================================================================
#[tokio::test(start_paused = true)]
async fn scenario_write_flag_follows_allow_set() {
    let pipeline = start_pipeline(policy(&["U1"], &["U1", "U2"]));

    pipeline
        .intake
        .send(direct_text("U1", "m1", "trusted", "rt-1"))
        .await
        .unwrap();
    pipeline
        .intake
        .send(direct_text("U2", "m2", "untrusted", "rt-2"))
        .await
        .unwrap();

    sleep_ms(3100).await;
    let invocations = pipeline.backend.invocations.lock().unwrap();
    assert_eq!(invocations.len(), 2);
    let trusted = invocations
        .iter()
        .find(|invocation| invocation.participant == "U1")
        .unwrap();
    let untrusted = invocations
        .iter()
        .find(|invocation| invocation.participant == "U2")
        .unwrap();
    assert!(trusted.write_authorized);
    assert!(!untrusted.write_authorized);
    drop(invocations);

    pipeline.task.abort();
}
