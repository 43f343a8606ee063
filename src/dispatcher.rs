// ABOUTME: Turn dispatch: authorization gate, backend invocation, liveness signaling
// ABOUTME: Backend failures are logged and swallowed; no single turn can take the process down

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use confab_core::config::{Config, DispatchMode};
use confab_core::event::MessageEvent;
use confab_core::metrics;
use confab_core::outbound::chunk_reply;
use confab_core::traits::{BackendInvocation, ExecutionBackend, MessagingClient};
use confab_core::turn::Turn;
use confab_core::AccessPolicy;

use crate::deliver::deliver;

/// Fixed notice for conversations with no project mapping.
const UNAUTHORIZED_NOTICE: &str = "This conversation is not authorized to run commands.";

enum BackendOutcome {
    /// Clean exit with output to deliver (trimmed; may be empty)
    Replied(String),
    /// Clean exit with the queued sentinel: the reply arrives later
    Queued,
    /// Timeout, spawn error, or nonzero exit. Already logged, never retried.
    Failed,
}

pub struct Dispatcher {
    client: Arc<dyn MessagingClient>,
    backend: Arc<dyn ExecutionBackend>,
    policy: AccessPolicy,
    mode: DispatchMode,
    backend_timeout: Duration,
    liveness_refresh: Duration,
    liveness_duration: Duration,
    chunk_size: usize,
    max_chunks: usize,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        backend: Arc<dyn ExecutionBackend>,
        policy: AccessPolicy,
        config: &Config,
    ) -> Self {
        Self {
            client,
            backend,
            policy,
            mode: config.backend.dispatch_mode,
            backend_timeout: config.backend.timeout(),
            liveness_refresh: config.liveness.refresh_interval(),
            liveness_duration: config.liveness.indicator_duration(),
            chunk_size: config.delivery.chunk_size,
            max_chunks: config.delivery.max_chunks,
        }
    }

    /// Dispatches one settled turn. Every failure path ends here: the
    /// orchestrator never learns whether the backend succeeded.
    pub async fn dispatch(&self, turn: Turn) {
        let Some(work_dir) = self
            .policy
            .work_directory(&turn.conversation)
            .map(Path::to_path_buf)
        else {
            self.notify_unmapped(&turn).await;
            return;
        };

        let dispatch_id = Uuid::new_v4();
        info!(
            dispatch_id = %dispatch_id,
            conversation = %turn.conversation,
            kind = turn.message_kind.as_str(),
            events = turn.events.len(),
            write_authorized = turn.write_authorized,
            "dispatching turn"
        );

        let liveness = self.start_liveness(&turn);

        match self.mode {
            DispatchMode::Turn => {
                let invocation = self.turn_invocation(&turn, &work_dir);
                let outcome = self.invoke(&invocation).await;
                if let Some(guard) = liveness {
                    guard.stop();
                }
                self.settle(
                    dispatch_id,
                    &turn.reply_handles,
                    turn.participant.as_deref(),
                    outcome,
                )
                .await;
            }
            DispatchMode::PerEvent => {
                let invocations: Vec<BackendInvocation> = turn
                    .events
                    .iter()
                    .map(|event| self.event_invocation(&turn, event, &work_dir))
                    .collect();
                let outcomes =
                    join_all(invocations.iter().map(|invocation| self.invoke(invocation))).await;
                if let Some(guard) = liveness {
                    guard.stop();
                }
                for (event, outcome) in turn.events.iter().zip(outcomes) {
                    let handles: Vec<String> = event
                        .reply_handle
                        .iter()
                        .filter(|handle| !handle.is_empty())
                        .cloned()
                        .collect();
                    self.settle(dispatch_id, &handles, event.source.user_id.as_deref(), outcome)
                        .await;
                }
            }
        }
    }

    /// A conversation with no project mapping gets exactly one fixed notice:
    /// always in one-to-one chats, in groups and rooms only when the bot was
    /// explicitly mentioned.
    async fn notify_unmapped(&self, turn: &Turn) {
        if !turn.conversation.is_direct() && !turn.mentions_self {
            debug!(
                conversation = %turn.conversation,
                "unmapped group conversation without a mention, staying silent"
            );
            metrics::record_dispatch("unauthorized_silent");
            return;
        }

        info!(conversation = %turn.conversation, "conversation has no project mapping, sending notice");
        metrics::record_dispatch("unauthorized_notice");
        let notice = vec![UNAUTHORIZED_NOTICE.to_string()];
        deliver(
            self.client.as_ref(),
            &turn.reply_handles,
            turn.participant.as_deref(),
            &notice,
        )
        .await;
    }

    fn turn_invocation(&self, turn: &Turn, work_dir: &Path) -> BackendInvocation {
        BackendInvocation {
            participant: turn.participant.clone().unwrap_or_default(),
            message_id: turn.representative_message_id.clone(),
            text: turn.merged_text.clone(),
            quoted_message_id: turn.quoted_message_id.clone().unwrap_or_default(),
            write_authorized: turn.write_authorized,
            message_kind: turn.message_kind,
            conversation_id: turn.conversation.as_str().to_string(),
            reply_handles: turn.reply_handles.clone(),
            work_directory: Some(work_dir.to_path_buf()),
        }
    }

    fn event_invocation(
        &self,
        turn: &Turn,
        event: &MessageEvent,
        work_dir: &Path,
    ) -> BackendInvocation {
        BackendInvocation {
            participant: event.source.user_id.clone().unwrap_or_default(),
            message_id: event.message_id.clone(),
            text: event.text.clone().unwrap_or_default(),
            quoted_message_id: event.quoted_message_id.clone().unwrap_or_default(),
            write_authorized: event.write_authorized,
            message_kind: event.kind,
            conversation_id: turn.conversation.as_str().to_string(),
            reply_handles: event
                .reply_handle
                .iter()
                .filter(|handle| !handle.is_empty())
                .cloned()
                .collect(),
            work_directory: Some(work_dir.to_path_buf()),
        }
    }

    async fn invoke(&self, invocation: &BackendInvocation) -> BackendOutcome {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(self.backend_timeout, self.backend.run(invocation)).await;
        metrics::record_backend_duration(started.elapsed().as_secs_f64());

        match result {
            Err(_) => {
                warn!(
                    message_id = %invocation.message_id,
                    timeout_secs = self.backend_timeout.as_secs(),
                    "backend invocation timed out"
                );
                metrics::record_backend_failure("timeout");
                BackendOutcome::Failed
            }
            Ok(Err(error)) => {
                warn!(message_id = %invocation.message_id, error = %error, "backend invocation failed to start");
                metrics::record_backend_failure("spawn");
                BackendOutcome::Failed
            }
            Ok(Ok(output)) if output.queued() => BackendOutcome::Queued,
            Ok(Ok(output)) if output.success() => {
                BackendOutcome::Replied(output.stdout.trim().to_string())
            }
            Ok(Ok(output)) => {
                warn!(
                    message_id = %invocation.message_id,
                    status = ?output.status,
                    stderr = %output.stderr.trim(),
                    "backend exited nonzero"
                );
                metrics::record_backend_failure("exit");
                BackendOutcome::Failed
            }
        }
    }

    async fn settle(
        &self,
        dispatch_id: Uuid,
        handles: &[String],
        participant: Option<&str>,
        outcome: BackendOutcome,
    ) {
        match outcome {
            BackendOutcome::Replied(text) => {
                metrics::record_dispatch("ok");
                let chunks = chunk_reply(&text, self.chunk_size, self.max_chunks);
                metrics::record_reply_chunks(chunks.len());
                deliver(self.client.as_ref(), handles, participant, &chunks).await;
            }
            BackendOutcome::Queued => {
                metrics::record_dispatch("queued");
                debug!(dispatch_id = %dispatch_id, "backend queued the work, reply arrives later");
            }
            BackendOutcome::Failed => {
                // The backend owns retry semantics; the user sees silence
                metrics::record_dispatch("backend_error");
            }
        }
    }

    fn start_liveness(&self, turn: &Turn) -> Option<LivenessGuard> {
        if !turn.conversation.is_direct() {
            return None;
        }
        Some(LivenessGuard::start(
            Arc::clone(&self.client),
            turn.conversation.as_str().to_string(),
            self.liveness_refresh,
            self.liveness_duration,
            self.backend_timeout,
        ))
    }
}

/// Keeps the platform's transient indicator alive while the backend runs.
/// Stopped unconditionally when the backend call settles; the hard stop caps
/// a refresh loop that somehow outlives its dispatch.
struct LivenessGuard {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LivenessGuard {
    fn start(
        client: Arc<dyn MessagingClient>,
        conversation: String,
        refresh: Duration,
        indicator_duration: Duration,
        backend_timeout: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh);
            let hard_stop = tokio::time::Instant::now() + backend_timeout + refresh;

            loop {
                if tokio::time::Instant::now() > hard_stop {
                    warn!(conversation = %conversation, "liveness refresh hit its hard stop");
                    break;
                }
                tokio::select! {
                    // First tick fires immediately, showing the indicator at once
                    _ = interval.tick() => {
                        if let Err(error) = client.show_liveness(&conversation, indicator_duration).await {
                            debug!(error = %error, "liveness signal failed, stopping refresh");
                            break;
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });
        Self { stop_tx, task }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        self.task.abort();
    }
}
