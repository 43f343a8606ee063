// ABOUTME: Seams between the coalescing core and its external collaborators
// ABOUTME: Messaging client, execution backend, and the positional invocation contract

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::event::MessageKind;

/// Stdout sentinel meaning "accepted, the reply arrives through another
/// channel". Treated as success with no immediate reply to deliver.
pub const QUEUED_SENTINEL: &str = "__QUEUED__";

/// The bot's own identity, resolved once at startup and cached for the
/// process lifetime. Mention detection compares against `user_id`.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub user_id: String,
    pub display_name: String,
}

/// Platform messaging operations the pipeline needs.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Sends messages through a single-use reply handle. Fails when the
    /// handle is expired, invalid, or already consumed.
    async fn send_reply(&self, handle: &str, messages: &[String]) -> Result<()>;

    /// Pushes messages directly to a participant, independent of any handle.
    async fn send_push(&self, participant: &str, messages: &[String]) -> Result<()>;

    /// Shows a transient liveness indicator in a one-to-one conversation.
    /// Best-effort; callers log and move on when it fails.
    async fn show_liveness(&self, conversation: &str, duration: Duration) -> Result<()>;

    /// Resolves the bot's own identity. Called once at process start.
    async fn resolve_self_identity(&self) -> Result<BotIdentity>;
}

/// One backend call, carrying the fixed positional contract.
#[derive(Debug, Clone)]
pub struct BackendInvocation {
    pub participant: String,
    pub message_id: String,
    pub text: String,
    /// Empty string when the turn quotes nothing
    pub quoted_message_id: String,
    pub write_authorized: bool,
    pub message_kind: MessageKind,
    pub conversation_id: String,
    pub reply_handles: Vec<String>,
    pub work_directory: Option<PathBuf>,
}

impl BackendInvocation {
    /// Argument order is the backend contract: participant, message id,
    /// text, quoted id, write flag, kind, conversation, comma-joined reply
    /// handles, then the work directory when present.
    pub fn positional_args(&self) -> Vec<String> {
        let mut args = vec![
            self.participant.clone(),
            self.message_id.clone(),
            self.text.clone(),
            self.quoted_message_id.clone(),
            self.write_authorized.to_string(),
            self.message_kind.as_str().to_string(),
            self.conversation_id.clone(),
            self.reply_handles.join(","),
        ];
        if let Some(dir) = &self.work_directory {
            args.push(dir.display().to_string());
        }
        args
    }
}

/// What the backend produced. `Err` from [`ExecutionBackend::run`] means
/// the process could not be started or the transport failed; a nonzero
/// exit still comes back as `Ok` with the status set.
#[derive(Debug, Clone, Default)]
pub struct BackendOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
}

impl BackendOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Success with the queued sentinel on stdout.
    pub fn queued(&self) -> bool {
        self.success() && self.stdout.trim() == QUEUED_SENTINEL
    }
}

/// External command-execution backend.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run(&self, invocation: &BackendInvocation) -> Result<BackendOutput>;
}
