// ABOUTME: Static access policy: write-authorization allow-set and project mapping
// ABOUTME: Unmapped conversations cannot dispatch at all; unauthorized ones only lose the write flag

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::AccessConfig;
use crate::event::{ConversationId, SourceRef};

/// Allow-set plus conversation-to-project mapping, loaded once from config.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    allowed: HashSet<String>,
    projects: HashMap<String, PathBuf>,
}

impl AccessPolicy {
    pub fn new(
        allowed: impl IntoIterator<Item = String>,
        projects: impl IntoIterator<Item = (String, PathBuf)>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            projects: projects.into_iter().collect(),
        }
    }

    pub fn from_config(access: &AccessConfig) -> Self {
        Self::new(
            access.allowed_conversations.iter().cloned(),
            access
                .projects
                .iter()
                .map(|(id, path)| (id.clone(), PathBuf::from(path))),
        )
    }

    /// True when any identifier on the event's source is in the allow-set.
    /// The flag is forwarded to the backend, which enforces the actual
    /// restriction on side-effecting actions.
    pub fn is_write_authorized(&self, source: &SourceRef) -> bool {
        let candidates = [
            source.group_id.as_deref(),
            source.room_id.as_deref(),
            source.user_id.as_deref(),
        ];
        candidates
            .into_iter()
            .flatten()
            .any(|id| self.allowed.contains(id))
    }

    /// Project work directory for a conversation. None means the
    /// conversation may not dispatch to the backend at all.
    pub fn work_directory(&self, conversation: &ConversationId) -> Option<&Path> {
        self.projects.get(conversation.as_str()).map(PathBuf::as_path)
    }
}
