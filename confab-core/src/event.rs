// ABOUTME: Inbound event model shared by the webhook edge and the coalescing pipeline
// ABOUTME: Defines conversation keys, message kinds, and the event variants the platform delivers

use chrono::{DateTime, Utc};

/// Scope of a conversation key, mirroring the platform's chat types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationScope {
    /// One-to-one chat with a single user
    User,
    /// Named multi-member group
    Group,
    /// Ad-hoc multi-member room
    Room,
}

/// Stable key for one physical chat. All events from the same chat map to
/// the same key regardless of which identifiers the payload carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId {
    id: String,
    scope: ConversationScope,
}

impl ConversationId {
    pub fn new(id: impl Into<String>, scope: ConversationScope) -> Self {
        Self {
            id: id.into(),
            scope,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> ConversationScope {
        self.scope
    }

    /// True for one-to-one chats. Liveness signals and unauthorized notices
    /// follow different rules in groups and rooms.
    pub fn is_direct(&self) -> bool {
        self.scope == ConversationScope::User
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Where an event came from: the originating user plus the group or room
/// it was sent in, when any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRef {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub room_id: Option<String>,
}

impl SourceRef {
    /// Derives the conversation key. Group id wins over room id, room id
    /// wins over user id; None when the payload carried no identifier.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        if let Some(id) = &self.group_id {
            Some(ConversationId::new(id.clone(), ConversationScope::Group))
        } else if let Some(id) = &self.room_id {
            Some(ConversationId::new(id.clone(), ConversationScope::Room))
        } else {
            self.user_id
                .as_ref()
                .map(|id| ConversationId::new(id.clone(), ConversationScope::User))
        }
    }
}

/// Kind of a message event. Only text and image messages contribute to a
/// merged turn; everything else is buffered but dropped at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Other,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Other => "other",
        }
    }
}

/// One message event after webhook translation, ready for the pipeline.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Platform-unique message id, the dedup key
    pub message_id: String,
    pub source: SourceRef,
    pub kind: MessageKind,
    /// Body text, present for text messages
    pub text: Option<String>,
    /// Content id for attachment fetch, present for image messages
    pub attachment_id: Option<String>,
    pub quoted_message_id: Option<String>,
    /// Single-use reply token; absent on redeliveries
    pub reply_handle: Option<String>,
    /// True when the message explicitly mentions the bot's own identity
    pub mentions_self: bool,
    /// Write-authorization flag stamped by the access policy at intake
    pub write_authorized: bool,
    pub received_at: DateTime<Utc>,
}

impl MessageEvent {
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.source.conversation_id()
    }

    /// Whether this event counts toward a merged turn.
    pub fn is_turn_eligible(&self) -> bool {
        matches!(self.kind, MessageKind::Text | MessageKind::Image)
    }
}

/// Everything the webhook edge can hand to the pipeline.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(MessageEvent),
    Follow(SourceRef),
    Unfollow(SourceRef),
    Join(SourceRef),
    Leave(SourceRef),
}
