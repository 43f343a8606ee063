// ABOUTME: Pure turn construction from a settled burst of buffered events
// ABOUTME: Merges text, picks the representative message and attachment, orders reply handles

use crate::event::{ConversationId, MessageEvent, MessageKind};

/// Unit of work handed to the dispatcher: one settled burst merged into a
/// single logical turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub conversation: ConversationId,
    /// Primary participant, the push-fallback address
    pub participant: Option<String>,
    /// Text of every text event, newline-joined in arrival order
    pub merged_text: String,
    pub message_kind: MessageKind,
    /// Attachment id of the first image event, if any
    pub primary_attachment_id: Option<String>,
    /// The first image event's id when the turn carries an image (the
    /// backend fetches attachments by id), otherwise the last event's id.
    pub representative_message_id: String,
    pub quoted_message_id: Option<String>,
    /// Non-empty reply handles in arrival order, earliest first
    pub reply_handles: Vec<String>,
    pub write_authorized: bool,
    pub mentions_self: bool,
    /// Source events in arrival order, kept for per-event dispatch mode
    pub events: Vec<MessageEvent>,
}

/// Builds a turn from one settled burst. Pure: the same event list always
/// yields the same turn. Returns None when the burst holds no text or
/// image events.
pub fn build_turn(conversation: ConversationId, events: Vec<MessageEvent>) -> Option<Turn> {
    let events: Vec<MessageEvent> = events
        .into_iter()
        .filter(|event| event.is_turn_eligible())
        .collect();

    let first = events.first()?;
    let last = events.last()?;

    let merged_text = events
        .iter()
        .filter(|event| event.kind == MessageKind::Text)
        .filter_map(|event| event.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");

    let first_image = events.iter().find(|event| event.kind == MessageKind::Image);

    let message_kind = if first_image.is_some() {
        MessageKind::Image
    } else {
        MessageKind::Text
    };

    let representative_message_id = first_image
        .map(|event| event.message_id.clone())
        .unwrap_or_else(|| last.message_id.clone());

    let primary_attachment_id = first_image.and_then(|event| event.attachment_id.clone());

    let quoted_message_id = events
        .iter()
        .find_map(|event| event.quoted_message_id.clone());

    let reply_handles: Vec<String> = events
        .iter()
        .filter_map(|event| event.reply_handle.clone())
        .filter(|handle| !handle.is_empty())
        .collect();

    Some(Turn {
        participant: first.source.user_id.clone(),
        write_authorized: first.write_authorized,
        mentions_self: events.iter().any(|event| event.mentions_self),
        conversation,
        merged_text,
        message_kind,
        primary_attachment_id,
        representative_message_id,
        quoted_message_id,
        reply_handles,
        events,
    })
}
