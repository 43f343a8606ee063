// ABOUTME: Per-conversation debounce buffer that groups message bursts into settled units
// ABOUTME: BufferStore owns every pending burst and detaches settled ones atomically

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::event::{ConversationId, MessageEvent};

/// Default quiet period before a burst is considered settled.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(3000);

/// Debounce lifecycle for one conversation. Flushing is the detach step in
/// `flush_if_due` itself: the store hands the burst out and the conversation
/// is already Idle again, so a new burst can start while the old one is
/// still being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstState {
    Idle,
    Collecting,
}

#[derive(Debug)]
struct PendingBurst {
    events: Vec<MessageEvent>,
    deadline: Instant,
    started_at: Instant,
}

/// A burst detached from the store once its quiet period elapsed.
#[derive(Debug)]
pub struct SettledBurst {
    pub conversation: ConversationId,
    pub events: Vec<MessageEvent>,
    /// When the first event of the burst arrived
    pub started_at: Instant,
}

/// Owns the conversation-to-burst map. Constructed once per process and
/// driven solely by the intake task, so no interior locking is needed.
pub struct BufferStore {
    debounce: Duration,
    bursts: HashMap<ConversationId, PendingBurst>,
}

impl BufferStore {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            bursts: HashMap::new(),
        }
    }

    /// Appends an event to the conversation's pending burst, creating one if
    /// the conversation was idle. Every append re-arms the deadline to a
    /// full debounce interval from `now`. Returns the buffered event count.
    pub fn append(&mut self, conversation: ConversationId, event: MessageEvent, now: Instant) -> usize {
        let deadline = now + self.debounce;
        let burst = self.bursts.entry(conversation).or_insert_with(|| PendingBurst {
            events: Vec::new(),
            deadline,
            started_at: now,
        });
        burst.deadline = deadline;
        burst.events.push(event);
        burst.events.len()
    }

    /// Earliest armed deadline across all conversations, None when every
    /// conversation is idle. The intake loop sleeps until this.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.bursts.values().map(|burst| burst.deadline).min()
    }

    /// Detaches every burst whose quiet period has elapsed. Events come back
    /// in arrival order.
    pub fn flush_if_due(&mut self, now: Instant) -> Vec<SettledBurst> {
        let due: Vec<ConversationId> = self
            .bursts
            .iter()
            .filter(|(_, burst)| burst.deadline <= now)
            .map(|(conversation, _)| conversation.clone())
            .collect();

        due.into_iter()
            .filter_map(|conversation| {
                self.bursts.remove(&conversation).map(|burst| SettledBurst {
                    conversation,
                    events: burst.events,
                    started_at: burst.started_at,
                })
            })
            .collect()
    }

    pub fn state(&self, conversation: &ConversationId) -> BurstState {
        if self.bursts.contains_key(conversation) {
            BurstState::Collecting
        } else {
            BurstState::Idle
        }
    }

    /// Number of conversations currently collecting a burst.
    pub fn pending_conversations(&self) -> usize {
        self.bursts.len()
    }
}
