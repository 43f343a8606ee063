// ABOUTME: Single-owner intake loop: dedup, special commands, access tagging, debounce
// ABOUTME: Settled bursts become turns and are dispatched on their own tasks

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use confab_core::buffer::BufferStore;
use confab_core::commands::SpecialCommand;
use confab_core::config::Config;
use confab_core::dedup::SeenRegistry;
use confab_core::event::{InboundEvent, MessageEvent};
use confab_core::metrics;
use confab_core::traits::MessagingClient;
use confab_core::turn::build_turn;
use confab_core::AccessPolicy;

use crate::deliver::deliver;
use crate::dispatcher::Dispatcher;

pub struct Orchestrator {
    client: Arc<dyn MessagingClient>,
    dispatcher: Arc<Dispatcher>,
    policy: AccessPolicy,
    registry: SeenRegistry,
    buffers: BufferStore,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        dispatcher: Arc<Dispatcher>,
        policy: AccessPolicy,
        config: &Config,
    ) -> Self {
        Self {
            client,
            dispatcher,
            policy,
            registry: SeenRegistry::new(config.pipeline.dedup_ttl()),
            buffers: BufferStore::new(config.pipeline.debounce()),
        }
    }

    /// Runs until the intake channel closes. Sole owner of the buffer map
    /// and the dedup registry, so neither needs a lock.
    pub async fn run(mut self, mut events: mpsc::Receiver<InboundEvent>) {
        info!("intake loop started");
        loop {
            let deadline = self.buffers.next_deadline();
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            info!("intake channel closed, stopping");
                            break;
                        }
                    }
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.flush_due();
                }
            }
        }
    }

    fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => self.handle_message(message),
            InboundEvent::Follow(source) => {
                info!(user = source.user_id.as_deref().unwrap_or("unknown"), "user followed the bot");
            }
            InboundEvent::Unfollow(source) => {
                info!(user = source.user_id.as_deref().unwrap_or("unknown"), "user unfollowed the bot");
            }
            InboundEvent::Join(source) => {
                let conversation = source.conversation_id();
                info!(
                    conversation = conversation.as_ref().map(|c| c.as_str()).unwrap_or("unknown"),
                    "bot joined a group or room"
                );
            }
            InboundEvent::Leave(source) => {
                let conversation = source.conversation_id();
                info!(
                    conversation = conversation.as_ref().map(|c| c.as_str()).unwrap_or("unknown"),
                    "bot left a group or room"
                );
            }
        }
    }

    fn handle_message(&mut self, mut message: MessageEvent) {
        let now = Instant::now();
        if !self.registry.accept(&message.message_id, now) {
            debug!(message_id = %message.message_id, "dropping redelivered event");
            metrics::record_event_deduplicated();
            return;
        }

        let Some(conversation) = message.conversation_id() else {
            warn!(message_id = %message.message_id, "message without a usable conversation id");
            return;
        };

        // Special commands are answered at once and never buffered
        if let Some(command) = message.text.as_deref().and_then(SpecialCommand::parse) {
            info!(command = command.name(), conversation = %conversation, "answering special command");
            metrics::record_special_command(command.name());
            let client = Arc::clone(&self.client);
            let handles: Vec<String> = message
                .reply_handle
                .into_iter()
                .filter(|handle| !handle.is_empty())
                .collect();
            let participant = message.source.user_id;
            tokio::spawn(async move {
                let response = vec![command.response().to_string()];
                deliver(client.as_ref(), &handles, participant.as_deref(), &response).await;
            });
            return;
        }

        message.write_authorized = self.policy.is_write_authorized(&message.source);

        let buffered = self.buffers.append(conversation.clone(), message, now);
        metrics::set_pending_conversations(self.buffers.pending_conversations());
        debug!(conversation = %conversation, buffered, "event buffered");
    }

    fn flush_due(&mut self) {
        let settled = self.buffers.flush_if_due(Instant::now());
        metrics::set_pending_conversations(self.buffers.pending_conversations());

        for burst in settled {
            metrics::record_burst_flushed(burst.events.len());
            debug!(
                conversation = %burst.conversation,
                events = burst.events.len(),
                burst_ms = burst.started_at.elapsed().as_millis() as u64,
                "burst settled"
            );

            match build_turn(burst.conversation.clone(), burst.events) {
                Some(turn) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        dispatcher.dispatch(turn).await;
                    });
                }
                None => {
                    debug!(conversation = %burst.conversation, "burst had no text or image events, skipping");
                }
            }
        }
    }
}

// The disabled select branch still evaluates its expression, so a missing
// deadline has to be representable here.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
