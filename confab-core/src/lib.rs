// ABOUTME: Core library for confab: webhook event coalescing and dispatch
// ABOUTME: Platform-agnostic pieces shared by the service binary and its tests

pub mod access;
pub mod buffer;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod event;
pub mod metrics;
pub mod outbound;
pub mod traits;
pub mod turn;

pub use access::AccessPolicy;
pub use buffer::{BufferStore, BurstState, SettledBurst};
pub use commands::SpecialCommand;
pub use config::{Config, DispatchMode};
pub use dedup::SeenRegistry;
pub use event::{
    ConversationId, ConversationScope, InboundEvent, MessageEvent, MessageKind, SourceRef,
};
pub use outbound::{chunk_reply, EMPTY_REPLY_PLACEHOLDER};
pub use traits::{
    BackendInvocation, BackendOutput, BotIdentity, ExecutionBackend, MessagingClient,
    QUEUED_SENTINEL,
};
pub use turn::{build_turn, Turn};
