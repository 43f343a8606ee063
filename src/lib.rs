// ABOUTME: Root library module exposing all public modules
// ABOUTME: Provides access to the LINE client, dispatch pipeline, and webhook server

// LINE-specific modules (stay local)
pub mod deliver;
pub mod dispatcher;
pub mod line;
pub mod orchestrator;
pub mod runner;
pub mod webhook;

// Re-export platform-agnostic modules from confab-core
pub use confab_core::access;
pub use confab_core::buffer;
pub use confab_core::commands;
pub use confab_core::config;
pub use confab_core::dedup;
pub use confab_core::event;
pub use confab_core::metrics;
pub use confab_core::outbound;
pub use confab_core::traits;
pub use confab_core::turn;
