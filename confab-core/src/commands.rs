// ABOUTME: Literal special commands answered immediately from the reply handle
// ABOUTME: Matched on trimmed text before buffering, so they never join a burst

/// Commands recognized verbatim (case-insensitive) on trimmed message text.
/// Anything else starting with `!` is ordinary text and gets buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Asks where the bot runs; answered with a fixed info payload
    Where,
    /// Connectivity probe
    Ping,
}

const WHERE_RESPONSE: &str =
    "Running in the cloud. Messages are handed to the configured execution backend, which replies on its own schedule.";

impl SpecialCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("!where") {
            Some(SpecialCommand::Where)
        } else if trimmed.eq_ignore_ascii_case("!ping") {
            Some(SpecialCommand::Ping)
        } else {
            None
        }
    }

    /// Fixed response payload. Special commands never reach the backend.
    pub fn response(&self) -> &'static str {
        match self {
            SpecialCommand::Where => WHERE_RESPONSE,
            SpecialCommand::Ping => "pong",
        }
    }

    /// Stable label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            SpecialCommand::Where => "where",
            SpecialCommand::Ping => "ping",
        }
    }
}
