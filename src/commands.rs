//! Inbound command dispatch.
//!
//! Maps command text received on a paired session to a reply. Pure lookup, no
//! state: recognized commands get their reply, unrecognized commands get a
//! fixed fallback, and anything that is not a command gets no reply at all.

/// Stateless command-to-reply mapping.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    /// Prefix that marks a message as a command (default: "/").
    prefix: String,
    /// Reply for prefixed text that matches no known command.
    fallback: String,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            prefix: "/".to_string(),
            fallback: "Unknown command. Send /help for the list of commands.".to_string(),
        }
    }

    /// Reply for an inbound message, or `None` when the text is not a command.
    ///
    /// Commands are matched case-insensitively; arguments after the command
    /// word are ignored.
    pub fn dispatch(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        let without_prefix = trimmed.strip_prefix(&self.prefix)?;
        let name = without_prefix.split_whitespace().next()?.to_lowercase();

        let reply = match name.as_str() {
            "ping" => "pong".to_string(),
            "help" => self.format_help(),
            "version" => format!("pairgate {}", env!("CARGO_PKG_VERSION")),
            _ => self.fallback.clone(),
        };
        Some(reply)
    }

    /// Plain-text help so the reply renders well on any transport.
    fn format_help(&self) -> String {
        let prefix = &self.prefix;
        [
            "Available commands:".to_string(),
            format!("  {prefix}ping     Check that the session is alive"),
            format!("  {prefix}help     Show this message"),
            format!("  {prefix}version  Show the service version"),
        ]
        .join("\n")
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
