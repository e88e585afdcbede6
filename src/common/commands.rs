/// Input typed into the interactive console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Anything that is not a slash command is sent as a message.
    Send(String),
    /// Resend the compose text kept from a failed send.
    Retry,
    /// Re-subscribe after a listener error.
    Reconnect,
    Inbox,
    /// Page back through history older than what is on screen.
    Older,
    Quit,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "/retry" => Self::Retry,
            "/reconnect" => Self::Reconnect,
            "/inbox" => Self::Inbox,
            "/older" => Self::Older,
            "/quit" | "/exit" => Self::Quit,
            other if other.starts_with('/') => Self::Unknown(other.to_string()),
            _ => Self::Send(line.to_string()),
        }
    }
}
