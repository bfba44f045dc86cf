//! Origin tags
//!
//! Every relayed message is prefixed with a bracketed tag naming where it
//! came from. The same tags identify echoes of our own relays arriving back
//! on another platform.

use super::types::{Platform, Source};

pub const TELEGRAM_TAG: &str = "[TG]";
pub const DISCORD_TAG: &str = "[DC]";
pub const SLACK_TAG: &str = "[SK]";
pub const API_TAG: &str = "[API]";

const ALL_TAGS: [(Source, &str); 4] = [
    (Source::Telegram, TELEGRAM_TAG),
    (Source::Discord, DISCORD_TAG),
    (Source::Slack, SLACK_TAG),
    (Source::Api, API_TAG),
];

/// Tag for a record source
pub fn origin_tag(source: Source) -> &'static str {
    match source {
        Source::Telegram => TELEGRAM_TAG,
        Source::Discord => DISCORD_TAG,
        Source::Slack => SLACK_TAG,
        Source::Api | Source::ApiReply => API_TAG,
    }
}

/// Relay text: `"[<tag>] <username>: <text>"`
pub fn format_relay(source: Source, username: &str, text: &str) -> String {
    format!("{} {}: {}", origin_tag(source), username, text)
}

/// True when `text` arriving on `origin` starts with another origin's tag
pub fn is_echo(origin: Platform, text: &str) -> bool {
    let own = Source::from(origin);
    ALL_TAGS
        .iter()
        .filter(|(source, _)| *source != own)
        .any(|(_, tag)| text.starts_with(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_relay() {
        assert_eq!(
            format_relay(Source::Telegram, "Bob", "hi"),
            "[TG] Bob: hi"
        );
        assert_eq!(
            format_relay(Source::ApiReply, "Cara", "ok"),
            "[API] Cara: ok"
        );
    }

    #[test]
    fn test_echo_from_foreign_tag() {
        assert!(is_echo(Platform::Discord, "[TG] Bob: hi"));
        assert!(is_echo(Platform::Telegram, "[SK] Ann: yo"));
        assert!(is_echo(Platform::Slack, "[API] Cara: hello"));
    }

    #[test]
    fn test_own_tag_is_not_echo() {
        assert!(!is_echo(Platform::Telegram, "[TG] typed by a human"));
        assert!(!is_echo(Platform::Discord, "plain text"));
        assert!(!is_echo(Platform::Slack, " [DC] leading space"));
    }
}
