//! Chat-style commands on top of the bridge
//!
//! Used by `--exec` and the interactive prompt. Replies are shaped for a chat
//! message, so every reply fits in `MESSAGE_LIMIT` characters.

use std::sync::Arc;

use crate::bridge::{Bridge, PlayerList, WhitelistAdd, WhitelistRemove};
use crate::console::{FnMatcher, Outcome};
use crate::websocket::ConnectionState;

pub const MESSAGE_LIMIT: usize = 2000;
const BODY_LIMIT: usize = 1980;
const TRUNCATED: &str = "... (truncated)";

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Log(usize),
    Status,
    List,
    WhitelistAdd(String),
    WhitelistRemove(String),
    Send(String),
    Help,
}

pub fn parse(input: &str) -> Result<ChatCommand, String> {
    let input = input.trim();
    let (name, rest) = match input.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (input, ""),
    };

    match name.trim_start_matches('/').to_lowercase().as_str() {
        "log" => {
            if rest.is_empty() {
                return Ok(ChatCommand::Log(1));
            }
            rest.parse::<usize>()
                .map(ChatCommand::Log)
                .map_err(|_| format!("'{}' is not a number of lines", rest))
        }
        "status" => Ok(ChatCommand::Status),
        "list" => Ok(ChatCommand::List),
        "whitelist" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some("add"), Some(player), None) => Ok(ChatCommand::WhitelistAdd(player.to_string())),
                (Some("remove"), Some(player), None) => Ok(ChatCommand::WhitelistRemove(player.to_string())),
                _ => Err("Usage: /whitelist add|remove <player>".to_string()),
            }
        }
        "send" => {
            if rest.is_empty() {
                Err("Usage: /send <console command>".to_string())
            } else {
                Ok(ChatCommand::Send(rest.to_string()))
            }
        }
        "help" | "" => Ok(ChatCommand::Help),
        other => Err(format!("Unknown command '{}'. Try /help", other)),
    }
}

pub async fn execute(bridge: &Bridge, command: ChatCommand) -> String {
    tracing::info!("Chat command: {:?}", command);

    let reply = match command {
        ChatCommand::Log(lines) => render_log(bridge, lines).await,
        ChatCommand::Status => render_status(bridge).await,
        ChatCommand::List => render_list(bridge.player_list().await),
        ChatCommand::WhitelistAdd(player) => {
            let result = bridge.whitelist_add(&player).await;
            render_whitelist_add(&player, result)
        }
        ChatCommand::WhitelistRemove(player) => {
            let result = bridge.whitelist_remove(&player).await;
            render_whitelist_remove(&player, result)
        }
        ChatCommand::Send(command) => render_send(bridge, &command).await,
        ChatCommand::Help => help(),
    };

    clip_head(&reply, MESSAGE_LIMIT)
}

async fn render_log(bridge: &Bridge, lines: usize) -> String {
    let logs = bridge.tail(lines).await;
    if logs.is_empty() {
        return "Log buffer empty.".to_string();
    }

    let body: Vec<String> = logs.iter().map(|line| line.clean_text()).collect();
    let body = clip_tail(&body.join("\n"), BODY_LIMIT);
    format!("Last {} log(s):\n```\n{}\n```", logs.len(), body)
}

async fn render_status(bridge: &Bridge) -> String {
    let diagnostics = bridge.diagnostics().await;
    let status = match diagnostics.state {
        ConnectionState::Live => "✅ Auth & Listening",
        ConnectionState::Authenticating => "🟠 Connected (Pending Auth)",
        ConnectionState::Connecting | ConnectionState::Reconnecting => "🟠 Reconnecting",
        ConnectionState::Disconnected => "❌ Disconnected",
        ConnectionState::Failed => "❌ Failed (check panel credentials)",
    };

    let mut reply = format!("WS Status: {}", status);
    reply.push_str(&format!(
        "\nBuffered lines: {} | Pending commands: {} | Patterns: {}",
        diagnostics.buffered_lines, diagnostics.pending_commands, diagnostics.pattern_version
    ));
    if diagnostics.ambiguous_matches > 0 {
        reply.push_str(&format!("\nAmbiguous matches: {}", diagnostics.ambiguous_matches));
    }
    if let Some(last) = bridge.last_line().await {
        reply.push_str(&format!(
            "\nLast line #{} at {}",
            last.sequence,
            last.received_at.format("%H:%M:%S")
        ));
    }
    reply
}

fn render_list(result: PlayerList) -> String {
    match result {
        PlayerList::Players(snapshot) => {
            let names = if snapshot.names.is_empty() {
                "(nobody)".to_string()
            } else {
                snapshot.names.join(", ")
            };
            format!(
                "👥 **Online Players:** {}/{}\n```\n{}\n```",
                snapshot.count,
                snapshot.max,
                clip_head(&names, BODY_LIMIT - 40)
            )
        }
        PlayerList::Unavailable(reason) => format!("⚠️ Player list unavailable: {}", reason),
    }
}

fn render_whitelist_add(player: &str, result: WhitelistAdd) -> String {
    match result {
        WhitelistAdd::Added => format!("✅ Added {} to the whitelist", player),
        WhitelistAdd::AlreadyPresent => format!("ℹ️ {} is already whitelisted", player),
        WhitelistAdd::Failed(reason) => format!("❌ Could not whitelist {}: {}", player, reason),
        WhitelistAdd::Timeout => format!("🟡 Sent 'whitelist add {}', no matching response found.", player),
        WhitelistAdd::ConnectionLost => "❌ Console not connected; the command may not have run.".to_string(),
    }
}

fn render_whitelist_remove(player: &str, result: WhitelistRemove) -> String {
    match result {
        WhitelistRemove::Removed => format!("✅ Removed {} from the whitelist", player),
        WhitelistRemove::NotPresent => format!("ℹ️ {} is not whitelisted", player),
        WhitelistRemove::Failed(reason) => format!("❌ Could not remove {}: {}", player, reason),
        WhitelistRemove::Timeout => {
            format!("🟡 Sent 'whitelist remove {}', no matching response found.", player)
        }
        WhitelistRemove::ConnectionLost => "❌ Console not connected; the command may not have run.".to_string(),
    }
}

/// Raw commands have no known reply, so the first non-empty line wins
async fn render_send(bridge: &Bridge, command: &str) -> String {
    let any_line = Arc::new(FnMatcher::new("any line", |text: &str| !text.trim().is_empty()));

    match bridge.send_raw(command, any_line, bridge.default_timeout()).await {
        Ok(Outcome::Matched(line)) => {
            format!("```\n{}\n```", clip_head(&line.clean_text(), BODY_LIMIT))
        }
        Ok(Outcome::TimedOut) => format!("🟡 Sent '{}', no matching response found.", command),
        Ok(Outcome::ConnectionLost) => "❌ Console not connected; the command may not have run.".to_string(),
        Err(e) => format!("❌ {}", e),
    }
}

fn help() -> String {
    [
        "/log [n]  recent console lines",
        "/status  connection status",
        "/list  online players",
        "/whitelist add|remove <player>",
        "/send <console command>",
    ]
    .join("\n")
}

/// Keep the end of `text`, marking the cut
fn clip_tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let kept: String = text.chars().skip(count - max).collect();
    format!("{}\n{}", TRUNCATED, kept)
}

/// Keep the start of `text` so the result is at most `max` characters
fn clip_head(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::patterns::PlayerSnapshot;
    use crate::websocket::testutil::{StaticSource, fast_config};

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/log").unwrap(), ChatCommand::Log(1));
        assert_eq!(parse("/log 5").unwrap(), ChatCommand::Log(5));
        assert_eq!(parse("status").unwrap(), ChatCommand::Status);
        assert_eq!(parse("  /LIST ").unwrap(), ChatCommand::List);
        assert_eq!(
            parse("/whitelist add Steve").unwrap(),
            ChatCommand::WhitelistAdd("Steve".to_string())
        );
        assert_eq!(
            parse("/whitelist remove Steve").unwrap(),
            ChatCommand::WhitelistRemove("Steve".to_string())
        );
        assert_eq!(parse("/send say hello world").unwrap(), ChatCommand::Send("say hello world".to_string()));
        assert_eq!(parse("/help").unwrap(), ChatCommand::Help);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse("/log many").is_err());
        assert!(parse("/whitelist add").is_err());
        assert!(parse("/whitelist add two names").is_err());
        assert!(parse("/whitelist ban Steve").is_err());
        assert!(parse("/send").is_err());
        assert!(parse("/op Steve").is_err());
    }

    #[test]
    fn test_clip_tail_keeps_newest_text() {
        let body = "x".repeat(10) + &"y".repeat(BODY_LIMIT);
        let clipped = clip_tail(&body, BODY_LIMIT);
        assert!(clipped.starts_with(TRUNCATED));
        assert!(clipped.ends_with('y'));
        assert!(!clipped.contains('x'));
        assert!(clipped.chars().count() < MESSAGE_LIMIT);

        assert_eq!(clip_tail("short", BODY_LIMIT), "short");
    }

    #[test]
    fn test_clip_head_respects_char_boundaries() {
        let text = "é".repeat(MESSAGE_LIMIT + 5);
        let clipped = clip_head(&text, MESSAGE_LIMIT);
        assert_eq!(clipped.chars().count(), MESSAGE_LIMIT);
        assert!(clipped.ends_with("..."));
    }

    #[test]
    fn test_render_results() {
        let snapshot = PlayerSnapshot {
            count: 2,
            max: 20,
            names: vec!["Steve".to_string(), "Alex".to_string()],
        };
        assert_eq!(
            render_list(PlayerList::Players(snapshot)),
            "👥 **Online Players:** 2/20\n```\nSteve, Alex\n```"
        );
        assert_eq!(render_whitelist_add("Steve", WhitelistAdd::Added), "✅ Added Steve to the whitelist");
        assert_eq!(
            render_whitelist_remove("Steve", WhitelistRemove::NotPresent),
            "ℹ️ Steve is not whitelisted"
        );
    }

    #[tokio::test]
    async fn test_execute_against_stopped_bridge() {
        let bridge = Bridge::with_source(fast_config(), Arc::new(StaticSource::new("ws://127.0.0.1:1")));

        assert_eq!(execute(&bridge, ChatCommand::Log(3)).await, "Log buffer empty.");
        assert!(execute(&bridge, ChatCommand::Status).await.starts_with("WS Status: ❌ Disconnected"));
        assert_eq!(
            execute(&bridge, ChatCommand::List).await,
            "⚠️ Player list unavailable: console not connected"
        );
        assert!(
            execute(&bridge, ChatCommand::Send("say hi".to_string()))
                .await
                .starts_with("❌ Console not connected")
        );
    }
}
