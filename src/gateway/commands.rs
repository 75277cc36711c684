//! Owner commands: `!`-prefixed messages answered locally, no provider call.

use super::security::SecurityGuard;
use super::Responder;
use knight_shadow::AntiDelete;
use std::time::Instant;

/// Grouped context for command execution.
pub struct CommandContext<'a> {
    pub text: &'a str,
    pub uptime: &'a Instant,
    pub anti_delete: Option<&'a AntiDelete>,
    pub responder: Option<&'a Responder>,
    pub guard: Option<&'a SecurityGuard>,
}

/// Known owner commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Security,
    Block,
    Unblock,
    ClearMemory,
    Cleanup,
    Help,
}

impl Command {
    /// Parse a command from message text. Anything else is an ordinary message.
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        match first.to_lowercase().as_str() {
            "!status" => Some(Self::Status),
            "!security" => Some(Self::Security),
            "!block" => Some(Self::Block),
            "!unblock" => Some(Self::Unblock),
            "!clearmemory" => Some(Self::ClearMemory),
            "!cleanup" => Some(Self::Cleanup),
            "!help" => Some(Self::Help),
            _ => None,
        }
    }
}

/// Digits of the first argument: `"!block +94 77 000"` gives `"94"`.
fn number_arg(text: &str) -> Option<String> {
    let arg = text.split_whitespace().nth(1)?;
    let digits: String = arg.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Handle a command and return the reply text.
pub async fn handle(cmd: Command, ctx: &CommandContext<'_>) -> String {
    match cmd {
        Command::Status => handle_status(ctx),
        Command::Security => handle_security(ctx.guard),
        Command::Block => handle_block(ctx.guard, ctx.text),
        Command::Unblock => handle_unblock(ctx.guard, ctx.text),
        Command::ClearMemory => handle_clear_memory(ctx.responder, ctx.text).await,
        Command::Cleanup => handle_cleanup(ctx.anti_delete),
        Command::Help => HELP.to_string(),
    }
}

fn handle_status(ctx: &CommandContext<'_>) -> String {
    let elapsed = ctx.uptime.elapsed().as_secs();
    let anti_delete = match ctx.anti_delete {
        Some(ad) => format!("on ({} shadowed)", ad.len()),
        None => "off".to_string(),
    };
    let security = match ctx.guard {
        Some(g) => format!("{} ({} blocked)", on_off(g.is_enabled()), g.blocked_count()),
        None => "off".to_string(),
    };
    format!(
        "*Knight status*\n\
         Uptime: {}h {}m {}s\n\
         Anti-delete: {anti_delete}\n\
         Responder: {}\n\
         Security: {security}",
        elapsed / 3600,
        (elapsed % 3600) / 60,
        elapsed % 60,
        on_off(ctx.responder.is_some()),
    )
}

fn handle_security(guard: Option<&SecurityGuard>) -> String {
    let Some(g) = guard else {
        return "Security guard is not running.".to_string();
    };
    format!(
        "*Security*\n\
         Blocked users: {}\n\
         Users warned: {}\n\
         Anti-spam: {}\n\
         Auto-block: {}",
        g.blocked_count(),
        g.warned_count(),
        on_off(g.is_enabled()),
        on_off(g.auto_block()),
    )
}

fn handle_block(guard: Option<&SecurityGuard>, text: &str) -> String {
    let Some(g) = guard else {
        return "Security guard is not running.".to_string();
    };
    let Some(number) = number_arg(text) else {
        return "Usage: !block <phone_number>".to_string();
    };
    if g.block(&number) {
        format!("Blocked {number}.")
    } else {
        "The owner cannot be blocked.".to_string()
    }
}

fn handle_unblock(guard: Option<&SecurityGuard>, text: &str) -> String {
    let Some(g) = guard else {
        return "Security guard is not running.".to_string();
    };
    let Some(number) = number_arg(text) else {
        return "Usage: !unblock <phone_number>".to_string();
    };
    if g.unblock(&number) {
        format!("Unblocked {number}.")
    } else {
        format!("{number} was not blocked.")
    }
}

async fn handle_clear_memory(responder: Option<&Responder>, text: &str) -> String {
    let Some(r) = responder else {
        return "Responder is disabled.".to_string();
    };
    let Some(number) = number_arg(text) else {
        return "Usage: !clearmemory <phone_number>".to_string();
    };
    r.clear_history(&number).await;
    format!("Conversation history cleared for {number}.")
}

fn handle_cleanup(anti_delete: Option<&AntiDelete>) -> String {
    match anti_delete {
        Some(ad) => format!(
            "Cleanup done: {} expired shadow entr(ies) removed.",
            ad.sweep()
        ),
        None => "Anti-delete is disabled.".to_string(),
    }
}

const HELP: &str = "*Owner commands*\n\
!status - process status\n\
!security - blocklist and spam stats\n\
!block <number> - stop replying to a user\n\
!unblock <number> - lift a block\n\
!clearmemory <number> - forget a user's conversation\n\
!cleanup - sweep expired shadow entries\n\
!help - this list";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("!status"), Some(Command::Status));
        assert_eq!(Command::parse("  !BLOCK 9477"), Some(Command::Block));
        assert_eq!(Command::parse("!clearmemory +94770000001"), Some(Command::ClearMemory));
        assert_eq!(Command::parse("!restart"), None);
        assert_eq!(Command::parse("status"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_number_arg() {
        assert_eq!(number_arg("!block +94 77"), Some("94".to_string()));
        assert_eq!(number_arg("!block +94770000001"), Some("94770000001".to_string()));
        assert_eq!(number_arg("!block"), None);
        assert_eq!(number_arg("!block abc"), None);
    }

    #[tokio::test]
    async fn test_commands_without_subsystems() {
        let uptime = Instant::now();
        let ctx = CommandContext {
            text: "!block 94770000001",
            uptime: &uptime,
            anti_delete: None,
            responder: None,
            guard: None,
        };
        assert_eq!(handle(Command::Block, &ctx).await, "Security guard is not running.");
        assert_eq!(handle(Command::Cleanup, &ctx).await, "Anti-delete is disabled.");
        assert_eq!(handle(Command::ClearMemory, &ctx).await, "Responder is disabled.");
        let status = handle(Command::Status, &ctx).await;
        assert!(status.contains("Anti-delete: off"));
        assert!(status.contains("Responder: off"));
        assert!(handle(Command::Help, &ctx).await.contains("!clearmemory"));
    }
}
