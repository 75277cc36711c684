//! Outbound helpers: retrying sends and Markdown → WhatsApp formatting.

use knight_core::error::KnightError;
use std::time::Duration;
use tracing::{error, warn};
use wacore_binary::jid::Jid;
use whatsapp_rust::client::Client;

/// Backoff between send attempts. One attempt per entry.
pub(super) const RETRY_DELAYS_MS: [u64; 3] = [500, 1000, 2000];

/// Send with retries, returning the id WhatsApp assigned to the message.
pub(super) async fn retry_send(
    client: &Client,
    jid: &Jid,
    msg: waproto::whatsapp::Message,
) -> Result<String, KnightError> {
    let attempts = RETRY_DELAYS_MS.len();
    let mut last_err = String::new();

    for (i, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
        match client.send_message(jid.clone(), msg.clone()).await {
            Ok(id) => return Ok(id),
            Err(e) => {
                last_err = e.to_string();
                if i + 1 < attempts {
                    warn!(
                        "whatsapp send to {jid} failed ({}/{attempts}): {e}, retrying in {delay_ms}ms",
                        i + 1
                    );
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                } else {
                    error!("whatsapp send to {jid} failed ({attempts}/{attempts}): {e}");
                }
            }
        }
    }

    Err(KnightError::Channel(format!(
        "whatsapp send failed after {attempts} attempts: {last_err}"
    )))
}

/// Parse a JID, mapping the error into the channel taxonomy.
pub(super) fn parse_jid(target: &str) -> Result<Jid, KnightError> {
    target
        .parse()
        .map_err(|e| KnightError::Channel(format!("invalid whatsapp JID '{target}': {e}")))
}

/// Rewrite Markdown that WhatsApp does not render.
///
/// Headers become bold uppercase lines, `**bold**` becomes `*bold*`,
/// `[text](url)` becomes `text (url)`, table rows become `- a | b` bullets,
/// and horizontal rules and table separators are dropped.
pub fn sanitize_for_whatsapp(text: &str) -> String {
    let lines: Vec<String> = text.lines().filter_map(convert_line).collect();
    let mut out = lines.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Convert one line; `None` drops it.
fn convert_line(line: &str) -> Option<String> {
    let trimmed = line.trim();

    if is_rule(trimmed) {
        return None;
    }

    let header = ["### ", "## ", "# "]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix));
    if let Some(header) = header {
        return Some(format!("*{}*", header.trim().to_uppercase()));
    }

    if trimmed.len() >= 2 && trimmed.starts_with('|') && trimmed.ends_with('|') {
        let inner = &trimmed[1..trimmed.len() - 1];
        if inner.chars().all(|c| matches!(c, '-' | '|' | ' ' | ':')) {
            return None;
        }
        let cells: Vec<&str> = inner.split('|').map(str::trim).collect();
        return Some(format!("- {}", cells.join(" | ")));
    }

    Some(convert_bold(&convert_links(line)))
}

fn is_rule(trimmed: &str) -> bool {
    trimmed.matches('-').count() >= 3 && trimmed.chars().all(|c| c == '-' || c == ' ')
}

/// `[text](url)` → `text (url)`.
fn convert_links(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        let after_open = &rest[open + 1..];
        let Some(mid) = after_open.find("](") else {
            break;
        };
        let after_mid = &after_open[mid + 2..];
        let Some(close) = after_mid.find(')') else {
            break;
        };

        out.push_str(&rest[..open]);
        out.push_str(&after_open[..mid]);
        out.push_str(" (");
        out.push_str(&after_mid[..close]);
        out.push(')');
        rest = &after_mid[close + 1..];
    }

    out.push_str(rest);
    out
}

/// `**bold**` → `*bold*`. An unmatched `**` is left alone.
fn convert_bold(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(start) = rest.find("**") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("**") else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push('*');
        out.push_str(&after[..end]);
        out.push('*');
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
