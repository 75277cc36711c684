//! Revocation reporter: turns a revoked message's shadow copy into an owner report.

use super::{store::discard_media, with_timeout, AntiDelete, MediaRef, ShadowEntry};
use chrono::{DateTime, Local, Utc};
use knight_core::message::{identity_user, MediaKind, OutgoingMessage, RevocationEvent};
use tracing::{debug, error, info};

/// Whether each delivery of a report went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub report_delivered: bool,
    /// `None` when the entry had no saved media.
    pub media_delivered: Option<bool>,
}

/// What happened to a revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Owner-related deletion; the entry (if any) was dropped without a report.
    Suppressed,
    /// Nothing shadowed under that id (never captured, swept, or already reported).
    NotFound,
    Reported(Delivery),
}

impl AntiDelete {
    /// Handle a "delete for everyone" notification.
    ///
    /// The shadow entry is consumed before anything is sent, so a duplicate
    /// revocation for the same id is always `NotFound`. The entry's media file
    /// is deleted on every path that consumed it.
    pub async fn on_revocation(&self, event: &RevocationEvent) -> ReportOutcome {
        if self.is_exempt(&event.deleted_by) {
            if let Some(entry) = self.consume(&event.message_id) {
                drop_entry(&entry);
            }
            debug!(
                "anti-delete: owner revoked {}, not reporting",
                event.message_id
            );
            return ReportOutcome::Suppressed;
        }

        let Some(entry) = self.consume(&event.message_id) else {
            debug!("anti-delete: no shadow copy for {}", event.message_id);
            return ReportOutcome::NotFound;
        };

        if self.is_exempt(&entry.sender_id) {
            drop_entry(&entry);
            debug!(
                "anti-delete: {} was written by the owner, not reporting",
                event.message_id
            );
            return ReportOutcome::Suppressed;
        }

        let group = if entry.is_group {
            Some(self.group_label(&entry.chat_id).await)
        } else {
            None
        };

        let report = format_report(&entry, event, group.as_deref());
        let report_delivered = self
            .deliver(OutgoingMessage::text(&self.owner_jid, report), "report")
            .await;

        let media_delivered = match entry.media {
            Some(ref media) => {
                let delivered = self.forward_media(&entry, media).await;
                discard_media(media);
                Some(delivered)
            }
            None => None,
        };

        info!(
            "anti-delete: reported {} deleted by {} (report: {report_delivered}, media: {media_delivered:?})",
            event.message_id, event.deleted_by
        );

        ReportOutcome::Reported(Delivery {
            report_delivered,
            media_delivered,
        })
    }

    /// Group subject, or the chat id when the lookup fails or is slow.
    async fn group_label(&self, chat_id: &str) -> String {
        let lookup = self.channel.group_subject(chat_id);
        match with_timeout(self.config.send_timeout(), "group lookup", lookup).await {
            Ok(subject) if !subject.trim().is_empty() => subject,
            Ok(_) => chat_id.to_string(),
            Err(e) => {
                debug!("anti-delete: group lookup for {chat_id} failed: {e}");
                chat_id.to_string()
            }
        }
    }

    /// Send with the configured timeout. Failures are logged, never propagated.
    async fn deliver(&self, message: OutgoingMessage, what: &str) -> bool {
        let send = self.channel.send(message);
        match with_timeout(self.config.send_timeout(), "delivery", send).await {
            Ok(()) => true,
            Err(e) => {
                error!("anti-delete: {what} delivery failed: {e}");
                false
            }
        }
    }

    /// Re-send the saved blob to the owner. On failure the owner gets a text notice.
    async fn forward_media(&self, entry: &ShadowEntry, media: &MediaRef) -> bool {
        let data = match tokio::fs::read(&media.local_path).await {
            Ok(data) => data,
            Err(e) => {
                error!(
                    "anti-delete: cannot read {}: {e}",
                    media.local_path.display()
                );
                self.notify_media_failure(entry, media.kind).await;
                return false;
            }
        };

        let caption = match media.kind {
            MediaKind::Sticker => None,
            kind => Some(media_caption(entry, kind)),
        };
        let message = OutgoingMessage::media(
            &self.owner_jid,
            media.kind,
            data,
            caption,
            entry.file_name.clone(),
        );

        if self.deliver(message, media.kind.as_str()).await {
            true
        } else {
            self.notify_media_failure(entry, media.kind).await;
            false
        }
    }

    async fn notify_media_failure(&self, entry: &ShadowEntry, kind: MediaKind) {
        let notice = format!(
            "⚠️ The deleted {kind} from @{} could not be forwarded.",
            identity_user(&entry.sender_id)
        );
        self.deliver(OutgoingMessage::text(&self.owner_jid, notice), "media notice")
            .await;
    }
}

fn drop_entry(entry: &ShadowEntry) {
    if let Some(ref media) = entry.media {
        discard_media(media);
    }
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn who(identity: &str, name: Option<&str>) -> String {
    let user = identity_user(identity);
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("@{user} ({name})"),
        None => format!("@{user}"),
    }
}

fn media_caption(entry: &ShadowEntry, kind: MediaKind) -> String {
    let mut caption = format!(
        "🗑️ Deleted {kind} from {}",
        who(&entry.sender_id, entry.sender_name.as_deref())
    );
    if !entry.text.trim().is_empty() {
        caption.push_str("\n\n");
        caption.push_str(&entry.text);
    }
    caption
}

/// Render the owner-facing report for a revoked message.
///
/// `group` is the resolved group label and is only shown for group chats.
pub fn format_report(entry: &ShadowEntry, event: &RevocationEvent, group: Option<&str>) -> String {
    let mut lines = vec![
        "🗑️ *Deleted message detected*".to_string(),
        String::new(),
        format!("⏰ *Deleted at:* {}", local_time(event.timestamp)),
        format!("🚫 *Deleted by:* {}", who(&event.deleted_by, None)),
        format!(
            "👤 *Sender:* {}",
            who(&entry.sender_id, entry.sender_name.as_deref())
        ),
    ];
    if let Some(group) = group {
        lines.push(format!("👥 *Group:* {group}"));
    }
    lines.push(format!("📥 *Received at:* {}", local_time(entry.captured_at)));

    if !entry.text.trim().is_empty() {
        lines.push(String::new());
        lines.push("💬 *Message:*".to_string());
        lines.push(entry.text.clone());
    }

    if let Some(kind) = entry.media_kind {
        lines.push(String::new());
        let mut line = format!("📎 *Media:* {kind}");
        if let Some(ref name) = entry.file_name {
            line.push_str(&format!(" ({name})"));
        }
        if entry.media.is_none() {
            line.push_str(" (could not be recovered)");
        }
        lines.push(line);
    }

    lines.join("\n")
}
