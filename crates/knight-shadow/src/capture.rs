//! Capture path: filtering and media download.

use super::{with_timeout, AntiDelete, MediaRef, ShadowEntry};
use chrono::Utc;
use knight_core::{
    config::AntiDeleteConfig,
    message::{IncomingMessage, MediaHandle, MediaKind, MessageContent},
};
use std::path::Path;
use tracing::{debug, warn};

/// Why a message was not shadowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Anti-delete is switched off.
    Disabled,
    /// Sent by the account the bot runs on.
    SelfAuthored,
    /// Written by the owner while the owner exemption is on.
    OwnerExempt,
    /// No text and no media worth keeping.
    NothingToKeep,
}

/// Result of a capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Skipped(SkipReason),
    Captured {
        /// The media blob is on disk.
        media_saved: bool,
        /// An entry with the same id was overwritten.
        replaced: bool,
    },
}

/// Decide whether a message is shadowed. `None` means capture it.
pub fn capture_policy(config: &AntiDeleteConfig, message: &IncomingMessage) -> Option<SkipReason> {
    if !config.enabled {
        return Some(SkipReason::Disabled);
    }
    if message.from_me {
        return Some(SkipReason::SelfAuthored);
    }
    if config.exempt_owner_messages && config.is_owner(&message.sender_id) {
        return Some(SkipReason::OwnerExempt);
    }
    if matches!(message.content, MessageContent::Unsupported) {
        return Some(SkipReason::NothingToKeep);
    }
    None
}

impl AntiDelete {
    /// Shadow an inbound message.
    ///
    /// A failed or slow media download never drops the capture: the entry is
    /// stored with whatever text the message had and no media.
    pub async fn capture(&self, message: &IncomingMessage) -> CaptureOutcome {
        if let Some(reason) = capture_policy(&self.config, message) {
            debug!("anti-delete: not capturing {} ({reason:?})", message.message_id);
            return CaptureOutcome::Skipped(reason);
        }

        let handle = message.content.media();
        let file_name = message.content.file_name().map(str::to_string);
        let media = match handle {
            Some(handle) => {
                self.save_media(&message.message_id, handle, file_name.as_deref())
                    .await
            }
            None => None,
        };

        let entry = ShadowEntry {
            message_id: message.message_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_name: message.sender_name.clone(),
            chat_id: message.chat_id.clone(),
            is_group: message.is_group,
            text: message.content.text().to_string(),
            media_kind: handle.map(|h| h.kind),
            media,
            file_name,
            captured_at: Utc::now(),
        };

        let media_saved = entry.media.is_some();
        let replaced = self.insert(entry);
        debug!(
            "anti-delete: captured {} from {} (media saved: {media_saved})",
            message.message_id, message.sender_id
        );

        CaptureOutcome::Captured {
            media_saved,
            replaced,
        }
    }

    /// Download a blob and write it under the temp dir. `None` on any failure.
    async fn save_media(
        &self,
        message_id: &str,
        handle: &MediaHandle,
        file_name: Option<&str>,
    ) -> Option<MediaRef> {
        let kind = handle.kind;
        let timeout = self.config.download_timeout();

        let download = self.channel.download_media(handle);
        let bytes = match with_timeout(timeout, "media download", download).await {
            Ok(bytes) if bytes.is_empty() => {
                warn!("anti-delete: {kind} download for {message_id} returned 0 bytes");
                return None;
            }
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("anti-delete: {kind} download failed for {message_id}: {e}");
                return None;
            }
        };

        let path = self
            .temp_dir
            .join(media_file_name(message_id, kind, file_name));
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            warn!("anti-delete: failed to write {}: {e}", path.display());
            return None;
        }

        debug!("anti-delete: saved {} ({} bytes)", path.display(), bytes.len());
        Some(MediaRef {
            kind,
            local_path: path,
        })
    }
}

/// `<message id>.<ext>`, with the id reduced to filename-safe characters.
///
/// Documents keep the extension of their original name when it has one.
pub(crate) fn media_file_name(message_id: &str, kind: MediaKind, original: Option<&str>) -> String {
    let mut stem: String = message_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        stem.push_str("message");
    }

    let ext = match kind {
        MediaKind::Document => original
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| kind.extension().to_string()),
        _ => kind.extension().to_string(),
    };

    format!("{stem}.{ext}")
}
