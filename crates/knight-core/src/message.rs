//! Normalized message model shared by the transport, the shadow store,
//! and the responder. Raw protocol shapes never leave the transport crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Kind of media a message carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Sticker,
    Document,
}

impl MediaKind {
    /// File extension used when the blob is written to disk.
    ///
    /// Documents carry their own name; `bin` is only the fallback.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
            Self::Audio => "mp3",
            Self::Sticker => "webp",
            Self::Document => "bin",
        }
    }

    /// Default MIME type for re-sending the blob.
    pub fn mimetype(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
            Self::Audio => "audio/mpeg",
            Self::Sticker => "image/webp",
            Self::Document => "application/octet-stream",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Sticker => "sticker",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to downloadable media.
///
/// The `source` is owned by the transport that produced the handle and is
/// only ever downcast by that same transport's `download_media`.
#[derive(Clone)]
pub struct MediaHandle {
    pub kind: MediaKind,
    pub mimetype: Option<String>,
    source: Arc<dyn Any + Send + Sync>,
}

impl MediaHandle {
    pub fn new<T: Any + Send + Sync>(kind: MediaKind, mimetype: Option<String>, source: T) -> Self {
        Self {
            kind,
            mimetype,
            source: Arc::new(source),
        }
    }

    /// Borrow the transport-specific source, if it has the expected type.
    pub fn source<T: Any>(&self) -> Option<&T> {
        self.source.downcast_ref::<T>()
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("kind", &self.kind)
            .field("mimetype", &self.mimetype)
            .finish_non_exhaustive()
    }
}

/// What an inbound message carries, classified once at the transport boundary.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    Image {
        caption: String,
        media: MediaHandle,
    },
    Video {
        caption: String,
        media: MediaHandle,
    },
    Audio {
        media: MediaHandle,
    },
    Sticker {
        media: MediaHandle,
    },
    Document {
        caption: String,
        file_name: Option<String>,
        media: MediaHandle,
    },
    /// Reactions, receipts, polls and anything else we do not keep.
    Unsupported,
}

impl MessageContent {
    /// Text of the message: the body for text messages, the caption for media.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Image { caption, .. }
            | Self::Video { caption, .. }
            | Self::Document { caption, .. } => caption,
            Self::Audio { .. } | Self::Sticker { .. } | Self::Unsupported => "",
        }
    }

    pub fn media(&self) -> Option<&MediaHandle> {
        match self {
            Self::Image { media, .. }
            | Self::Video { media, .. }
            | Self::Audio { media }
            | Self::Sticker { media }
            | Self::Document { media, .. } => Some(media),
            Self::Text(_) | Self::Unsupported => None,
        }
    }

    /// Original file name, for documents only.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Document { file_name, .. } => file_name.as_deref(),
            _ => None,
        }
    }
}

/// An inbound message from a channel.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Transport message id (unique per chat transport).
    pub message_id: String,
    /// Conversation the message was posted in (direct or group).
    pub chat_id: String,
    /// Author identity.
    pub sender_id: String,
    /// Human-readable author name, if the transport provided one.
    pub sender_name: Option<String>,
    pub is_group: bool,
    /// Sent by the account the bot runs on.
    pub from_me: bool,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

/// A "delete for everyone" notification for a previously delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationEvent {
    /// Id of the deleted message.
    pub message_id: String,
    pub chat_id: String,
    /// Identity that performed the deletion.
    pub deleted_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything a channel hands to the gateway.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(IncomingMessage),
    Revocation(RevocationEvent),
}

/// What to deliver.
#[derive(Debug, Clone)]
pub enum OutgoingPayload {
    Text(String),
    Media {
        kind: MediaKind,
        data: Vec<u8>,
        caption: Option<String>,
        file_name: Option<String>,
    },
}

/// An outbound message addressed to a single identity or chat.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub target: String,
    pub payload: OutgoingPayload,
}

impl OutgoingMessage {
    pub fn text(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            payload: OutgoingPayload::Text(text.into()),
        }
    }

    pub fn media(
        target: impl Into<String>,
        kind: MediaKind,
        data: Vec<u8>,
        caption: Option<String>,
        file_name: Option<String>,
    ) -> Self {
        Self {
            target: target.into(),
            payload: OutgoingPayload::Media {
                kind,
                data,
                caption,
                file_name,
            },
        }
    }
}

/// Metadata about how a provider response was generated.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageMetadata {
    /// Which provider produced this response.
    pub provider_used: String,
    /// Token count (if available from the provider).
    pub tokens_used: Option<u64>,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    /// Model identifier (if applicable).
    pub model: Option<String>,
}

/// Text answer from an AI provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Completion {
    pub text: String,
    pub metadata: MessageMetadata,
}

/// Group chats live on the `g.us` server.
pub fn is_group_chat(chat_id: &str) -> bool {
    chat_id.ends_with("@g.us")
}

/// User part of an identity: `"123:4@s.whatsapp.net"` and `" +123"` -> `"123"`.
pub fn identity_user(id: &str) -> &str {
    let id = id.trim().trim_start_matches('+');
    let user = id.split('@').next().unwrap_or(id);
    user.split(':').next().unwrap_or(user)
}

/// Whether two identities name the same account, ignoring `+`, server and
/// device suffixes.
pub fn same_identity(a: &str, b: &str) -> bool {
    let (a, b) = (identity_user(a), identity_user(b));
    !a.is_empty() && a == b
}
