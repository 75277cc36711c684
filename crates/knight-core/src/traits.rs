use crate::{
    context::{Context, ContextEntry},
    error::KnightError,
    message::{ChannelEvent, Completion, MediaHandle, OutgoingMessage},
};
use async_trait::async_trait;

/// An AI backend that turns a conversation context into a reply.
///
/// Every AI backend (Gemini, OpenAI-compatible, ...) implements this trait
/// to provide a uniform interface.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Send a conversation context to the provider and get a response.
    async fn complete(&self, context: &Context) -> Result<Completion, KnightError>;

    /// Check if the provider is available and ready.
    async fn is_available(&self) -> bool;
}

/// A messaging transport.
///
/// A channel yields normalized events and can deliver text or media,
/// fetch media referenced by an inbound message, and resolve group names.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start listening. Returns a receiver of inbound messages and revocations.
    async fn start(&self) -> Result<tokio::sync::mpsc::Receiver<ChannelEvent>, KnightError>;

    /// Deliver a text or media message.
    async fn send(&self, message: OutgoingMessage) -> Result<(), KnightError>;

    /// Download the blob behind a media handle produced by this channel.
    async fn download_media(&self, media: &MediaHandle) -> Result<Vec<u8>, KnightError>;

    /// Human-readable name of a group chat.
    async fn group_subject(&self, _chat_id: &str) -> Result<String, KnightError> {
        Err(KnightError::Channel("group metadata not supported".into()))
    }

    /// Send a typing indicator to show the bot is processing.
    async fn send_typing(&self, _target: &str) -> Result<(), KnightError> {
        Ok(())
    }

    /// Graceful shutdown.
    async fn stop(&self) -> Result<(), KnightError>;
}

/// Per-user conversation history used by the responder.
///
/// Implementations that persist nothing are valid: the gateway injects one
/// when history is disabled rather than branching at call sites.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// Recent turns for a user, oldest first.
    async fn recent(&self, user: &str) -> Vec<ContextEntry>;

    /// Record one turn.
    async fn append(&self, user: &str, entry: ContextEntry);

    /// Forget a user's history.
    async fn clear(&self, user: &str);
}
