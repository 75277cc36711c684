//! Inbound normalization: raw protocol messages into `ChannelEvent`s.

use chrono::Utc;
use super::sent::SentIds;
use knight_core::message::{
    is_group_chat, ChannelEvent, IncomingMessage, MediaHandle, MediaKind, MessageContent, RevocationEvent,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use wacore::types::message::MessageInfo;
use waproto::whatsapp as wa;
use waproto::whatsapp::message::protocol_message;

/// Wrappers may nest (an ephemeral view-once, for example).
const MAX_WRAPPER_DEPTH: usize = 3;

/// Peel device-sent, ephemeral and view-once wrappers off a message.
pub(super) fn unwrap_message(msg: &wa::Message) -> &wa::Message {
    let mut current = msg;
    for _ in 0..MAX_WRAPPER_DEPTH {
        let inner = current
            .device_sent_message
            .as_ref()
            .and_then(|d| d.message.as_deref())
            .or_else(|| {
                current
                    .ephemeral_message
                    .as_ref()
                    .and_then(|e| e.message.as_deref())
            })
            .or_else(|| {
                current
                    .view_once_message
                    .as_ref()
                    .and_then(|v| v.message.as_deref())
            });
        match inner {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

/// Id of the message a REVOKE protocol message deletes.
pub(super) fn revoked_message_id(msg: &wa::Message) -> Option<String> {
    let proto = msg.protocol_message.as_ref()?;
    if proto.r#type != Some(protocol_message::Type::Revoke as i32) {
        return None;
    }
    proto
        .key
        .as_ref()?
        .id
        .clone()
        .filter(|id| !id.is_empty())
}

/// Classify an unwrapped message.
///
/// Media handles carry a clone of the message so `download_media` can find
/// the encrypted blob later.
pub(super) fn classify(msg: &wa::Message) -> MessageContent {
    let handle = |kind: MediaKind, mimetype: &Option<String>| {
        MediaHandle::new(kind, mimetype.clone(), msg.clone())
    };

    if let Some(ref img) = msg.image_message {
        return MessageContent::Image {
            caption: img.caption.clone().unwrap_or_default(),
            media: handle(MediaKind::Image, &img.mimetype),
        };
    }
    if let Some(ref video) = msg.video_message {
        return MessageContent::Video {
            caption: video.caption.clone().unwrap_or_default(),
            media: handle(MediaKind::Video, &video.mimetype),
        };
    }
    if let Some(ref audio) = msg.audio_message {
        return MessageContent::Audio {
            media: handle(MediaKind::Audio, &audio.mimetype),
        };
    }
    if let Some(ref sticker) = msg.sticker_message {
        return MessageContent::Sticker {
            media: handle(MediaKind::Sticker, &sticker.mimetype),
        };
    }
    if let Some(ref doc) = msg.document_message {
        return MessageContent::Document {
            caption: doc.caption.clone().unwrap_or_default(),
            file_name: doc.file_name.clone().filter(|n| !n.is_empty()),
            media: handle(MediaKind::Document, &doc.mimetype),
        };
    }

    let text = msg.conversation.as_deref().or_else(|| {
        msg.extended_text_message
            .as_ref()
            .and_then(|e| e.text.as_deref())
    });
    match text {
        Some(text) if !text.is_empty() => MessageContent::Text(text.to_string()),
        _ => MessageContent::Unsupported,
    }
}

/// Turn one protocol message into an event and forward it to the gateway.
///
/// Revocations are forwarded even when we sent the original; echoes of our
/// own outgoing messages are not.
pub(super) async fn handle_whatsapp_message(
    msg: wa::Message,
    info: MessageInfo,
    tx: &mpsc::Sender<ChannelEvent>,
    sent_ids: &Arc<Mutex<SentIds>>,
) {
    let inner = unwrap_message(&msg);
    let chat_id = info.source.chat.to_string();
    let is_group = is_group_chat(&chat_id);
    let sender_id = info.source.sender.to_string();

    let event = match revoked_message_id(inner) {
        Some(revoked) => {
            debug!("WA revoke: {revoked} by {sender_id} in {chat_id}");
            ChannelEvent::Revocation(RevocationEvent {
                message_id: revoked,
                chat_id,
                deleted_by: sender_id,
                timestamp: Utc::now(),
            })
        }
        None => {
            if sent_ids.lock().await.take(&info.id) {
                debug!("skipping own echo: {}", info.id);
                return;
            }
            let sender_name = Some(info.push_name.clone()).filter(|n| !n.is_empty());
            ChannelEvent::Message(IncomingMessage {
                message_id: info.id.clone(),
                chat_id,
                sender_id,
                sender_name,
                is_group,
                from_me: info.source.is_from_me,
                content: classify(inner),
                timestamp: Utc::now(),
            })
        }
    };

    if tx.send(event).await.is_err() {
        info!("whatsapp channel receiver dropped");
    }
}
