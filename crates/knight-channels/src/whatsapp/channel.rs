//! Channel trait implementation for WhatsApp.

use super::send::{parse_jid, retry_send};
use super::WhatsAppChannel;
use crate::utils::split_message;
use async_trait::async_trait;
use knight_core::{
    error::KnightError,
    message::{ChannelEvent, MediaHandle, MediaKind, OutgoingMessage, OutgoingPayload},
    traits::Channel,
};
use tokio::sync::mpsc;
use tracing::info;
use wacore_binary::jid::Jid;
use waproto::whatsapp as wa;
use whatsapp_rust::client::Client;
use whatsapp_rust::download::MediaType;

/// WhatsApp's per-message text limit.
const MAX_TEXT_LEN: usize = 4096;

fn media_type(kind: MediaKind) -> MediaType {
    match kind {
        MediaKind::Image => MediaType::Image,
        MediaKind::Video => MediaType::Video,
        MediaKind::Audio => MediaType::Audio,
        MediaKind::Sticker => MediaType::Sticker,
        MediaKind::Document => MediaType::Document,
    }
}

fn missing_media(kind: MediaKind) -> KnightError {
    KnightError::Channel(format!("message carries no {kind} payload"))
}

impl WhatsAppChannel {
    async fn remember_sent(&self, id: String) {
        self.sent_ids.lock().await.insert(id);
    }

    /// Send text, split into chunks WhatsApp accepts.
    async fn send_text(&self, client: &Client, jid: &Jid, text: &str) -> Result<(), KnightError> {
        for chunk in split_message(text, MAX_TEXT_LEN) {
            let msg = wa::Message {
                conversation: Some(chunk.to_string()),
                ..Default::default()
            };
            let id = retry_send(client, jid, msg).await?;
            self.remember_sent(id).await;
        }
        Ok(())
    }

    /// Upload a blob and send it as the matching media message.
    async fn send_media(
        &self,
        client: &Client,
        jid: &Jid,
        kind: MediaKind,
        data: Vec<u8>,
        caption: Option<String>,
        file_name: Option<String>,
    ) -> Result<(), KnightError> {
        let size = data.len();
        let upload = client
            .upload(data, media_type(kind))
            .await
            .map_err(|e| KnightError::Channel(format!("whatsapp {kind} upload failed: {e}")))?;
        let mimetype = Some(kind.mimetype().to_string());

        let msg = match kind {
            MediaKind::Image => wa::Message {
                image_message: Some(Box::new(wa::message::ImageMessage {
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_sha256: Some(upload.file_sha256),
                    file_length: Some(upload.file_length),
                    mimetype,
                    caption,
                    ..Default::default()
                })),
                ..Default::default()
            },
            MediaKind::Video => wa::Message {
                video_message: Some(Box::new(wa::message::VideoMessage {
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_sha256: Some(upload.file_sha256),
                    file_length: Some(upload.file_length),
                    mimetype,
                    caption,
                    ..Default::default()
                })),
                ..Default::default()
            },
            MediaKind::Audio => wa::Message {
                audio_message: Some(Box::new(wa::message::AudioMessage {
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_sha256: Some(upload.file_sha256),
                    file_length: Some(upload.file_length),
                    mimetype,
                    ..Default::default()
                })),
                ..Default::default()
            },
            MediaKind::Sticker => wa::Message {
                sticker_message: Some(Box::new(wa::message::StickerMessage {
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_sha256: Some(upload.file_sha256),
                    file_length: Some(upload.file_length),
                    mimetype,
                    ..Default::default()
                })),
                ..Default::default()
            },
            MediaKind::Document => wa::Message {
                document_message: Some(Box::new(wa::message::DocumentMessage {
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_sha256: Some(upload.file_sha256),
                    file_length: Some(upload.file_length),
                    mimetype,
                    caption,
                    file_name: Some(file_name.unwrap_or_else(|| "document.bin".to_string())),
                    ..Default::default()
                })),
                ..Default::default()
            },
        };

        let id = retry_send(client, jid, msg).await?;
        self.remember_sent(id).await;
        info!("whatsapp sent {kind} ({size} bytes) to {jid}");
        Ok(())
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self) -> Result<mpsc::Receiver<ChannelEvent>, KnightError> {
        let (tx, rx) = mpsc::channel(64);
        self.build_and_run_bot(tx).await?;
        info!("WhatsApp channel started");
        Ok(rx)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), KnightError> {
        let client = self.connected_client().await?;
        let jid = parse_jid(&message.target)?;

        match message.payload {
            OutgoingPayload::Text(text) => self.send_text(&client, &jid, &text).await,
            OutgoingPayload::Media {
                kind,
                data,
                caption,
                file_name,
            } => {
                self.send_media(&client, &jid, kind, data, caption, file_name)
                    .await
            }
        }
    }

    async fn download_media(&self, media: &MediaHandle) -> Result<Vec<u8>, KnightError> {
        let kind = media.kind;
        let msg = media.source::<wa::Message>().ok_or_else(|| {
            KnightError::Channel("media handle did not come from whatsapp".into())
        })?;
        let client = self.connected_client().await?;

        let result = match kind {
            MediaKind::Image => {
                let m = msg.image_message.as_deref().ok_or_else(|| missing_media(kind))?;
                client.download(m).await
            }
            MediaKind::Video => {
                let m = msg.video_message.as_deref().ok_or_else(|| missing_media(kind))?;
                client.download(m).await
            }
            MediaKind::Audio => {
                let m = msg.audio_message.as_deref().ok_or_else(|| missing_media(kind))?;
                client.download(m).await
            }
            MediaKind::Sticker => {
                let m = msg
                    .sticker_message
                    .as_deref()
                    .ok_or_else(|| missing_media(kind))?;
                client.download(m).await
            }
            MediaKind::Document => {
                let m = msg
                    .document_message
                    .as_deref()
                    .ok_or_else(|| missing_media(kind))?;
                client.download(m).await
            }
        };

        result.map_err(|e| KnightError::Channel(format!("whatsapp {kind} download failed: {e}")))
    }

    async fn group_subject(&self, chat_id: &str) -> Result<String, KnightError> {
        let client = self.connected_client().await?;
        let jid = parse_jid(chat_id)?;
        let metadata = client
            .groups()
            .get_metadata(&jid)
            .await
            .map_err(|e| KnightError::Channel(format!("group metadata for {chat_id}: {e}")))?;
        Ok(metadata.subject)
    }

    async fn send_typing(&self, target: &str) -> Result<(), KnightError> {
        if let Some(client) = self.client.lock().await.clone() {
            let jid = parse_jid(target)?;
            let _ = client.chatstate().send_composing(&jid).await;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), KnightError> {
        *self.client.lock().await = None;
        info!("WhatsApp channel stopped");
        Ok(())
    }
}
