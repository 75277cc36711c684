//! Optional AI auto-reply for inbound text messages.

use super::history::{MemoryLog, NoopLog};
use knight_channels::whatsapp::sanitize_for_whatsapp;
use knight_core::{
    config::ResponderConfig,
    context::{Context, ContextEntry},
    message::{identity_user, IncomingMessage, MessageContent, OutgoingMessage},
    traits::{Channel, ConversationLog, Provider},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const APOLOGY: &str = "Sorry, I couldn't answer that right now. Please try again later.";

pub struct Responder {
    provider: Arc<dyn Provider>,
    channel: Arc<dyn Channel>,
    log: Arc<dyn ConversationLog>,
    config: ResponderConfig,
    /// Users that get replies. Empty = everyone.
    allowed_users: Vec<String>,
}

impl Responder {
    pub fn new(
        provider: Arc<dyn Provider>,
        channel: Arc<dyn Channel>,
        config: ResponderConfig,
        allowed_users: Vec<String>,
    ) -> Self {
        let log: Arc<dyn ConversationLog> = if config.max_history == 0 {
            Arc::new(NoopLog)
        } else {
            Arc::new(MemoryLog::new(
                config.max_history,
                Duration::from_secs(config.session_timeout_mins * 60),
            ))
        };
        Self {
            provider,
            channel,
            log,
            config,
            allowed_users,
        }
    }

    /// Forget a user's conversation.
    pub async fn clear_history(&self, identity: &str) {
        self.log.clear(identity_user(identity)).await;
    }

    /// Whether this message would get a reply.
    pub fn wants(&self, msg: &IncomingMessage) -> bool {
        self.prompt_for(msg).is_some()
    }

    /// Text to answer, or `None` when this message gets no reply.
    fn prompt_for<'a>(&self, msg: &'a IncomingMessage) -> Option<&'a str> {
        if msg.from_me || (msg.is_group && !self.config.reply_in_groups) {
            return None;
        }
        let MessageContent::Text(ref text) = msg.content else {
            return None;
        };
        if text.trim().is_empty() {
            return None;
        }
        let user = identity_user(&msg.sender_id);
        if !self.allowed_users.is_empty()
            && !self
                .allowed_users
                .iter()
                .any(|allowed| identity_user(allowed) == user)
        {
            debug!("responder: {user} is not in allowed_users");
            return None;
        }
        Some(text)
    }

    /// Answer a message if it qualifies. Returns whether a reply was sent.
    pub async fn handle(&self, msg: &IncomingMessage) -> bool {
        let Some(prompt) = self.prompt_for(msg) else {
            return false;
        };
        let user = identity_user(&msg.sender_id).to_string();

        let _ = self.channel.send_typing(&msg.chat_id).await;

        let context = Context::new(prompt)
            .with_system_prompt(&self.config.system_prompt)
            .with_history(self.log.recent(&user).await);

        let reply = match self.provider.complete(&context).await {
            Ok(completion) => {
                info!(
                    "responder: {} answered {user} in {}ms",
                    completion.metadata.provider_used, completion.metadata.processing_time_ms
                );
                self.log.append(&user, ContextEntry::user(prompt)).await;
                self.log
                    .append(&user, ContextEntry::assistant(completion.text.as_str()))
                    .await;
                sanitize_for_whatsapp(&completion.text)
            }
            Err(e) => {
                warn!("responder: provider {} failed: {e}", self.provider.name());
                APOLOGY.to_string()
            }
        };

        match self
            .channel
            .send(OutgoingMessage::text(&msg.chat_id, reply))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("responder: reply to {} failed: {e}", msg.chat_id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{incoming, RecordingChannel, ScriptedProvider};
    use super::*;
    use knight_core::message::{MediaHandle, MediaKind, OutgoingPayload};

    fn responder(
        provider: ScriptedProvider,
        config: ResponderConfig,
        allowed: Vec<String>,
    ) -> (Responder, Arc<RecordingChannel>, Arc<ScriptedProvider>) {
        let channel = Arc::new(RecordingChannel::default());
        let provider = Arc::new(provider);
        let r = Responder::new(provider.clone(), channel.clone(), config, allowed);
        (r, channel, provider)
    }

    fn enabled() -> ResponderConfig {
        ResponderConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn sent_text(channel: &RecordingChannel, i: usize) -> String {
        match &channel.sent()[i].payload {
            OutgoingPayload::Text(t) => t.clone(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replies_with_sanitized_answer() {
        let (r, channel, _) = responder(ScriptedProvider::answering("**Hi** there"), enabled(), vec![]);
        assert!(r.handle(&incoming("M1", "94770000001@s.whatsapp.net", "hello")).await);
        assert_eq!(channel.sent()[0].target, "94770000001@s.whatsapp.net");
        assert_eq!(sent_text(&channel, 0), "*Hi* there");
    }

    #[tokio::test]
    async fn test_history_feeds_next_context() {
        let (r, _, provider) = responder(ScriptedProvider::answering("ok"), enabled(), vec![]);
        let sender = "94770000001@s.whatsapp.net";
        r.handle(&incoming("M1", sender, "first")).await;
        r.handle(&incoming("M2", sender, "second")).await;

        let contexts = provider.contexts();
        assert!(contexts[0].history.is_empty());
        assert_eq!(
            contexts[1].history,
            vec![ContextEntry::user("first"), ContextEntry::assistant("ok")]
        );
        assert_eq!(contexts[1].current_message, "second");
    }

    #[tokio::test]
    async fn test_history_disabled() {
        let config = ResponderConfig {
            max_history: 0,
            ..enabled()
        };
        let (r, _, provider) = responder(ScriptedProvider::answering("ok"), config, vec![]);
        let sender = "94770000001@s.whatsapp.net";
        r.handle(&incoming("M1", sender, "first")).await;
        r.handle(&incoming("M2", sender, "second")).await;
        assert!(provider.contexts()[1].history.is_empty());
    }

    #[tokio::test]
    async fn test_clear_history_forgets_user() {
        let (r, _, provider) = responder(ScriptedProvider::answering("ok"), enabled(), vec![]);
        let sender = "94770000001@s.whatsapp.net";
        r.handle(&incoming("M1", sender, "first")).await;
        r.clear_history("+94770000001").await;
        r.handle(&incoming("M2", sender, "second")).await;
        assert!(provider.contexts()[1].history.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_sends_apology() {
        let (r, channel, _) = responder(ScriptedProvider::failing(), enabled(), vec![]);
        assert!(r.handle(&incoming("M1", "94770000001@s.whatsapp.net", "hi")).await);
        assert_eq!(sent_text(&channel, 0), APOLOGY);
    }

    #[tokio::test]
    async fn test_skips_groups_own_and_media() {
        let (r, channel, _) = responder(ScriptedProvider::answering("ok"), enabled(), vec![]);

        let mut group = incoming("G1", "94770000001@s.whatsapp.net", "hi all");
        group.chat_id = "120363001234567890@g.us".into();
        group.is_group = true;
        assert!(!r.handle(&group).await);

        let mut own = incoming("O1", "94741907061@s.whatsapp.net", "note to self");
        own.from_me = true;
        assert!(!r.handle(&own).await);

        let mut image = incoming("I1", "94770000001@s.whatsapp.net", "");
        image.content = MessageContent::Image {
            caption: "look".into(),
            media: MediaHandle::new(MediaKind::Image, None, ()),
        };
        assert!(!r.handle(&image).await);

        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_group_replies_when_enabled() {
        let config = ResponderConfig {
            reply_in_groups: true,
            ..enabled()
        };
        let (r, channel, _) = responder(ScriptedProvider::answering("ok"), config, vec![]);
        let mut group = incoming("G1", "94770000001@s.whatsapp.net", "hi all");
        group.chat_id = "120363001234567890@g.us".into();
        group.is_group = true;
        assert!(r.handle(&group).await);
        assert_eq!(channel.sent()[0].target, "120363001234567890@g.us");
    }

    #[tokio::test]
    async fn test_allowed_users_filter() {
        let (r, channel, _) = responder(
            ScriptedProvider::answering("ok"),
            enabled(),
            vec!["+94770000001".into()],
        );
        assert!(r.handle(&incoming("M1", "94770000001:5@s.whatsapp.net", "hi")).await);
        assert!(!r.handle(&incoming("M2", "94770000002@s.whatsapp.net", "hi")).await);
        assert_eq!(channel.sent().len(), 1);
    }
}
