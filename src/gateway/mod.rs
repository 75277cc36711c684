//! Gateway: the event loop that feeds channel events to owner commands,
//! the anti-delete subsystem and the responder, plus graceful shutdown.

mod commands;
mod history;
mod responder;
mod security;


pub use responder::Responder;
pub use security::{SecurityGuard, BLOCKLIST_FILE};

use commands::{Command, CommandContext};
use knight_core::{
    message::{
        same_identity, ChannelEvent, IncomingMessage, MessageContent, OutgoingMessage,
        RevocationEvent,
    },
    traits::Channel,
};
use knight_shadow::{AntiDelete, CaptureOutcome, ReportOutcome};
use security::Verdict;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long in-flight handlers may run once the channel has closed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Gateway {
    channel: Arc<dyn Channel>,
    anti_delete: Option<Arc<AntiDelete>>,
    responder: Option<Arc<Responder>>,
    guard: Option<Arc<SecurityGuard>>,
    /// Identity allowed to run `!` commands. Empty = commands off.
    command_owner: String,
    started: Instant,
}

impl Gateway {
    pub fn new(
        channel: Arc<dyn Channel>,
        anti_delete: Option<Arc<AntiDelete>>,
        responder: Option<Arc<Responder>>,
    ) -> Self {
        Self {
            channel,
            anti_delete,
            responder,
            guard: None,
            command_owner: String::new(),
            started: Instant::now(),
        }
    }

    /// Screen responder traffic through a blocklist and spam guard.
    pub fn with_security(mut self, guard: Arc<SecurityGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Accept `!` commands from `owner`.
    pub fn with_owner_commands(mut self, owner: &str) -> Self {
        self.command_owner = owner.to_string();
        self
    }

    /// Run until Ctrl+C or until the channel closes its event stream.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            "gateway running | channel: {} | anti-delete: {} | responder: {} | commands: {}",
            self.channel.name(),
            if self.anti_delete.is_some() { "on" } else { "off" },
            if self.responder.is_some() { "on" } else { "off" },
            if self.command_owner.is_empty() { "off" } else { "on" },
        );

        let mut rx = self.channel.start().await?;
        let mut tasks = JoinSet::new();
        let mut interrupted = false;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        info!("channel {} closed its event stream", self.channel.name());
                        break;
                    };
                    let gw = self.clone();
                    tasks.spawn(async move { gw.handle_event(event).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("event handler panicked: {e}");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            tasks.abort_all();
        } else if tokio::time::timeout(DRAIN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            warn!("in-flight handlers did not finish within {DRAIN_TIMEOUT:?}");
            tasks.abort_all();
        }

        self.shutdown().await;
        Ok(())
    }

    pub(crate) async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(msg) => self.on_message(&msg).await,
            ChannelEvent::Revocation(event) => self.on_revocation(&event).await,
        }
    }

    async fn on_message(&self, msg: &IncomingMessage) {
        if let Some(cmd) = self.owner_command(msg) {
            self.run_command(cmd, msg).await;
            return;
        }
        if let Some(anti_delete) = &self.anti_delete {
            match anti_delete.capture(msg).await {
                CaptureOutcome::Captured { media_saved, .. } => {
                    debug!("shadowed {} (media saved: {media_saved})", msg.message_id)
                }
                CaptureOutcome::Skipped(reason) => {
                    debug!("not shadowing {}: {reason:?}", msg.message_id)
                }
            }
        }
        if let Some(responder) = &self.responder {
            if responder.wants(msg) && self.admitted(msg) {
                responder.handle(msg).await;
            }
        }
    }

    /// A command sent by the owner in a direct chat. Own outgoing messages
    /// count only in the owner's chat with themselves.
    fn owner_command(&self, msg: &IncomingMessage) -> Option<Command> {
        if msg.is_group || !same_identity(&msg.sender_id, &self.command_owner) {
            return None;
        }
        if msg.from_me && !same_identity(&msg.chat_id, &self.command_owner) {
            return None;
        }
        let MessageContent::Text(ref text) = msg.content else {
            return None;
        };
        Command::parse(text)
    }

    async fn run_command(&self, cmd: Command, msg: &IncomingMessage) {
        info!("owner command {cmd:?}");
        let ctx = CommandContext {
            text: msg.content.text(),
            uptime: &self.started,
            anti_delete: self.anti_delete.as_deref(),
            responder: self.responder.as_deref(),
            guard: self.guard.as_deref(),
        };
        let reply = commands::handle(cmd, &ctx).await;
        if let Err(e) = self
            .channel
            .send(OutgoingMessage::text(&msg.chat_id, reply))
            .await
        {
            warn!("failed to answer owner command {cmd:?}: {e}");
        }
    }

    /// Whether the security guard lets this message reach the responder.
    fn admitted(&self, msg: &IncomingMessage) -> bool {
        let Some(guard) = &self.guard else {
            return true;
        };
        match guard.check(&msg.sender_id, msg.content.text()) {
            Verdict::Allowed => true,
            verdict => {
                debug!("not answering {}: {verdict:?}", msg.sender_id);
                false
            }
        }
    }

    async fn on_revocation(&self, event: &RevocationEvent) {
        let Some(anti_delete) = &self.anti_delete else {
            return;
        };
        match anti_delete.on_revocation(event).await {
            ReportOutcome::Reported(delivery) if !delivery.report_delivered => {
                warn!("report for {} was not delivered", event.message_id)
            }
            outcome => debug!("revocation of {}: {outcome:?}", event.message_id),
        }
    }

    async fn shutdown(&self) {
        if let Some(anti_delete) = &self.anti_delete {
            anti_delete.shutdown();
        }
        if let Err(e) = self.channel.stop().await {
            warn!("failed to stop channel {}: {e}", self.channel.name());
        }
        info!("shutdown complete");
    }
}
