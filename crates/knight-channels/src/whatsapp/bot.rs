//! Bot lifecycle: session store, event wiring, background run.

use super::events::handle_whatsapp_message;
use super::qr::print_pairing_qr;
use super::WhatsAppChannel;
use knight_core::{error::KnightError, message::ChannelEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wacore::types::events::Event;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::store::SqliteStore;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

impl WhatsAppChannel {
    /// Build the bot, hook its events to `tx`, and run it in the background.
    pub(super) async fn build_and_run_bot(
        &self,
        tx: mpsc::Sender<ChannelEvent>,
    ) -> Result<(), KnightError> {
        let db_path = self.session_db_path()?;
        info!("WhatsApp bot building (session: {db_path})...");

        let backend = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .map_err(|e| KnightError::Channel(format!("whatsapp store init failed: {e}")))?,
        );

        let client_handle = self.client.clone();
        let sent_ids = self.sent_ids.clone();

        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some("Knight".to_string()),
                None,
                Some(waproto::whatsapp::device_props::PlatformType::Desktop),
            )
            .on_event(move |event, client| {
                let tx = tx.clone();
                let client_store = client_handle.clone();
                let sent_ids = sent_ids.clone();
                async move {
                    match event {
                        Event::PairingQrCode { code, .. } => {
                            info!("WhatsApp QR code generated (scan to pair)");
                            debug!("QR data: {code}");
                            print_pairing_qr(&code);
                        }
                        Event::PairSuccess(_) => {
                            info!("WhatsApp pairing successful");
                        }
                        Event::Connected(_) => {
                            info!("WhatsApp connected");
                            *client_store.lock().await = Some(client);
                        }
                        Event::Disconnected(_) => {
                            warn!("WhatsApp disconnected");
                            *client_store.lock().await = None;
                        }
                        Event::LoggedOut(_) => {
                            warn!("WhatsApp logged out; delete the session and pair again");
                            *client_store.lock().await = None;
                        }
                        Event::Message(msg, info) => {
                            handle_whatsapp_message(*msg, info, &tx, &sent_ids).await;
                        }
                        _ => {}
                    }
                }
            })
            .build()
            .await
            .map_err(|e| KnightError::Channel(format!("whatsapp bot build failed: {e}")))?;

        *self.client.lock().await = Some(bot.client());

        let _handle = bot
            .run()
            .await
            .map_err(|e| KnightError::Channel(format!("whatsapp bot run failed: {e}")))?;

        info!("WhatsApp bot started");
        Ok(())
    }
}
