//! WhatsApp channel over the WhatsApp Web protocol (`whatsapp-rust`).
//!
//! Pairing prints a QR code to the terminal; the linked-device session is
//! kept in `{data_dir}/whatsapp_session/whatsapp.db` so restarts do not
//! need a new scan.

mod bot;
mod channel;
mod events;
mod qr;
mod send;
mod sent;


pub use qr::generate_qr_terminal;
pub use send::sanitize_for_whatsapp;

use knight_core::config::shellexpand;
use knight_core::error::KnightError;
use sent::SentIds;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use whatsapp_rust::client::Client;

/// WhatsApp channel using the WhatsApp Web protocol.
pub struct WhatsAppChannel {
    pub(super) data_dir: String,
    /// Set while connected; cleared on disconnect or logout.
    pub(super) client: Arc<Mutex<Option<Arc<Client>>>>,
    /// Ids of messages we sent, so their echoes are not treated as inbound.
    pub(super) sent_ids: Arc<Mutex<SentIds>>,
}

impl WhatsAppChannel {
    pub fn new(data_dir: &str) -> Self {
        Self {
            data_dir: data_dir.to_string(),
            client: Arc::new(Mutex::new(None)),
            sent_ids: Arc::new(Mutex::new(SentIds::default())),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Whether a paired session exists on disk.
    pub fn has_session(data_dir: &str) -> bool {
        Self::session_db_path_in(data_dir).exists()
    }

    fn session_db_path_in(data_dir: &str) -> PathBuf {
        PathBuf::from(shellexpand(data_dir))
            .join("whatsapp_session")
            .join("whatsapp.db")
    }

    /// Session database path, creating its directory.
    pub(super) fn session_db_path(&self) -> Result<String, KnightError> {
        let path = Self::session_db_path_in(&self.data_dir);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                KnightError::Channel(format!(
                    "failed to create session dir {}: {e}",
                    dir.display()
                ))
            })?;
        }
        Ok(path.to_string_lossy().into_owned())
    }

    /// Connected client, or an error when the bot is not online.
    pub(super) async fn connected_client(&self) -> Result<Arc<Client>, KnightError> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| KnightError::Channel("whatsapp client not connected".into()))
    }
}
