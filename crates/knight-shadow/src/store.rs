//! In-memory shadow copies of inbound messages, keyed by message id.
//!
//! The store owns each entry's media file: the file is removed whenever the
//! entry is overwritten, evicted, swept or drained. `consume` hands both the
//! entry and the file over to the caller.

use chrono::{DateTime, Utc};
use knight_core::message::MediaKind;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// A downloaded blob on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub local_path: PathBuf,
}

/// A captured inbound message eligible for anti-delete reporting.
#[derive(Debug, Clone)]
pub struct ShadowEntry {
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub chat_id: String,
    pub is_group: bool,
    /// Body or caption; empty for media-only messages.
    pub text: String,
    /// Kind of media the message carried, even if the download failed.
    pub media_kind: Option<MediaKind>,
    /// Set only when the blob was saved.
    pub media: Option<MediaRef>,
    /// Original document name.
    pub file_name: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl ShadowEntry {
    fn media_path(&self) -> Option<&PathBuf> {
        self.media.as_ref().map(|m| &m.local_path)
    }

    /// Whether the entry is strictly older than `max_age` at `now`.
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.captured_at)
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}

/// Best-effort removal of a media file. Failures are logged and swallowed.
pub fn discard_media(media: &MediaRef) {
    match std::fs::remove_file(&media.local_path) {
        Ok(()) => debug!("shadow: removed {}", media.local_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "shadow: failed to remove {}: {e}",
            media.local_path.display()
        ),
    }
}

/// Bounded map of shadow entries.
#[derive(Debug)]
pub struct ShadowStore {
    entries: HashMap<String, ShadowEntry>,
    max_entries: usize,
}

impl ShadowStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Insert or overwrite (last write wins). Returns `true` on overwrite.
    ///
    /// A new id arriving at capacity evicts the oldest entry first.
    pub fn insert(&mut self, entry: ShadowEntry) -> bool {
        if !self.entries.contains_key(&entry.message_id) && self.entries.len() >= self.max_entries
        {
            self.evict_oldest();
        }

        let new_path = entry.media_path().cloned();
        match self.entries.insert(entry.message_id.clone(), entry) {
            Some(old) => {
                if let Some(ref media) = old.media {
                    if new_path.as_ref() != Some(&media.local_path) {
                        discard_media(media);
                    }
                }
                debug!("shadow: overwrote duplicate id {}", old.message_id);
                true
            }
            None => false,
        }
    }

    /// Remove and return the entry. The media file becomes the caller's to delete.
    pub fn consume(&mut self, message_id: &str) -> Option<ShadowEntry> {
        self.entries.remove(message_id)
    }

    /// Evict every entry with `now - captured_at > max_age`. Returns the count.
    pub fn sweep(&mut self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(max_age, now))
            .map(|e| e.message_id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = self.entries.remove(id) {
                if let Some(ref media) = entry.media {
                    discard_media(media);
                }
            }
        }
        expired.len()
    }

    /// Drop everything, deleting media. Returns the count.
    pub fn drain(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            if let Some(ref media) = entry.media {
                discard_media(media);
            }
        }
        count
    }

    pub fn get(&self, message_id: &str) -> Option<&ShadowEntry> {
        self.entries.get(message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| e.captured_at)
            .map(|e| e.message_id.clone());

        if let Some(id) = oldest {
            if let Some(entry) = self.entries.remove(&id) {
                if let Some(ref media) = entry.media {
                    discard_media(media);
                }
                debug!("shadow: at capacity, evicted oldest entry {id}");
            }
        }
    }
}
