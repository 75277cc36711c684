//! # knight-shadow
//!
//! Anti-delete for Knight: every inbound message is shadowed (text plus any
//! downloaded media) for a bounded time, and when its author revokes it the
//! shadow copy is reported to the owner exactly once.
//!
//! [`AntiDelete`] is the context object the gateway owns. It holds the
//! [`ShadowStore`] behind a short synchronous lock that is never held across
//! an `.await`, and it owns the periodic sweep task.

mod capture;
mod report;
pub mod store;

#[cfg(test)]
mod tests;

pub use capture::{capture_policy, CaptureOutcome, SkipReason};
pub use report::{format_report, Delivery, ReportOutcome};
pub use store::{MediaRef, ShadowEntry, ShadowStore};

use chrono::Utc;
use knight_core::{config::AntiDeleteConfig, error::KnightError, traits::Channel};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The anti-delete subsystem: shadow store, reporter, and sweep task.
pub struct AntiDelete {
    pub(crate) config: AntiDeleteConfig,
    /// Report destination.
    pub(crate) owner_jid: String,
    pub(crate) temp_dir: PathBuf,
    pub(crate) channel: Arc<dyn Channel>,
    store: Mutex<ShadowStore>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AntiDelete {
    /// Build the subsystem without starting the sweep task.
    ///
    /// Creates the temp directory and purges files a previous run left behind:
    /// the map does not survive restarts, so nothing references them.
    pub fn new(
        config: AntiDeleteConfig,
        temp_dir: PathBuf,
        channel: Arc<dyn Channel>,
    ) -> Result<Arc<Self>, KnightError> {
        std::fs::create_dir_all(&temp_dir).map_err(|e| {
            KnightError::Shadow(format!(
                "failed to create temp dir {}: {e}",
                temp_dir.display()
            ))
        })?;
        purge_temp_dir(&temp_dir);

        Ok(Arc::new(Self {
            owner_jid: config.owner_jid(),
            store: Mutex::new(ShadowStore::new(config.max_entries)),
            sweeper: Mutex::new(None),
            config,
            temp_dir,
            channel,
        }))
    }

    /// Build the subsystem and spawn its sweep task. Must run inside a tokio runtime.
    pub fn start(
        config: AntiDeleteConfig,
        temp_dir: PathBuf,
        channel: Arc<dyn Channel>,
    ) -> Result<Arc<Self>, KnightError> {
        let anti_delete = Self::new(config, temp_dir, channel)?;
        anti_delete.spawn_sweeper();
        info!(
            "anti-delete started | owner: {} | max age: {}s | sweep every {}s | temp: {}",
            anti_delete.owner_jid,
            anti_delete.config.max_shadow_age().as_secs(),
            anti_delete.config.sweep_interval().as_secs(),
            anti_delete.temp_dir.display(),
        );
        Ok(anti_delete)
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.sweep_interval();
        let handle = tokio::spawn(sweep_loop(weak, interval));
        if let Some(previous) = lock(&self.sweeper).replace(handle) {
            previous.abort();
        }
    }

    /// Evict entries older than the configured age ceiling.
    pub fn sweep(&self) -> usize {
        self.sweep_older_than(self.config.max_shadow_age())
    }

    /// Evict entries with `now - captured_at > max_age`, deleting their media.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        lock(&self.store).sweep(max_age, Utc::now())
    }

    /// Remove and return a shadow entry; `None` when the id was never captured
    /// or is already gone.
    pub fn consume(&self, message_id: &str) -> Option<ShadowEntry> {
        lock(&self.store).consume(message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        lock(&self.store).contains(message_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.store).is_empty()
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Cancel the sweep task and drop every entry together with its media.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
        }
        let dropped = lock(&self.store).drain();
        info!("anti-delete stopped, discarded {dropped} shadow entr(ies)");
    }

    pub(crate) fn insert(&self, entry: ShadowEntry) -> bool {
        lock(&self.store).insert(entry)
    }

    /// Whether this identity's deletions and messages are exempt from reports.
    pub(crate) fn is_exempt(&self, identity: &str) -> bool {
        !self.config.report_owner_deletions && self.config.is_owner(identity)
    }
}

/// Await `fut` for at most `limit`; expiry becomes [`KnightError::Timeout`].
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, KnightError>>,
) -> Result<T, KnightError> {
    tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
        Err(KnightError::Timeout(format!(
            "{what} after {}s",
            limit.as_secs()
        )))
    })
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background task: periodic age-based eviction.
///
/// Holds only a weak reference so dropping the subsystem ends the loop.
async fn sweep_loop(weak: Weak<AntiDelete>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let Some(anti_delete) = weak.upgrade() else {
            break;
        };
        let evicted = anti_delete.sweep();
        if evicted > 0 {
            info!("anti-delete: swept {evicted} expired entr(ies)");
        }
    }
}

/// Delete every file in the temp directory (startup cleanup).
fn purge_temp_dir(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut count = 0u32;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            match std::fs::remove_file(&path) {
                Ok(()) => count += 1,
                Err(e) => warn!("anti-delete: failed to purge {}: {e}", path.display()),
            }
        }
    }
    if count > 0 {
        info!("startup: purged {count} orphaned anti-delete file(s)");
    }
}
