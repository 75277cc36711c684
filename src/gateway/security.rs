//! Blocklist and spam guard in front of the responder.
//!
//! Blocked users are still shadowed by anti-delete; the guard only decides
//! who gets an AI reply. The blocklist survives restarts as a JSON array of
//! account numbers.

use knight_core::{
    config::SecurityConfig,
    error::KnightError,
    message::{identity_user, same_identity},
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Blocklist file name under the data dir.
pub const BLOCKLIST_FILE: &str = "blocked_users.json";

const WINDOW: Duration = Duration::from_secs(60);

const SPAM_MARKERS: &[&str] = &[
    "http://",
    "https://",
    "www.",
    "buy now",
    "click here",
    "free money",
    "lottery",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// Over the per-minute limit; no reply until the window rolls over.
    RateLimited,
    Blocked,
}

/// Per-user traffic inside the current one-minute window.
#[derive(Debug)]
struct Activity {
    window_start: Instant,
    count: u32,
    last_text: String,
    warnings: u32,
}

impl Activity {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            last_text: String::new(),
            warnings: 0,
        }
    }

    /// Repeated text, short bursts, or link/scam bait.
    fn looks_like_spam(&self, text: &str) -> bool {
        if self.count > 3 && text == self.last_text {
            return true;
        }
        if self.count > 5 && text.chars().count() < 5 {
            return true;
        }
        let lower = text.to_lowercase();
        SPAM_MARKERS.iter().any(|marker| lower.contains(marker))
    }
}

#[derive(Debug)]
pub struct SecurityGuard {
    config: SecurityConfig,
    owner: String,
    path: PathBuf,
    blocked: Mutex<HashSet<String>>,
    activity: Mutex<HashMap<String, Activity>>,
}

impl SecurityGuard {
    /// Load the blocklist at `path` (missing file = nobody blocked).
    pub fn open(
        config: SecurityConfig,
        owner: &str,
        path: impl Into<PathBuf>,
    ) -> Result<Self, KnightError> {
        let path = path.into();
        let blocked = load_blocklist(&path)?;
        if !blocked.is_empty() {
            info!("security: {} blocked user(s) loaded", blocked.len());
        }
        Ok(Self {
            config,
            owner: owner.to_string(),
            path,
            blocked: Mutex::new(blocked),
            activity: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn auto_block(&self) -> bool {
        self.config.auto_block
    }

    /// Record a message from `sender` and decide whether it may be answered.
    pub fn check(&self, sender: &str, text: &str) -> Verdict {
        self.check_at(sender, text, Instant::now())
    }

    fn check_at(&self, sender: &str, text: &str, now: Instant) -> Verdict {
        let user = identity_user(sender);
        if user.is_empty() || same_identity(sender, &self.owner) {
            return Verdict::Allowed;
        }
        if self.is_blocked(user) {
            return Verdict::Blocked;
        }
        if !self.config.enabled {
            return Verdict::Allowed;
        }

        let (over_limit, block) = {
            let mut activity = lock(&self.activity);
            let a = activity
                .entry(user.to_string())
                .or_insert_with(|| Activity::new(now));
            if now.duration_since(a.window_start) >= WINDOW {
                a.window_start = now;
                a.count = 0;
            }
            a.count += 1;
            let over_limit = a.count > self.config.max_messages_per_minute;
            let warned = over_limit || a.looks_like_spam(text);
            a.last_text = text.to_string();
            if warned {
                a.warnings += 1;
                warn!("security: spam warning {} for {user}", a.warnings);
            }
            let block = warned
                && self.config.auto_block
                && a.warnings >= self.config.auto_block_threshold;
            (over_limit, block)
        };

        if block {
            info!("security: auto-blocking {user}");
            self.block(user);
            return Verdict::Blocked;
        }
        if over_limit {
            Verdict::RateLimited
        } else {
            Verdict::Allowed
        }
    }

    pub fn is_blocked(&self, identity: &str) -> bool {
        lock(&self.blocked).contains(identity_user(identity))
    }

    /// Block a user and persist the list. The owner cannot be blocked.
    pub fn block(&self, identity: &str) -> bool {
        let user = identity_user(identity);
        if user.is_empty() || same_identity(identity, &self.owner) {
            return false;
        }
        let mut blocked = lock(&self.blocked);
        if blocked.insert(user.to_string()) {
            self.save(&blocked);
        }
        lock(&self.activity).remove(user);
        true
    }

    /// Returns whether the user was blocked.
    pub fn unblock(&self, identity: &str) -> bool {
        let user = identity_user(identity);
        let mut blocked = lock(&self.blocked);
        if !blocked.remove(user) {
            return false;
        }
        self.save(&blocked);
        true
    }

    pub fn blocked_count(&self) -> usize {
        lock(&self.blocked).len()
    }

    /// Users with at least one spam warning.
    pub fn warned_count(&self) -> usize {
        lock(&self.activity)
            .values()
            .filter(|a| a.warnings > 0)
            .count()
    }

    fn save(&self, blocked: &HashSet<String>) {
        if let Err(e) = write_blocklist(&self.path, blocked) {
            warn!("security: failed to save {}: {e}", self.path.display());
        }
    }
}

fn load_blocklist(path: &Path) -> Result<HashSet<String>, KnightError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = std::fs::read_to_string(path)?;
    let users: Vec<String> = serde_json::from_str(&content)?;
    Ok(users
        .iter()
        .map(|u| identity_user(u).to_string())
        .filter(|u| !u.is_empty())
        .collect())
}

fn write_blocklist(path: &Path, blocked: &HashSet<String>) -> Result<(), KnightError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut users: Vec<&String> = blocked.iter().collect();
    users.sort();
    std::fs::write(path, serde_json::to_string_pretty(&users)?)?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
