//! Conversation history for the responder.

use async_trait::async_trait;
use knight_core::{context::ContextEntry, traits::ConversationLog};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Session {
    entries: VecDeque<ContextEntry>,
    last_active: Instant,
}

/// In-memory history: the last `max_entries` turns per user, forgotten
/// after `idle_timeout` without activity.
pub struct MemoryLog {
    max_entries: usize,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryLog {
    pub fn new(max_entries: usize, idle_timeout: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn is_stale(&self, session: &Session) -> bool {
        session.last_active.elapsed() > self.idle_timeout
    }
}

#[async_trait]
impl ConversationLog for MemoryLog {
    async fn recent(&self, user: &str) -> Vec<ContextEntry> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(user) {
            Some(session) if self.is_stale(session) => {
                sessions.remove(user);
                Vec::new()
            }
            Some(session) => session.entries.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    async fn append(&self, user: &str, entry: ContextEntry) {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(user.to_string()).or_insert_with(|| Session {
            entries: VecDeque::new(),
            last_active: Instant::now(),
        });
        if self.is_stale(session) {
            session.entries.clear();
        }
        session.entries.push_back(entry);
        while session.entries.len() > self.max_entries {
            session.entries.pop_front();
        }
        session.last_active = Instant::now();
    }

    async fn clear(&self, user: &str) {
        self.sessions.lock().await.remove(user);
    }
}

/// History disabled: remembers nothing.
pub struct NoopLog;

#[async_trait]
impl ConversationLog for NoopLog {
    async fn recent(&self, _user: &str) -> Vec<ContextEntry> {
        Vec::new()
    }

    async fn append(&self, _user: &str, _entry: ContextEntry) {}

    async fn clear(&self, _user: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_memory_log_keeps_order() {
        let log = MemoryLog::new(10, HOUR);
        log.append("u1", ContextEntry::user("hi")).await;
        log.append("u1", ContextEntry::assistant("hello")).await;
        let recent = log.recent("u1").await;
        assert_eq!(
            recent,
            vec![ContextEntry::user("hi"), ContextEntry::assistant("hello")]
        );
        assert!(log.recent("u2").await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_log_trims_oldest() {
        let log = MemoryLog::new(3, HOUR);
        for i in 0..5 {
            log.append("u1", ContextEntry::user(format!("m{i}"))).await;
        }
        let contents: Vec<String> = log
            .recent("u1")
            .await
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_memory_log_expires_idle_sessions() {
        let log = MemoryLog::new(10, Duration::ZERO);
        log.append("u1", ContextEntry::user("old")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(log.recent("u1").await.is_empty());

        log.append("u1", ContextEntry::user("new")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        log.append("u1", ContextEntry::user("newer")).await;
        // The stale "new" turn was dropped when "newer" arrived.
        let sessions = log.sessions.lock().await;
        assert_eq!(sessions.get("u1").map(|s| s.entries.len()), Some(1));
    }

    #[tokio::test]
    async fn test_memory_log_clear() {
        let log = MemoryLog::new(10, HOUR);
        log.append("u1", ContextEntry::user("hi")).await;
        log.clear("u1").await;
        assert!(log.recent("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_noop_log_remembers_nothing() {
        let log = NoopLog;
        log.append("u1", ContextEntry::user("hi")).await;
        assert!(log.recent("u1").await.is_empty());
    }
}
