use super::*;
use async_trait::async_trait;
use knight_core::message::{
    ChannelEvent, IncomingMessage, MediaHandle, MediaKind, MessageContent, OutgoingMessage,
    OutgoingPayload, RevocationEvent,
};
use std::sync::Mutex;
use tokio::sync::mpsc;

const OWNER: &str = "94741907061";
const OWNER_JID: &str = "94741907061@s.whatsapp.net";
const ALICE: &str = "94770000001@s.whatsapp.net";
const BOB: &str = "94770000002@s.whatsapp.net";
const GROUP: &str = "120363001234567890@g.us";

/// Channel double that records every send and can be told to misbehave.
#[derive(Default)]
struct FakeChannel {
    sent: Mutex<Vec<OutgoingMessage>>,
    fail_download: bool,
    slow_download: bool,
    fail_text: bool,
    fail_media: bool,
    group: Option<String>,
}

impl FakeChannel {
    fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self) -> Result<mpsc::Receiver<ChannelEvent>, KnightError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), KnightError> {
        let is_media = matches!(message.payload, OutgoingPayload::Media { .. });
        self.sent.lock().unwrap().push(message);
        if (is_media && self.fail_media) || (!is_media && self.fail_text) {
            return Err(KnightError::Channel("send rejected".into()));
        }
        Ok(())
    }

    async fn download_media(&self, media: &MediaHandle) -> Result<Vec<u8>, KnightError> {
        if self.slow_download {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.fail_download {
            return Err(KnightError::Channel("media expired".into()));
        }
        media
            .source::<Vec<u8>>()
            .cloned()
            .ok_or_else(|| KnightError::Channel("foreign handle".into()))
    }

    async fn group_subject(&self, _chat_id: &str) -> Result<String, KnightError> {
        self.group
            .clone()
            .ok_or_else(|| KnightError::Channel("not a participant".into()))
    }

    async fn stop(&self) -> Result<(), KnightError> {
        Ok(())
    }
}

fn config() -> AntiDeleteConfig {
    AntiDeleteConfig {
        owner: OWNER.into(),
        download_timeout_secs: 1,
        send_timeout_secs: 1,
        ..Default::default()
    }
}

fn setup(
    name: &str,
    config: AntiDeleteConfig,
    channel: FakeChannel,
) -> (Arc<AntiDelete>, Arc<FakeChannel>) {
    let dir = std::env::temp_dir().join(format!("__knight_shadow_{name}__"));
    let _ = std::fs::remove_dir_all(&dir);
    let channel = Arc::new(channel);
    let anti_delete = AntiDelete::new(config, dir, channel.clone()).unwrap();
    (anti_delete, channel)
}

fn cleanup(anti_delete: &AntiDelete) {
    let _ = std::fs::remove_dir_all(anti_delete.temp_dir());
}

fn message(id: &str, sender: &str, content: MessageContent) -> IncomingMessage {
    IncomingMessage {
        message_id: id.into(),
        chat_id: sender.into(),
        sender_id: sender.into(),
        sender_name: Some("Nimal".into()),
        is_group: false,
        from_me: false,
        content,
        timestamp: Utc::now(),
    }
}

fn text(id: &str, sender: &str, body: &str) -> IncomingMessage {
    message(id, sender, MessageContent::Text(body.into()))
}

fn image(id: &str, sender: &str, bytes: &[u8], caption: &str) -> IncomingMessage {
    message(
        id,
        sender,
        MessageContent::Image {
            caption: caption.into(),
            media: MediaHandle::new(MediaKind::Image, None, bytes.to_vec()),
        },
    )
}

fn revoke(id: &str, by: &str) -> RevocationEvent {
    RevocationEvent {
        message_id: id.into(),
        chat_id: by.into(),
        deleted_by: by.into(),
        timestamp: Utc::now(),
    }
}

fn text_of(message: &OutgoingMessage) -> &str {
    match &message.payload {
        OutgoingPayload::Text(text) => text,
        other => panic!("expected text, got {other:?}"),
    }
}

fn reported(report_delivered: bool, media_delivered: Option<bool>) -> ReportOutcome {
    ReportOutcome::Reported(Delivery {
        report_delivered,
        media_delivered,
    })
}

// --- Capture policy ---

#[tokio::test]
async fn test_disabled_captures_nothing() {
    let cfg = AntiDeleteConfig {
        enabled: false,
        ..config()
    };
    let (ad, _) = setup("disabled", cfg, FakeChannel::default());
    let outcome = ad.capture(&text("A", ALICE, "hi")).await;
    assert_eq!(outcome, CaptureOutcome::Skipped(SkipReason::Disabled));
    assert!(ad.is_empty());
    cleanup(&ad);
}

#[tokio::test]
async fn test_self_authored_not_captured() {
    let (ad, _) = setup("from_me", config(), FakeChannel::default());
    let mut msg = text("A", ALICE, "hi");
    msg.from_me = true;
    assert_eq!(
        ad.capture(&msg).await,
        CaptureOutcome::Skipped(SkipReason::SelfAuthored)
    );
    cleanup(&ad);
}

#[tokio::test]
async fn test_owner_messages_exempt() {
    let (ad, _) = setup("owner_exempt", config(), FakeChannel::default());
    let outcome = ad.capture(&text("A", "94741907061:7@s.whatsapp.net", "hi")).await;
    assert_eq!(outcome, CaptureOutcome::Skipped(SkipReason::OwnerExempt));
    assert!(!ad.contains("A"));
    cleanup(&ad);
}

#[tokio::test]
async fn test_unsupported_content_not_captured() {
    let (ad, _) = setup("unsupported", config(), FakeChannel::default());
    let outcome = ad
        .capture(&message("A", ALICE, MessageContent::Unsupported))
        .await;
    assert_eq!(outcome, CaptureOutcome::Skipped(SkipReason::NothingToKeep));
    cleanup(&ad);
}

// --- End-to-end scenarios ---

#[tokio::test]
async fn test_text_revocation_reported_once() {
    let (ad, channel) = setup("text_once", config(), FakeChannel::default());
    ad.capture(&text("A", ALICE, "hello")).await;

    assert_eq!(ad.on_revocation(&revoke("A", ALICE)).await, reported(true, None));
    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target, OWNER_JID);
    assert!(text_of(&sent[0]).contains("hello"));
    assert!(text_of(&sent[0]).contains("@94770000001"));

    // A second revocation of the same id finds nothing.
    assert_eq!(
        ad.on_revocation(&revoke("A", ALICE)).await,
        ReportOutcome::NotFound
    );
    assert_eq!(channel.sent().len(), 1);
    cleanup(&ad);
}

#[tokio::test]
async fn test_image_revocation_forwards_blob() {
    let (ad, channel) = setup("image", config(), FakeChannel::default());
    let outcome = ad.capture(&image("B", ALICE, b"jpeg-bytes", "beach")).await;
    assert_eq!(
        outcome,
        CaptureOutcome::Captured {
            media_saved: true,
            replaced: false
        }
    );
    let saved = ad.temp_dir().join("B.jpg");
    assert!(saved.exists());

    assert_eq!(
        ad.on_revocation(&revoke("B", ALICE)).await,
        reported(true, Some(true))
    );
    let sent = channel.sent();
    assert_eq!(sent.len(), 2);
    assert!(text_of(&sent[0]).contains("beach"));
    match &sent[1].payload {
        OutgoingPayload::Media {
            kind,
            data,
            caption,
            ..
        } => {
            assert_eq!(*kind, MediaKind::Image);
            assert_eq!(data.as_slice(), b"jpeg-bytes");
            assert!(caption.as_deref().unwrap_or("").contains("Deleted image"));
        }
        other => panic!("expected media, got {other:?}"),
    }
    assert_eq!(sent[1].target, OWNER_JID);
    assert!(!saved.exists(), "media file must be removed after the report");
    cleanup(&ad);
}

#[tokio::test]
async fn test_unknown_revocation_is_silent() {
    let (ad, channel) = setup("unknown", config(), FakeChannel::default());
    assert_eq!(
        ad.on_revocation(&revoke("Z", ALICE)).await,
        ReportOutcome::NotFound
    );
    assert!(channel.sent().is_empty());
    cleanup(&ad);
}

#[tokio::test]
async fn test_swept_entry_is_not_reported() {
    let (ad, channel) = setup("swept", config(), FakeChannel::default());
    ad.capture(&image("C", ALICE, b"old", "")).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(ad.sweep_older_than(Duration::ZERO), 1);
    assert!(!ad.temp_dir().join("C.jpg").exists());
    assert_eq!(
        ad.on_revocation(&revoke("C", ALICE)).await,
        ReportOutcome::NotFound
    );
    assert!(channel.sent().is_empty());
    cleanup(&ad);
}

#[tokio::test]
async fn test_sweep_keeps_young_entries() {
    let (ad, _) = setup("sweep_young", config(), FakeChannel::default());
    ad.capture(&text("A", ALICE, "hi")).await;
    assert_eq!(ad.sweep(), 0);
    assert!(ad.contains("A"));
    cleanup(&ad);
}

// --- Owner suppression ---

#[tokio::test]
async fn test_owner_deletion_suppressed() {
    let (ad, channel) = setup("owner_deletes", config(), FakeChannel::default());
    ad.capture(&image("A", ALICE, b"x", "")).await;

    assert_eq!(
        ad.on_revocation(&revoke("A", OWNER_JID)).await,
        ReportOutcome::Suppressed
    );
    assert!(channel.sent().is_empty());
    assert!(!ad.contains("A"));
    assert!(!ad.temp_dir().join("A.jpg").exists());
    cleanup(&ad);
}

#[tokio::test]
async fn test_plus_prefixed_owner_is_exempt() {
    let cfg = AntiDeleteConfig {
        owner: "+94741907061".into(),
        ..config()
    };
    let (ad, channel) = setup("owner_plus", cfg, FakeChannel::default());

    assert_eq!(
        ad.capture(&text("P1", OWNER_JID, "mine")).await,
        CaptureOutcome::Skipped(SkipReason::OwnerExempt)
    );

    ad.capture(&text("P2", ALICE, "hers")).await;
    assert_eq!(
        ad.on_revocation(&revoke("P2", OWNER_JID)).await,
        ReportOutcome::Suppressed
    );
    assert!(channel.sent().is_empty());
    cleanup(&ad);
}

#[tokio::test]
async fn test_owner_deletion_reported_when_enabled() {
    let cfg = AntiDeleteConfig {
        report_owner_deletions: true,
        ..config()
    };
    let (ad, channel) = setup("owner_reported", cfg, FakeChannel::default());
    ad.capture(&text("A", ALICE, "hi")).await;
    assert_eq!(
        ad.on_revocation(&revoke("A", OWNER_JID)).await,
        reported(true, None)
    );
    assert_eq!(channel.sent().len(), 1);
    cleanup(&ad);
}

#[tokio::test]
async fn test_owner_authored_entry_suppressed() {
    let cfg = AntiDeleteConfig {
        exempt_owner_messages: false,
        ..config()
    };
    let (ad, channel) = setup("owner_authored", cfg, FakeChannel::default());
    ad.capture(&text("A", OWNER_JID, "mine")).await;
    assert!(ad.contains("A"));

    // Someone else (a group admin) deletes the owner's message.
    assert_eq!(
        ad.on_revocation(&revoke("A", BOB)).await,
        ReportOutcome::Suppressed
    );
    assert!(channel.sent().is_empty());
    cleanup(&ad);
}

// --- Failure handling ---

#[tokio::test]
async fn test_download_failure_keeps_text() {
    let channel = FakeChannel {
        fail_download: true,
        ..Default::default()
    };
    let (ad, channel) = setup("download_fail", config(), channel);
    let outcome = ad.capture(&image("A", ALICE, b"x", "caption survives")).await;
    assert_eq!(
        outcome,
        CaptureOutcome::Captured {
            media_saved: false,
            replaced: false
        }
    );

    assert_eq!(ad.on_revocation(&revoke("A", ALICE)).await, reported(true, None));
    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert!(text_of(&sent[0]).contains("caption survives"));
    assert!(text_of(&sent[0]).contains("could not be recovered"));
    cleanup(&ad);
}

#[tokio::test]
async fn test_download_timeout_keeps_entry() {
    let channel = FakeChannel {
        slow_download: true,
        ..Default::default()
    };
    let (ad, _) = setup("download_slow", config(), channel);
    let outcome = ad.capture(&image("A", ALICE, b"x", "")).await;
    assert_eq!(
        outcome,
        CaptureOutcome::Captured {
            media_saved: false,
            replaced: false
        }
    );
    assert!(ad.contains("A"));
    cleanup(&ad);
}

#[tokio::test]
async fn test_report_send_failure_still_consumes() {
    let channel = FakeChannel {
        fail_text: true,
        ..Default::default()
    };
    let (ad, channel) = setup("report_fail", config(), channel);
    ad.capture(&text("A", ALICE, "hi")).await;

    assert_eq!(ad.on_revocation(&revoke("A", ALICE)).await, reported(false, None));
    assert_eq!(
        ad.on_revocation(&revoke("A", ALICE)).await,
        ReportOutcome::NotFound
    );
    assert_eq!(channel.sent().len(), 1);
    cleanup(&ad);
}

#[tokio::test]
async fn test_media_send_failure_sends_notice() {
    let channel = FakeChannel {
        fail_media: true,
        ..Default::default()
    };
    let (ad, channel) = setup("media_fail", config(), channel);
    ad.capture(&image("A", ALICE, b"x", "")).await;

    assert_eq!(
        ad.on_revocation(&revoke("A", ALICE)).await,
        reported(true, Some(false))
    );
    let sent = channel.sent();
    assert_eq!(sent.len(), 3);
    assert!(text_of(&sent[2]).contains("could not be forwarded"));
    assert!(!ad.temp_dir().join("A.jpg").exists());
    cleanup(&ad);
}

// --- Media variants ---

#[tokio::test]
async fn test_sticker_forwarded_without_caption() {
    let (ad, channel) = setup("sticker", config(), FakeChannel::default());
    let sticker = message(
        "S",
        ALICE,
        MessageContent::Sticker {
            media: MediaHandle::new(MediaKind::Sticker, None, b"webp".to_vec()),
        },
    );
    ad.capture(&sticker).await;
    assert!(ad.temp_dir().join("S.webp").exists());

    ad.on_revocation(&revoke("S", ALICE)).await;
    match &channel.sent()[1].payload {
        OutgoingPayload::Media { kind, caption, .. } => {
            assert_eq!(*kind, MediaKind::Sticker);
            assert!(caption.is_none());
        }
        other => panic!("expected media, got {other:?}"),
    }
    cleanup(&ad);
}

#[tokio::test]
async fn test_document_keeps_name() {
    let (ad, channel) = setup("document", config(), FakeChannel::default());
    let doc = message(
        "D",
        ALICE,
        MessageContent::Document {
            caption: String::new(),
            file_name: Some("invoice.pdf".into()),
            media: MediaHandle::new(MediaKind::Document, None, b"%PDF".to_vec()),
        },
    );
    ad.capture(&doc).await;
    assert!(ad.temp_dir().join("D.pdf").exists());

    ad.on_revocation(&revoke("D", ALICE)).await;
    let sent = channel.sent();
    assert!(text_of(&sent[0]).contains("invoice.pdf"));
    match &sent[1].payload {
        OutgoingPayload::Media { file_name, .. } => {
            assert_eq!(file_name.as_deref(), Some("invoice.pdf"));
        }
        other => panic!("expected media, got {other:?}"),
    }
    cleanup(&ad);
}

// --- Groups ---

#[tokio::test]
async fn test_group_report_uses_subject() {
    let channel = FakeChannel {
        group: Some("Family".into()),
        ..Default::default()
    };
    let (ad, channel) = setup("group_subject", config(), channel);
    let mut msg = text("G", BOB, "group secret");
    msg.chat_id = GROUP.into();
    msg.is_group = true;
    ad.capture(&msg).await;

    ad.on_revocation(&revoke("G", BOB)).await;
    let report = text_of(&channel.sent()[0]).to_string();
    assert!(report.contains("*Group:* Family"));
    assert!(report.contains("group secret"));
    cleanup(&ad);
}

#[tokio::test]
async fn test_group_report_falls_back_to_chat_id() {
    let (ad, channel) = setup("group_fallback", config(), FakeChannel::default());
    let mut msg = text("G", BOB, "x");
    msg.chat_id = GROUP.into();
    msg.is_group = true;
    ad.capture(&msg).await;

    assert_eq!(ad.on_revocation(&revoke("G", BOB)).await, reported(true, None));
    assert!(text_of(&channel.sent()[0]).contains(GROUP));
    cleanup(&ad);
}

// --- Store behavior through the subsystem ---

#[tokio::test]
async fn test_duplicate_capture_last_write_wins() {
    let (ad, channel) = setup("duplicate", config(), FakeChannel::default());
    ad.capture(&text("A", ALICE, "first")).await;
    let outcome = ad.capture(&text("A", ALICE, "second")).await;
    assert_eq!(
        outcome,
        CaptureOutcome::Captured {
            media_saved: false,
            replaced: true
        }
    );
    assert_eq!(ad.len(), 1);

    ad.on_revocation(&revoke("A", ALICE)).await;
    let report = text_of(&channel.sent()[0]).to_string();
    assert!(report.contains("second"));
    assert!(!report.contains("first"));
    cleanup(&ad);
}

#[tokio::test]
async fn test_capacity_bound() {
    let cfg = AntiDeleteConfig {
        max_entries: 2,
        ..config()
    };
    let (ad, _) = setup("capacity", cfg, FakeChannel::default());
    for id in ["A", "B", "C"] {
        ad.capture(&text(id, ALICE, id)).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(ad.len(), 2);
    assert!(!ad.contains("A"));
    assert!(ad.contains("C"));
    cleanup(&ad);
}

#[tokio::test]
async fn test_concurrent_revocations_report_once() {
    let (ad, channel) = setup("concurrent", config(), FakeChannel::default());
    ad.capture(&text("A", ALICE, "race")).await;

    let event = revoke("A", ALICE);
    let (first, second) = tokio::join!(ad.on_revocation(&event), ad.on_revocation(&event));
    let reports = [first, second]
        .iter()
        .filter(|o| matches!(o, ReportOutcome::Reported(_)))
        .count();
    assert_eq!(reports, 1);
    assert_eq!(channel.sent().len(), 1);
    cleanup(&ad);
}

// --- Lifecycle ---

#[tokio::test]
async fn test_new_purges_leftover_files() {
    let dir = std::env::temp_dir().join("__knight_shadow_purge__");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("stale.jpg"), b"x").unwrap();

    let ad = AntiDelete::new(config(), dir.clone(), Arc::new(FakeChannel::default())).unwrap();
    assert!(!dir.join("stale.jpg").exists());
    cleanup(&ad);
}

#[tokio::test]
async fn test_shutdown_discards_everything() {
    let (ad, _) = setup("shutdown", config(), FakeChannel::default());
    ad.capture(&image("A", ALICE, b"x", "")).await;
    ad.capture(&text("B", ALICE, "y")).await;

    ad.shutdown();
    assert!(ad.is_empty());
    assert!(!ad.temp_dir().join("A.jpg").exists());
    cleanup(&ad);
}

#[tokio::test]
async fn test_background_sweeper_evicts() {
    let cfg = AntiDeleteConfig {
        max_shadow_age_ms: 0,
        sweep_interval_ms: 20,
        ..config()
    };
    let dir = std::env::temp_dir().join("__knight_shadow_sweeper__");
    let _ = std::fs::remove_dir_all(&dir);
    let ad = AntiDelete::start(cfg, dir, Arc::new(FakeChannel::default())).unwrap();
    ad.capture(&text("A", ALICE, "short-lived")).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!ad.contains("A"));

    ad.shutdown();
    cleanup(&ad);
}

#[tokio::test]
async fn test_with_timeout_reports_expiry() {
    let slow = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, KnightError>(())
    };
    let err = with_timeout(Duration::from_millis(10), "media download", slow)
        .await
        .unwrap_err();
    assert!(matches!(err, KnightError::Timeout(_)));
    assert_eq!(err.to_string(), "timed out: media download after 0s");

    let fast = async { Ok::<_, KnightError>(7) };
    assert_eq!(with_timeout(Duration::from_secs(1), "x", fast).await.unwrap(), 7);
}
