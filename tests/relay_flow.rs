//! End-to-end classification, dispatch and queue ordering tests.

use chatlinkd::config::{DirectoryConfig, StaffEntry};
use chatlinkd::db::Database;
use chatlinkd::directory::ConfigDirectory;
use chatlinkd::identity::{BanKind, IdentityCache};
use chatlinkd::message::{EventKind, MessageIn, MessageOut, OutKind, Target, UserRef};
use chatlinkd::queue;
use chatlinkd::relay::ChatRelay;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Harness {
    relay: Arc<ChatRelay>,
    rx: mpsc::UnboundedReceiver<MessageOut>,
    staff: UserRef,
}

async fn harness() -> Harness {
    let staff = UserRef {
        handle: Uuid::new_v4(),
        name: "Mod".to_string(),
    };
    let config = DirectoryConfig {
        default_permissions: vec!["chatlink.chat".to_string()],
        muted: vec![],
        staff: vec![StaffEntry {
            handle: staff.handle,
            rank: 2,
            tag: Some("\u{a7}c[Mod]".to_string()),
            permissions: [
                "chatlink.ban",
                "chatlink.conv",
                "chatlink.who",
                "chatlink.staffnotice",
                "chatlink.opchat",
                "chatlink.emote",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }],
    };

    let db = Database::new(":memory:").await.unwrap();
    let directory = Arc::new(ConfigDirectory::from_config(&config));
    let (queue, rx) = queue::channel();
    let relay = ChatRelay::new(
        IdentityCache::new(db, directory.clone()),
        directory,
        queue,
    );
    Harness { relay, rx, staff }
}

fn event(from: &UserRef, kind: EventKind, text: &str) -> MessageIn {
    MessageIn {
        server: "survival".to_string(),
        from: from.clone(),
        timestamp: 1_700_000_000,
        context: Uuid::new_v4(),
        kind,
        contents: text.to_string(),
    }
}

fn player(name: &str) -> UserRef {
    UserRef {
        handle: Uuid::new_v4(),
        name: name.to_string(),
    }
}

impl Harness {
    /// Feed a join event and discard the join broadcast.
    async fn join(&mut self, who: &UserRef) {
        self.relay
            .handle_incoming(event(who, EventKind::PlayerJoin, ""))
            .await;
        let out = self.rx.recv().await.unwrap();
        assert!(out.contents.plain.contains("joined!"));
    }

    async fn chat(&mut self, from: &UserRef, text: &str) {
        self.relay
            .handle_incoming(event(from, EventKind::Chat, text))
            .await;
    }
}

#[tokio::test]
async fn staff_notice_prefix_is_rewritten_and_gated() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    h.chat(&staff, "#!restart in five").await;

    let out = h.rx.recv().await.unwrap();
    assert_eq!(
        out.to,
        Target::Permission(vec!["chatlink.staffnotice".to_string()])
    );
    assert!(out.contents.plain.contains("[STAFF]"));
    assert_eq!(out.contents.args[3], "restart in five");
    assert!(out.finalize_context);

    // A regular player lacks the permission and gets an error reply instead.
    let pleb = player("Pleb");
    h.chat(&pleb, "#!ha").await;
    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.to, Target::Players(vec![pleb.handle]));
    assert!(out.contents.plain.contains("Permission denied"));
}

#[tokio::test]
async fn chat_broadcasts_preserve_fifo_order() {
    let mut h = harness().await;
    let alice = player("Alice");

    for i in 0..5 {
        h.chat(&alice, &format!("line {}", i)).await;
    }
    for i in 0..5 {
        let out = h.rx.recv().await.unwrap();
        assert_eq!(out.to, Target::All);
        assert_eq!(out.contents.args[3], format!("line {}", i));
    }
}

#[tokio::test]
async fn duplicate_event_broadcasts_twice() {
    let mut h = harness().await;
    let alice = player("Alice");
    let msg = event(&alice, EventKind::Chat, "once more");

    // No dedup by context id: the same event delivered twice goes out
    // twice.
    h.relay.handle_incoming(msg.clone()).await;
    h.relay.handle_incoming(msg.clone()).await;

    for _ in 0..2 {
        let out = h.rx.recv().await.unwrap();
        assert_eq!(out.to, Target::All);
        assert_eq!(out.context, msg.context);
        assert_eq!(out.contents.args[3], "once more");
    }
}

#[tokio::test]
async fn conversation_redirect_and_clear() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    let bob = player("Bob");
    h.join(&bob).await;

    h.chat(&staff, "/conv Bob").await;
    let out = h.rx.recv().await.unwrap();
    assert!(out.contents.plain.contains("conversation with Bob"));

    // Plain chat now goes privately to both parties instead of broadcast.
    h.chat(&staff, "psst").await;
    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.to, Target::Players(vec![bob.handle, staff.handle]));
    assert!(out.contents.plain.contains("[CONV]"));
    assert_eq!(out.contents.args[3], "psst");
    assert!(out.finalize_context);

    h.chat(&staff, "/conv").await;
    let out = h.rx.recv().await.unwrap();
    assert!(out.contents.plain.contains("no longer in a conversation"));

    h.chat(&staff, "back in public").await;
    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.to, Target::All);
}

#[tokio::test]
async fn conversation_with_offline_target_errors() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    let bob = player("Bob");
    h.join(&bob).await;

    h.chat(&staff, "/conv Bob").await;
    h.rx.recv().await.unwrap();

    h.relay
        .handle_incoming(event(&bob, EventKind::PlayerQuit, ""))
        .await;
    h.rx.recv().await.unwrap();

    h.chat(&staff, "anyone there?").await;
    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.to, Target::Players(vec![staff.handle]));
    assert!(out.contents.plain.contains("Bob is not online"));
}

#[tokio::test]
async fn ban_flow_emits_commands_kick_and_confirmation() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    let bob = player("Bob");
    h.join(&bob).await;

    h.chat(&staff, "/ban -r Bob spamming").await;

    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.kind, OutKind::Command);
    assert_eq!(out.contents.plain, "co Bob force");

    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.contents.plain, "lb writelogfile player Bob");
    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.contents.plain, "lb rollback player Bob");

    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.kind, OutKind::Kick);
    assert_eq!(out.to, Target::Players(vec![bob.handle]));
    assert_eq!(out.contents.plain, "[Mod] spamming");

    let out = h.rx.recv().await.unwrap();
    assert!(out.contents.plain.contains("Banned Bob: spamming"));
    assert!(out.finalize_context);

    let subject = h
        .relay
        .identities
        .resolve_id(Some(bob.handle), Some("Bob"), false)
        .await
        .unwrap();
    let ban = h.relay.identities.get_ban(subject).await.unwrap();
    assert_eq!(ban.kind, BanKind::Local);
    assert_eq!(ban.reason, "spamming");
}

#[tokio::test]
async fn ban_without_reason_uses_default_and_respects_rank() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    let bob = player("Bob");
    h.join(&bob).await;

    h.chat(&staff, "/ban Bob").await;
    // co command, then kick, then confirmation.
    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.contents.plain, "co Bob force");
    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.kind, OutKind::Kick);
    assert_eq!(out.contents.plain, "[Mod] Kickbanned by Mod");
    h.rx.recv().await.unwrap();

    // A sender without the ban permission is rejected at dispatch.
    let pleb = player("Pleb");
    h.chat(&pleb, "/ban Bob").await;
    let out = h.rx.recv().await.unwrap();
    assert!(out.contents.plain.contains("Permission denied"));
}

#[tokio::test]
async fn global_and_temporary_are_mutually_exclusive() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    let bob = player("Bob");
    h.join(&bob).await;

    h.chat(&staff, "/ban -g -t 2h Bob").await;
    let out = h.rx.recv().await.unwrap();
    assert!(out.contents.plain.contains("global and temporary"));

    h.chat(&staff, "/ban -t 2h Bob afk farming").await;
    while let Some(out) = h.rx.recv().await {
        if out.finalize_context {
            assert!(out.contents.plain.contains("Banned Bob"));
            break;
        }
    }
    let subject = h
        .relay
        .identities
        .resolve_id(Some(bob.handle), Some("Bob"), false)
        .await
        .unwrap();
    assert_eq!(
        h.relay.identities.get_ban(subject).await.unwrap().kind,
        BanKind::Temporary
    );
}

#[tokio::test]
async fn unknown_command_yields_error_reply() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    h.chat(&staff, "/frobnicate now").await;

    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.to, Target::Players(vec![staff.handle]));
    assert!(out.contents.plain.contains("Unknown command"));
    assert!(out.finalize_context);
}

#[tokio::test]
async fn who_lists_each_server_and_finalizes() {
    let mut h = harness().await;
    let staff = h.staff.clone();
    let bob = player("Bob");
    let alice = player("Alice");
    h.join(&bob).await;
    h.join(&alice).await;

    h.chat(&staff, "/who").await;

    let out = h.rx.recv().await.unwrap();
    assert_eq!(out.to, Target::Players(vec![staff.handle]));
    assert!(out.contents.plain.contains("[survival]"));
    // Sorted case-insensitively, colors ignored.
    assert!(out.contents.args[1].starts_with("Alice"));
    assert!(!out.finalize_context);

    let fin = h.rx.recv().await.unwrap();
    assert!(fin.finalize_context);
    assert!(fin.contents.plain.is_empty());
}

#[tokio::test]
async fn muted_player_chat_is_dropped_without_reply() {
    let muted = player("Quiet");
    let config = DirectoryConfig {
        default_permissions: vec!["chatlink.chat".to_string()],
        muted: vec![muted.handle],
        staff: vec![],
    };
    let db = Database::new(":memory:").await.unwrap();
    let directory = Arc::new(ConfigDirectory::from_config(&config));
    let (queue, mut rx) = queue::channel();
    let relay = ChatRelay::new(
        IdentityCache::new(db, directory.clone()),
        directory,
        queue,
    );

    relay
        .handle_incoming(event(&muted, EventKind::Chat, "hello?"))
        .await;
    let speaker = player("Loud");
    relay
        .handle_incoming(event(&speaker, EventKind::Chat, "audible"))
        .await;

    // Only the unmuted player's line comes through.
    let out = rx.recv().await.unwrap();
    assert_eq!(out.from.name, "Loud");
}
