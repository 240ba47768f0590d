//! Message classifier and formatter.
//!
//! [`ChatRelay`] is the shared context object for one daemon instance. It
//! turns inbound events into outbound messages: lifecycle events get fixed
//! rich templates, chat is sanitized, privileged prefixes are rewritten
//! into commands, slash lines go through the dispatcher and plain chat is
//! broadcast after mute/conversation/permission checks.
//!
//! Rich templates use positional arguments: `%1$s` raw name, `%2$s` handle,
//! `%3$s` decorated display name, `%4$s` text or reason.

use crate::commands::{conv, Registry};
use crate::directory::{PlayerDirectory, PlayerRef};
use crate::identity::IdentityCache;
use crate::message::{Contents, EventKind, MessageIn, MessageOut};
use crate::queue::QueueHandle;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

macro_rules! player_span {
    () => {
        "<span onHover=\"show_text('%1$s')\" onClick=\"suggest_command('/pm %1$s ')\">%3$s</span>"
    };
}
macro_rules! message_format {
    () => {
        concat!(player_span!(), "<color name=\"white\">: %4$s</color>")
    };
}

pub const MESSAGE_FORMAT: &str = message_format!();
pub const JOIN_FORMAT: &str = concat!(
    "<color name=\"dark_green\">[+]</color> ",
    player_span!(),
    " <color name=\"yellow\">joined!</color>"
);
pub const QUIT_FORMAT: &str = concat!(
    "<color name=\"dark_red\">[-]</color> ",
    player_span!(),
    " <color name=\"yellow\">disconnected!</color>"
);
pub const KICK_FORMAT: &str = concat!(
    "<color name=\"dark_red\">[-]</color> ",
    player_span!(),
    " <color name=\"yellow\">was kicked (%4$s)!</color>"
);
pub const EMOTE_FORMAT: &str =
    concat!("* ", player_span!(), " <color name=\"gray\">%4$s</color>");
pub const CONV_FORMAT: &str =
    concat!("<color name=\"yellow\">[CONV]</color> ", message_format!());
pub const OPCHAT_FORMAT: &str =
    concat!("<color name=\"gold\">[#OP]</color> ", message_format!());
pub const STAFF_FORMAT: &str =
    concat!("<color name=\"red\">[STAFF]</color> ", message_format!());
pub const LIST_FORMAT: &str =
    "<color name=\"dark_purple\">[CL]</color> <color name=\"dark_gray\">[%1$s]</color> %2$s";

/// Classification failures that indicate a broken producer, not a user
/// error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unprocessable {kind:?} event from {server}")]
    Unprocessable { server: String, kind: EventKind },
}

/// Shared relay context: directory, identity/ban cache, delivery queue,
/// conversation pins and the command registry.
pub struct ChatRelay {
    pub directory: Arc<dyn PlayerDirectory>,
    pub identities: IdentityCache,
    pub queue: QueueHandle,
    /// Sender handle -> pinned conversation partner. Last write wins.
    pub conversations: DashMap<Uuid, PlayerRef>,
    registry: Registry,
}

/// Strip formatting escapes and control characters from chat text.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\u{a7}' && !c.is_control())
        .collect()
}

impl ChatRelay {
    pub fn new(
        identities: IdentityCache,
        directory: Arc<dyn PlayerDirectory>,
        queue: QueueHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            identities,
            queue,
            conversations: DashMap::new(),
            registry: Registry::new(),
        })
    }

    /// Classify one inbound event into at most one outbound message.
    ///
    /// Handlers may enqueue further messages directly; the returned message
    /// is the one that closes the exchange.
    pub async fn classify(
        self: &Arc<Self>,
        msg: &MessageIn,
    ) -> Result<Option<MessageOut>, RelayError> {
        match msg.kind {
            EventKind::PlayerJoin => {
                self.note_presence(msg, true);
                Ok(Some(self.lifecycle(msg, JOIN_FORMAT, "\u{a7}2[+]", "joined!", None)))
            }
            EventKind::PlayerQuit => {
                self.note_presence(msg, false);
                Ok(Some(self.lifecycle(
                    msg,
                    QUIT_FORMAT,
                    "\u{a7}4[-]",
                    "disconnected!",
                    None,
                )))
            }
            EventKind::PlayerKick => {
                self.note_presence(msg, false);
                let reason = msg.contents.clone();
                let tail = format!("was kicked ({})!", reason);
                Ok(Some(self.lifecycle(msg, KICK_FORMAT, "\u{a7}4[-]", &tail, Some(reason))))
            }
            EventKind::Chat => self.classify_chat(msg).await,
            EventKind::Unknown => Err(RelayError::Unprocessable {
                server: msg.server.clone(),
                kind: msg.kind,
            }),
        }
    }

    /// Classify-and-enqueue wrapper for the ingress loop. Never propagates
    /// an error; unprocessable events are logged and dropped.
    pub async fn handle_incoming(self: &Arc<Self>, msg: MessageIn) {
        match self.classify(&msg).await {
            Ok(Some(mut out)) => {
                out.finalize_context = true;
                self.queue.send(out);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, server = %msg.server, contents = %msg.contents, "Dropped unprocessable event");
            }
        }
    }

    /// Drain inbound events until cancelled or the gateway hangs up.
    pub async fn run_ingress(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<MessageIn>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_incoming(msg).await,
                    None => break,
                },
            }
        }
        info!("Ingress loop stopped");
    }

    fn note_presence(&self, msg: &MessageIn, online: bool) {
        self.directory.note_presence(
            &msg.server,
            &PlayerRef {
                handle: msg.from.handle,
                name: msg.from.name.clone(),
            },
            online,
        );
    }

    fn lifecycle(
        &self,
        msg: &MessageIn,
        format: &str,
        prefix: &str,
        tail: &str,
        reason: Option<String>,
    ) -> MessageOut {
        let display = self.directory.display_name(msg.from.handle, &msg.from.name);
        let mut args = vec![
            msg.from.name.clone(),
            msg.from.handle.to_string(),
            display.clone(),
        ];
        if let Some(reason) = reason {
            args.push(reason);
        }
        MessageOut::broadcast(
            msg,
            Contents::formatted(
                format!("{} \u{a7}e{} {}", prefix, display, tail),
                format,
                args,
            ),
        )
    }

    async fn classify_chat(
        self: &Arc<Self>,
        msg: &MessageIn,
    ) -> Result<Option<MessageOut>, RelayError> {
        let text = sanitize(&msg.contents);
        if text.is_empty() {
            return Ok(None);
        }

        let display = self.directory.display_name(msg.from.handle, &msg.from.name);

        // Privileged prefixes become commands before dispatch.
        let text = if let Some(rest) = text.strip_prefix("#!") {
            format!("/staffnotice {}", rest)
        } else if let Some(rest) = text.strip_prefix('#') {
            format!("/opchat {}", rest)
        } else {
            text
        };

        if let Some(line) = text.strip_prefix('/') {
            let line = line.trim();
            let (name, arg_str) = match line.split_once(char::is_whitespace) {
                Some((name, rest)) => (name, rest),
                None => (line, ""),
            };
            return Ok(self.registry.dispatch(self, msg, &display, name, arg_str).await);
        }

        if self.directory.is_muted(msg.from.handle) {
            debug!(sender = %msg.from.name, "Muted sender; chat dropped");
            return Ok(None);
        }

        if conv::redirect(self, msg, &display, &text) {
            return Ok(None);
        }

        if !self.directory.has_permission(msg.from.handle, "chatlink.chat") {
            debug!(sender = %msg.from.name, "Sender lacks chat permission; dropped");
            return Ok(None);
        }

        info!(target: "transcript", server = %msg.server, name = %msg.from.name, message = %text);

        Ok(Some(MessageOut::broadcast(
            msg,
            Contents::formatted(
                format!("{}\u{a7}f: {}", display, text),
                MESSAGE_FORMAT,
                vec![
                    msg.from.name.clone(),
                    msg.from.handle.to_string(),
                    display,
                    text,
                ],
            ),
        )))
    }
}
