//! Wire-level message model and codecs.
//!
//! Inbound events arrive as [`MessageIn`] records, outbound results leave as
//! [`MessageOut`] records. Two encodings are supported and round-trip the
//! same logical fields:
//!
//! - `json`: one serde_json object per line (primary)
//! - `legacy`: pipe-delimited `SERVER|HANDLE|NAME|MESSAGE` lines for old
//!   consumers

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Wire encoding selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    Json,
    Legacy,
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid json frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid legacy record: {0}")]
    BadRecord(String),
    #[error("invalid handle: {0}")]
    BadHandle(#[from] uuid::Error),
}

/// A player reference as carried on the wire: stable handle + current
/// display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub handle: Uuid,
    pub name: String,
}

/// Kind of an inbound event.
///
/// `Unknown` captures wire tags this build does not understand; classifying
/// one is a producer/consumer contract violation, not a user error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[serde(rename = "join")]
    PlayerJoin,
    #[serde(rename = "quit")]
    PlayerQuit,
    #[serde(rename = "kick")]
    PlayerKick,
    Chat,
    #[serde(other)]
    Unknown,
}

/// One inbound event from a game server. Immutable once decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageIn {
    /// Origin server name.
    pub server: String,
    /// Sending player.
    pub from: UserRef,
    /// Unix seconds at the origin.
    pub timestamp: i64,
    /// Correlation id tying a request to its replies.
    pub context: Uuid,
    pub kind: EventKind,
    pub contents: String,
}

/// Kind of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutKind {
    /// Chat text to display.
    Text,
    /// Kick the targeted player; `contents.plain` is the kick reason.
    Kick,
    /// The origin server executes `contents.plain` as a command on behalf
    /// of `from`.
    Command,
}

/// Rendered message body: a plain-text fallback plus a rich template with
/// positional arguments (`%1$s` = raw name, `%2$s` = handle, `%3$s` =
/// decorated display name, `%4$s` = text/reason where applicable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contents {
    pub plain: String,
    pub format: String,
    pub args: Vec<String>,
}

impl Contents {
    /// Plain-only body; an empty format means "render the plain text".
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            plain: text.into(),
            format: String::new(),
            args: Vec::new(),
        }
    }

    pub fn formatted(plain: impl Into<String>, format: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            plain: plain.into(),
            format: format.into(),
            args,
        }
    }
}

/// Delivery target selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "filter", rename_all = "lowercase")]
pub enum Target {
    /// Every online player.
    All,
    /// Players holding at least one of the listed permissions.
    Permission(Vec<String>),
    /// An explicit list of player handles.
    Players(Vec<Uuid>),
}

/// One outbound message. Built once; only the constructing component may
/// touch it before enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOut {
    pub server: String,
    pub from: UserRef,
    pub timestamp: i64,
    pub context: Uuid,
    pub kind: OutKind,
    pub contents: Contents,
    pub to: Target,
    /// Marks the last message of a logical exchange.
    pub finalize_context: bool,
}

impl MessageOut {
    /// Broadcast text derived from an inbound event.
    pub fn broadcast(origin: &MessageIn, contents: Contents) -> Self {
        Self {
            server: origin.server.clone(),
            from: origin.from.clone(),
            timestamp: Utc::now().timestamp(),
            context: origin.context,
            kind: OutKind::Text,
            contents,
            to: Target::All,
            finalize_context: false,
        }
    }

    /// Text addressed back to the originating sender only.
    pub fn reply(origin: &MessageIn, contents: Contents) -> Self {
        Self {
            to: Target::Players(vec![origin.from.handle]),
            ..Self::broadcast(origin, contents)
        }
    }

    /// Empty reply used purely as a finalize marker for multi-part
    /// exchanges.
    pub fn blank_reply(origin: &MessageIn) -> Self {
        let mut msg = Self::reply(origin, Contents::plain(""));
        msg.finalize_context = true;
        msg
    }

    /// Text delivered to players holding one of `permissions`.
    pub fn to_permission(origin: &MessageIn, permissions: Vec<String>, contents: Contents) -> Self {
        Self {
            to: Target::Permission(permissions),
            ..Self::broadcast(origin, contents)
        }
    }

    /// Kick `target` with the given reason.
    pub fn kick(origin: &MessageIn, target: Uuid, reason: impl Into<String>) -> Self {
        Self {
            kind: OutKind::Kick,
            to: Target::Players(vec![target]),
            ..Self::broadcast(origin, Contents::plain(reason))
        }
    }

    /// Instruct the origin server to run `line` as the sender.
    pub fn command(origin: &MessageIn, line: impl Into<String>) -> Self {
        Self {
            kind: OutKind::Command,
            to: Target::Players(vec![origin.from.handle]),
            ..Self::broadcast(origin, Contents::plain(line))
        }
    }

    /// Encode for the outbound transport.
    pub fn encode(&self, format: WireFormat) -> Result<String, CodecError> {
        match format {
            WireFormat::Json => Ok(serde_json::to_string(self)?),
            WireFormat::Legacy => Ok(format!(
                "{}|{}|{}|{}",
                self.server, self.from.handle, self.from.name, self.contents.plain
            )),
        }
    }
}

impl MessageIn {
    /// Decode one inbound frame.
    pub fn decode(line: &str, format: WireFormat) -> Result<Self, CodecError> {
        match format {
            WireFormat::Json => Ok(serde_json::from_str(line)?),
            WireFormat::Legacy => Self::decode_legacy(line),
        }
    }

    /// Parse a legacy `SERVER|HANDLE|NAME|MESSAGE` record. The message part
    /// may itself contain pipes.
    fn decode_legacy(line: &str) -> Result<Self, CodecError> {
        let mut parts = line.splitn(4, '|');
        let server = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CodecError::BadRecord(line.to_string()))?;
        let handle = parts
            .next()
            .ok_or_else(|| CodecError::BadRecord(line.to_string()))?;
        let name = parts
            .next()
            .ok_or_else(|| CodecError::BadRecord(line.to_string()))?;
        let message = parts
            .next()
            .ok_or_else(|| CodecError::BadRecord(line.to_string()))?;

        Ok(Self {
            server: server.to_string(),
            from: UserRef {
                handle: Uuid::parse_str(handle)?,
                name: name.to_string(),
            },
            timestamp: Utc::now().timestamp(),
            context: Uuid::new_v4(),
            kind: EventKind::Chat,
            contents: message.to_string(),
        })
    }
}
