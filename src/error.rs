//! Command error taxonomy.
//!
//! User-facing failures (permission, usage, lookup) become reply messages at
//! the dispatch boundary; everything else is logged and produces no reply.

use crate::db::DbError;
use crate::message::{Contents, MessageIn, MessageOut};
use thiserror::Error;

/// Errors raised while dispatching or handling a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("{0}")]
    Usage(String),

    #[error("no player found matching {0}")]
    PlayerNotFound(String),

    #[error("multiple players found matching {0}")]
    MultiplePlayersFound(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// Static code for log labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::Usage(_) => "usage",
            Self::PlayerNotFound(_) => "player_not_found",
            Self::MultiplePlayersFound(_) => "multiple_players_found",
            Self::UnknownCommand(_) => "unknown_command",
            Self::Db(_) => "db_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to a user-visible error reply addressed to the sender.
    ///
    /// Returns `None` for kinds that must not surface to players
    /// (database/internal failures).
    pub fn to_reply(&self, origin: &MessageIn) -> Option<MessageOut> {
        let text = match self {
            Self::PermissionDenied => "Permission denied!".to_string(),
            Self::Usage(msg) => msg.clone(),
            Self::PlayerNotFound(name) => format!("No player found matching {}", name),
            Self::MultiplePlayersFound(name) => {
                format!("Multiple players found matching {}", name)
            }
            Self::UnknownCommand(_) => "Unknown command".to_string(),
            Self::Db(_) | Self::Internal(_) => return None,
        };
        Some(error_reply(origin, &text))
    }
}

/// Build a `§4[CL]`-prefixed error reply to the sender.
pub fn error_reply(origin: &MessageIn, text: &str) -> MessageOut {
    let mut msg = MessageOut::reply(origin, Contents::plain(format!("\u{a7}4[CL] \u{a7}c{}", text)));
    msg.finalize_context = true;
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventKind, Target, UserRef};
    use uuid::Uuid;

    fn origin() -> MessageIn {
        MessageIn {
            server: "s1".into(),
            from: UserRef {
                handle: Uuid::new_v4(),
                name: "Foxy".into(),
            },
            timestamp: 0,
            context: Uuid::new_v4(),
            kind: EventKind::Chat,
            contents: String::new(),
        }
    }

    #[test]
    fn user_visible_errors_become_replies() {
        let origin = origin();
        let reply = CommandError::PermissionDenied.to_reply(&origin).unwrap();
        assert_eq!(reply.to, Target::Players(vec![origin.from.handle]));
        assert!(reply.contents.plain.contains("Permission denied"));
        assert!(reply.finalize_context);
    }

    #[test]
    fn internal_errors_produce_no_reply() {
        let origin = origin();
        assert!(CommandError::Internal("boom".into()).to_reply(&origin).is_none());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(CommandError::PermissionDenied.error_code(), "permission_denied");
        assert_eq!(CommandError::Usage("x".into()).error_code(), "usage");
        assert_eq!(
            CommandError::UnknownCommand("zap".into()).error_code(),
            "unknown_command"
        );
    }
}
