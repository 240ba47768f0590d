//! Ban issuance.
//!
//! Issues a ban against an online player: resolves both parties to durable
//! ids, persists the ban through the cache, enqueues the moderation-log
//! command (and optional rollback commands), kicks the target and advises
//! staff of possible alts.

use super::{info_reply, CommandContext, CommandHandler, Flags};
use crate::directory::match_player_single;
use crate::error::CommandError;
use crate::identity::{Ban, BanKind};
use crate::message::{Contents, MessageOut};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::info;

pub struct BanHandler;

/// Parse a ban duration of the form `<integer><m|h|d>`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, CommandError> {
    let usage = || CommandError::Usage(format!("Invalid duration {} (use e.g. 30m, 2h, 5d)", s));

    let unit = s.chars().last().ok_or_else(usage)?;
    let digits = &s[..s.len() - unit.len_utf8()];
    let value: u64 = digits.parse().map_err(|_| usage())?;

    let seconds = match unit {
        'm' => value.checked_mul(60),
        'h' => value.checked_mul(3600),
        'd' => value.checked_mul(86400),
        _ => return Err(usage()),
    }
    .ok_or_else(usage)?;
    Ok(Duration::from_secs(seconds))
}

#[async_trait]
impl CommandHandler for BanHandler {
    async fn run(
        &self,
        ctx: &CommandContext,
        flags: &Flags,
        args: &[String],
    ) -> Result<Option<MessageOut>, CommandError> {
        let Some(pattern) = args.first() else {
            return Err(CommandError::Usage(
                "Usage: /ban [<flags>] <name> [reason here]".to_string(),
            ));
        };
        if flags.has('g') && flags.value('t').is_some() {
            return Err(CommandError::Usage(
                "A ban cannot be both global and temporary".to_string(),
            ));
        }
        let duration = flags.value('t').map(parse_duration).transpose()?;

        let relay = &ctx.relay;
        let target = match_player_single(relay.directory.as_ref(), pattern)?;

        // The issuer must outrank the target.
        let issuer_rank = relay.directory.rank(ctx.msg.from.handle);
        if issuer_rank <= relay.directory.rank(target.handle) {
            return Err(CommandError::PermissionDenied);
        }

        let reason = if args.len() > 1 {
            args[1..].join(" ")
        } else {
            format!("Kickbanned by {}", ctx.msg.from.name)
        };

        let identities = &relay.identities;
        let subject = identities
            .resolve_id(Some(target.handle), Some(&target.name), true)
            .await
            .ok_or_else(|| {
                CommandError::Internal(format!("could not resolve ban subject {}", target.name))
            })?;
        let issuer = identities
            .resolve_id(Some(ctx.msg.from.handle), Some(&ctx.msg.from.name), true)
            .await
            .ok_or_else(|| {
                CommandError::Internal(format!("could not resolve issuer {}", ctx.msg.from.name))
            })?;

        let kind = if flags.has('g') {
            BanKind::Global
        } else if duration.is_some() {
            BanKind::Temporary
        } else {
            BanKind::Local
        };
        // Permanent bans record the issue time, temporary bans the expiry.
        let now = Utc::now().timestamp();
        let time = match duration {
            Some(d) => i64::try_from(d.as_secs())
                .ok()
                .and_then(|s| now.checked_add(s))
                .ok_or_else(|| CommandError::Usage("Ban duration too large".to_string()))?,
            None => now,
        };

        identities
            .add_ban(Ban {
                subject,
                issuer,
                reason: reason.clone(),
                kind,
                time,
            })
            .await?;

        info!(
            target = %target.name,
            issuer = %ctx.msg.from.name,
            kind = kind.as_str(),
            reason = %reason,
            "Ban issued"
        );

        let queue = &relay.queue;
        queue.send(MessageOut::command(
            &ctx.msg,
            format!("co {} force", target.name),
        ));
        if flags.has('r') {
            queue.send(MessageOut::command(
                &ctx.msg,
                format!("lb writelogfile player {}", target.name),
            ));
            queue.send(MessageOut::command(
                &ctx.msg,
                format!("lb rollback player {}", target.name),
            ));
        }
        queue.send(MessageOut::kick(
            &ctx.msg,
            target.handle,
            format!("[{}] {}", ctx.msg.from.name, reason),
        ));

        if let Some(summary) = identities.alts_summary(&target.name, subject).await {
            queue.send(MessageOut::to_permission(
                &ctx.msg,
                vec!["chatlink.ban".to_string()],
                Contents::plain(summary),
            ));
        }

        Ok(Some(info_reply(
            &ctx.msg,
            &format!("Banned {}: {}", target.name, reason),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minutes_hours_days() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(30 * 60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(2 * 3600));
        assert_eq!(parse_duration("5d").unwrap(), Duration::from_secs(5 * 86400));
    }

    #[test]
    fn rejects_missing_value_or_unit() {
        assert!(parse_duration("x").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn rejects_overflowing_durations() {
        assert!(parse_duration("18446744073709551615m").is_err());
        assert!(parse_duration("400000000000000000d").is_err());
    }
}
