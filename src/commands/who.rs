//! Player listing and per-player detail.
//!
//! `/who` with no argument prints one sorted player list per server. With a
//! name it replies with the player's name, rank and nametag; holders of
//! `chatlink.who.logdetails` additionally get last-logout/last-address
//! details looked up in the background so the chat path never waits on the
//! activity log.

use super::{info_reply, CommandContext, CommandHandler, Flags};
use crate::directory::match_player_single;
use crate::error::CommandError;
use crate::message::{Contents, MessageOut};
use crate::relay::LIST_FORMAT;
use async_trait::async_trait;
use chrono::DateTime;
use std::sync::Arc;

pub struct WhoHandler;

/// Drop `§x` color sequences for sorting.
fn strip_color(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\u{a7}' {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

fn format_time(unix: i64) -> String {
    match DateTime::from_timestamp(unix, 0) {
        Some(dt) => dt.format("%a %e %b %Y %H:%M:%S UTC").to_string(),
        None => unix.to_string(),
    }
}

#[async_trait]
impl CommandHandler for WhoHandler {
    async fn run(
        &self,
        ctx: &CommandContext,
        _flags: &Flags,
        args: &[String],
    ) -> Result<Option<MessageOut>, CommandError> {
        let relay = &ctx.relay;
        let directory = relay.directory.as_ref();

        let Some(pattern) = args.first() else {
            for server in directory.servers() {
                let mut names: Vec<String> = directory
                    .online_players(&server)
                    .iter()
                    .map(|p| directory.display_name(p.handle, &p.name))
                    .collect();
                names.sort_by_key(|n| strip_color(n).to_lowercase());
                let list = names.join(", ");

                let contents = Contents::formatted(
                    format!("\u{a7}5[CL] \u{a7}8[{}]\u{a7}f {}", server, list),
                    LIST_FORMAT,
                    vec![server.clone(), list.clone()],
                );
                relay.queue.send(MessageOut::reply(&ctx.msg, contents));
            }
            return Ok(Some(MessageOut::blank_reply(&ctx.msg)));
        };

        let target = match_player_single(directory, pattern)?;
        let queue = &relay.queue;

        queue.send(info_reply(&ctx.msg, &format!("Name: {}", target.name)));
        queue.send(info_reply(
            &ctx.msg,
            &format!("Rank: {}", directory.rank(target.handle)),
        ));
        let nametag_reply = info_reply(
            &ctx.msg,
            &format!(
                "Nametag: {}",
                directory.display_name(target.handle, &target.name)
            ),
        );

        if !directory.has_permission(ctx.msg.from.handle, "chatlink.who.logdetails") {
            return Ok(Some(nametag_reply));
        }
        queue.send(nametag_reply);

        // Activity-log details arrive asynchronously; the task sends the
        // exchange finalizer itself.
        let relay = Arc::clone(&ctx.relay);
        let msg = ctx.msg.clone();
        tokio::spawn(async move {
            let id = relay
                .identities
                .resolve_id(Some(target.handle), Some(&target.name), false)
                .await;

            let logout = match id {
                Some(id) => {
                    relay
                        .identities
                        .latest_log_entry(id, Some("logout"), Some(&msg.server))
                        .await
                }
                None => None,
            };
            let text = match logout {
                Some(entry) => format!("Last logout: {}", format_time(entry.time)),
                None => "Last logout data not present".to_string(),
            };
            relay.queue.send(info_reply(&msg, &text));

            let latest = match id {
                Some(id) => {
                    relay
                        .identities
                        .latest_log_entry(id, None, Some(&msg.server))
                        .await
                }
                None => None,
            };
            let text = match latest.and_then(|entry| entry.address) {
                Some(address) => format!("Last address: {}", address),
                None => "Address data not present".to_string(),
            };
            let mut last = info_reply(&msg, &text);
            last.finalize_context = true;
            relay.queue.send(last);
        });

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_color_removes_code_pairs() {
        assert_eq!(strip_color("\u{a7}c[Admin]\u{a7}fFox"), "[Admin]Fox");
        assert_eq!(strip_color("plain"), "plain");
        assert_eq!(strip_color("trailing\u{a7}"), "trailing");
    }

    #[test]
    fn format_time_renders_utc() {
        assert_eq!(format_time(0), "Thu  1 Jan 1970 00:00:00 UTC");
    }
}
