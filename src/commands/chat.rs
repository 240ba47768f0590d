//! Plain chat-producing commands: /me, /opchat, /staffnotice.

use super::{CommandContext, CommandHandler, Flags};
use crate::error::CommandError;
use crate::message::{Contents, MessageOut, Target};
use crate::relay::{EMOTE_FORMAT, OPCHAT_FORMAT, STAFF_FORMAT};
use async_trait::async_trait;

fn require_text(args: &[String], usage: &str) -> Result<String, CommandError> {
    let text = args.join(" ");
    if text.is_empty() {
        return Err(CommandError::Usage(usage.to_string()));
    }
    Ok(text)
}

fn format_args(ctx: &CommandContext, text: &str) -> Vec<String> {
    vec![
        ctx.msg.from.name.clone(),
        ctx.msg.from.handle.to_string(),
        ctx.display_name.clone(),
        text.to_string(),
    ]
}

pub struct MeHandler;

#[async_trait]
impl CommandHandler for MeHandler {
    async fn run(
        &self,
        ctx: &CommandContext,
        _flags: &Flags,
        args: &[String],
    ) -> Result<Option<MessageOut>, CommandError> {
        let text = require_text(args, "Usage: /me <stuff here>")?;
        let contents = Contents::formatted(
            format!("* {} \u{a7}7{}", ctx.display_name, text),
            EMOTE_FORMAT,
            format_args(ctx, &text),
        );

        // An active conversation keeps the emote inside it.
        if let Some(target) = ctx
            .relay
            .conversations
            .get(&ctx.msg.from.handle)
            .map(|entry| entry.value().clone())
        {
            if !ctx.relay.directory.is_online(target.handle) {
                return Err(CommandError::PlayerNotFound(target.name));
            }
            let mut out = MessageOut::reply(&ctx.msg, contents);
            out.to = Target::Players(vec![target.handle, ctx.msg.from.handle]);
            return Ok(Some(out));
        }

        Ok(Some(MessageOut::broadcast(&ctx.msg, contents)))
    }
}

pub struct OpChatHandler;

#[async_trait]
impl CommandHandler for OpChatHandler {
    async fn run(
        &self,
        ctx: &CommandContext,
        _flags: &Flags,
        args: &[String],
    ) -> Result<Option<MessageOut>, CommandError> {
        let text = require_text(args, "Usage: /opchat <text>")?;
        let contents = Contents::formatted(
            format!("\u{a7}6[#OP] {}\u{a7}f: {}", ctx.display_name, text),
            OPCHAT_FORMAT,
            format_args(ctx, &text),
        );
        Ok(Some(MessageOut::to_permission(
            &ctx.msg,
            vec!["chatlink.opchat".to_string()],
            contents,
        )))
    }
}

pub struct StaffNoticeHandler;

#[async_trait]
impl CommandHandler for StaffNoticeHandler {
    async fn run(
        &self,
        ctx: &CommandContext,
        _flags: &Flags,
        args: &[String],
    ) -> Result<Option<MessageOut>, CommandError> {
        let text = require_text(args, "Usage: /staffnotice <text>")?;
        let contents = Contents::formatted(
            format!("\u{a7}c[STAFF] {}\u{a7}f: {}", ctx.display_name, text),
            STAFF_FORMAT,
            format_args(ctx, &text),
        );
        Ok(Some(MessageOut::to_permission(
            &ctx.msg,
            vec!["chatlink.staffnotice".to_string()],
            contents,
        )))
    }
}
