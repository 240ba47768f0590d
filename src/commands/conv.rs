//! Private conversations.
//!
//! `/conv <name>` pins all of the sender's subsequent plain chat to one
//! player; `/conv` with no argument clears the pin. The redirect itself is
//! applied by the classifier through [`redirect`].

use super::{info_reply, CommandContext, CommandHandler, Flags};
use crate::directory::match_player_single;
use crate::error::{error_reply, CommandError};
use crate::message::{Contents, MessageIn, MessageOut, Target};
use crate::relay::{ChatRelay, CONV_FORMAT};
use async_trait::async_trait;

pub struct ConvHandler;

#[async_trait]
impl CommandHandler for ConvHandler {
    async fn run(
        &self,
        ctx: &CommandContext,
        _flags: &Flags,
        args: &[String],
    ) -> Result<Option<MessageOut>, CommandError> {
        let relay = &ctx.relay;
        match args.first() {
            Some(pattern) => {
                let target = match_player_single(relay.directory.as_ref(), pattern)?;
                let text = format!("You are now in a conversation with {}.", target.name);
                relay.conversations.insert(ctx.msg.from.handle, target);
                Ok(Some(info_reply(&ctx.msg, &text)))
            }
            None => {
                relay.conversations.remove(&ctx.msg.from.handle);
                Ok(Some(info_reply(
                    &ctx.msg,
                    "You are no longer in a conversation.",
                )))
            }
        }
    }
}

/// Apply the sender's conversation pin to a plain chat line.
///
/// Returns `true` when the message was consumed (delivered privately or
/// answered with an error); `false` means no pin is active and normal
/// classification continues.
pub fn redirect(relay: &ChatRelay, msg: &MessageIn, display_name: &str, text: &str) -> bool {
    let Some(target) = relay
        .conversations
        .get(&msg.from.handle)
        .map(|entry| entry.value().clone())
    else {
        return false;
    };

    if !relay.directory.is_online(target.handle) {
        relay.queue.send(error_reply(
            msg,
            &format!("{} is not online", target.name),
        ));
        return true;
    }

    let plain = format!("\u{a7}e[CONV] {}\u{a7}f: {}", display_name, text);
    let contents = Contents::formatted(
        plain,
        CONV_FORMAT,
        vec![
            msg.from.name.clone(),
            msg.from.handle.to_string(),
            display_name.to_string(),
            text.to_string(),
        ],
    );
    let mut out = MessageOut::reply(msg, contents);
    out.to = Target::Players(vec![target.handle, msg.from.handle]);
    out.finalize_context = true;
    relay.queue.send(out);
    true
}
