//! Command registry and dispatch.
//!
//! Commands are declared as data: a [`CommandSpec`] carries names/aliases,
//! the required permission, the declared flag letters and a boxed handler.
//! Dispatch parses the leading flag cluster, gates on permission and
//! converts any user-visible failure into a reply addressed to the sender.

pub mod ban;
pub mod chat;
pub mod conv;
pub mod who;

use crate::error::CommandError;
use crate::message::{Contents, MessageIn, MessageOut};
use crate::relay::ChatRelay;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

/// Parsed command flags.
#[derive(Debug, Default, Clone)]
pub struct Flags {
    bools: HashSet<char>,
    strings: HashMap<char, String>,
}

impl Flags {
    /// Whether a boolean flag was present.
    pub fn has(&self, flag: char) -> bool {
        self.bools.contains(&flag)
    }

    /// Value of a string flag, if supplied.
    pub fn value(&self, flag: char) -> Option<&str> {
        self.strings.get(&flag).map(String::as_str)
    }
}

/// Split a token list into its leading flag cluster and positional rest.
///
/// Declared boolean flags are single letters whose presence sets them;
/// declared string flags consume the next token as their value. An
/// undeclared letter is a usage error.
pub fn parse_flags(
    bool_flags: &str,
    string_flags: &str,
    tokens: &[String],
) -> Result<(Flags, Vec<String>), CommandError> {
    let mut flags = Flags::default();
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        let Some(cluster) = token.strip_prefix('-') else {
            break;
        };
        if cluster.is_empty() {
            break;
        }
        for letter in cluster.chars() {
            if bool_flags.contains(letter) {
                flags.bools.insert(letter);
            } else if string_flags.contains(letter) {
                i += 1;
                let value = tokens
                    .get(i)
                    .ok_or_else(|| CommandError::Usage(format!("Flag -{} needs a value", letter)))?;
                flags.strings.insert(letter, value.clone());
            } else {
                return Err(CommandError::Usage(format!("Unknown flag -{}", letter)));
            }
        }
        i += 1;
    }

    Ok((flags, tokens[i..].to_vec()))
}

/// Context handed to command handlers.
pub struct CommandContext {
    pub relay: Arc<ChatRelay>,
    pub msg: MessageIn,
    /// Sender's decorated display name.
    pub display_name: String,
}

/// A command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command. The returned message (if any) is the final reply;
    /// handlers may also enqueue additional messages directly.
    async fn run(
        &self,
        ctx: &CommandContext,
        flags: &Flags,
        args: &[String],
    ) -> Result<Option<MessageOut>, CommandError>;
}

/// Declarative description of one command.
pub struct CommandSpec {
    pub names: &'static [&'static str],
    pub permission: &'static str,
    pub bool_flags: &'static str,
    pub string_flags: &'static str,
    pub help: &'static str,
    pub usage: &'static str,
    pub handler: Box<dyn CommandHandler>,
}

/// Registry of command specs, built once at startup and read-only after.
pub struct Registry {
    by_name: HashMap<String, Arc<CommandSpec>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry with all commands registered.
    pub fn new() -> Self {
        let mut registry = Self {
            by_name: HashMap::new(),
        };

        registry.register(CommandSpec {
            names: &["ban"],
            permission: "chatlink.ban",
            bool_flags: "jrg",
            string_flags: "t",
            help: "Bans the specified player.\n\
                   Flags:\n\
                   \x20 -r to roll back the player's changes\n\
                   \x20 -g to issue a global ban\n\
                   \x20 -t <time> for a temporary ban (suffix m/h/d)",
            usage: "[<flags>] <name> [reason here]",
            handler: Box::new(ban::BanHandler),
        });
        registry.register(CommandSpec {
            names: &["conv"],
            permission: "chatlink.conv",
            bool_flags: "",
            string_flags: "",
            help: "Starts a private conversation with a player, or closes it.",
            usage: "[<name>]",
            handler: Box::new(conv::ConvHandler),
        });
        registry.register(CommandSpec {
            names: &["me", "emote"],
            permission: "chatlink.emote",
            bool_flags: "",
            string_flags: "",
            help: "Sends an emote.",
            usage: "<stuff here>",
            handler: Box::new(chat::MeHandler),
        });
        registry.register(CommandSpec {
            names: &["opchat", "o"],
            permission: "chatlink.opchat",
            bool_flags: "",
            string_flags: "",
            help: "Sends a message to op chat.",
            usage: "<text>",
            handler: Box::new(chat::OpChatHandler),
        });
        registry.register(CommandSpec {
            names: &["staffnotice", "sn"],
            permission: "chatlink.staffnotice",
            bool_flags: "",
            string_flags: "",
            help: "Sends a notice to all staff.",
            usage: "<text>",
            handler: Box::new(chat::StaffNoticeHandler),
        });
        registry.register(CommandSpec {
            names: &["who", "list"],
            permission: "chatlink.who",
            bool_flags: "",
            string_flags: "",
            help: "Prints the player list, or details about one player.",
            usage: "[<name>]",
            handler: Box::new(who::WhoHandler),
        });

        registry
    }

    fn register(&mut self, spec: CommandSpec) {
        let spec = Arc::new(spec);
        for name in spec.names {
            self.by_name.insert(name.to_lowercase(), Arc::clone(&spec));
        }
    }

    /// Case-insensitive spec lookup.
    pub fn get(&self, name: &str) -> Option<&Arc<CommandSpec>> {
        self.by_name.get(&name.to_lowercase())
    }

    /// Dispatch one command invocation.
    ///
    /// User-visible failures come back as reply messages; internal failures
    /// are logged and produce no reply.
    pub async fn dispatch(
        &self,
        relay: &Arc<ChatRelay>,
        msg: &MessageIn,
        display_name: &str,
        name: &str,
        arg_str: &str,
    ) -> Option<MessageOut> {
        let Some(spec) = self.get(name) else {
            debug!(command = %name, "Unknown command");
            return CommandError::UnknownCommand(name.to_string()).to_reply(msg);
        };

        if !relay
            .directory
            .has_permission(msg.from.handle, spec.permission)
        {
            debug!(command = %name, sender = %msg.from.name, "Permission denied");
            return CommandError::PermissionDenied.to_reply(msg);
        }

        let tokens: Vec<String> = arg_str.split_whitespace().map(str::to_string).collect();
        let ctx = CommandContext {
            relay: Arc::clone(relay),
            msg: msg.clone(),
            display_name: display_name.to_string(),
        };

        let result = match parse_flags(spec.bool_flags, spec.string_flags, &tokens) {
            Ok((flags, args)) => spec.handler.run(&ctx, &flags, &args).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => match e.to_reply(msg) {
                None => {
                    error!(command = %name, code = e.error_code(), error = %e, "Command failed");
                    None
                }
                reply => reply,
            },
        }
    }
}

/// Build a `§5[CL]`-prefixed informational reply to the sender.
pub fn info_reply(origin: &MessageIn, text: &str) -> MessageOut {
    MessageOut::reply(
        origin,
        Contents::plain(format!("\u{a7}5[CL] \u{a7}f{}", text)),
    )
}
