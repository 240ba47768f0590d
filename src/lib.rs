//! chatlinkd - cross-server chat link daemon.
//!
//! Relays a game-server cluster's chat/event stream to a moderation and
//! command backend: inbound events are classified and formatted, privileged
//! prefixes are rewritten into commands, moderation commands run against a
//! SQLite-backed identity/ban store, and results flow back out through a
//! single FIFO delivery queue fanned out to every connected server.

pub mod commands;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod identity;
pub mod message;
pub mod queue;
pub mod relay;
pub mod transport;
