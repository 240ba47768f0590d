//! Player directory boundary.
//!
//! Rank/permission lookup, online presence, display-name decoration, alias
//! resolution and the mute list all live in external services; this trait is
//! their seam. [`ConfigDirectory`] is the bundled implementation: ranks and
//! permissions from the config file, presence tracked from the lifecycle
//! events the relay itself observes.

use crate::config::DirectoryConfig;
use crate::error::CommandError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A resolved online player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRef {
    pub handle: Uuid,
    pub name: String,
}

/// External player-information services, specified only at this boundary.
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    /// Resolve a display name to a stable handle (alias-resolution lookup).
    async fn lookup_handle(&self, name: &str) -> Option<Uuid>;

    /// Moderation rank; higher outranks lower.
    fn rank(&self, handle: Uuid) -> u32;

    fn has_permission(&self, handle: Uuid, permission: &str) -> bool;

    /// Decorate a raw name with its rank tag for display.
    fn display_name(&self, handle: Uuid, name: &str) -> String;

    fn is_online(&self, handle: Uuid) -> bool;

    fn is_muted(&self, handle: Uuid) -> bool;

    /// Servers with at least one player online.
    fn servers(&self) -> Vec<String>;

    fn online_players(&self, server: &str) -> Vec<PlayerRef>;

    /// Presence side-channel fed by the relay's join/quit events.
    fn note_presence(&self, server: &str, player: &PlayerRef, online: bool);
}

/// Match a single online player by exact or prefix name match.
///
/// Zero matches and ambiguous matches are user-visible errors.
pub fn match_player_single(
    directory: &dyn PlayerDirectory,
    pattern: &str,
) -> Result<PlayerRef, CommandError> {
    let lowered = pattern.to_lowercase();
    let mut candidates: Vec<PlayerRef> = Vec::new();

    for server in directory.servers() {
        for player in directory.online_players(&server) {
            if candidates.iter().any(|c| c.handle == player.handle) {
                continue;
            }
            let name = player.name.to_lowercase();
            if name == lowered {
                return Ok(player);
            }
            if name.starts_with(&lowered) {
                candidates.push(player);
            }
        }
    }

    match candidates.len() {
        0 => Err(CommandError::PlayerNotFound(pattern.to_string())),
        1 => Ok(candidates.remove(0)),
        _ => Err(CommandError::MultiplePlayersFound(pattern.to_string())),
    }
}

struct StaffInfo {
    rank: u32,
    tag: Option<String>,
    permissions: HashSet<String>,
}

/// Config-backed directory implementation.
pub struct ConfigDirectory {
    default_permissions: HashSet<String>,
    staff: HashMap<Uuid, StaffInfo>,
    muted: DashMap<Uuid, ()>,
    /// handle -> (server, name) for currently online players.
    online: DashMap<Uuid, (String, String)>,
}

impl ConfigDirectory {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        let staff = config
            .staff
            .iter()
            .map(|entry| {
                (
                    entry.handle,
                    StaffInfo {
                        rank: entry.rank,
                        tag: entry.tag.clone(),
                        permissions: entry.permissions.iter().cloned().collect(),
                    },
                )
            })
            .collect();

        let muted = DashMap::new();
        for handle in &config.muted {
            muted.insert(*handle, ());
        }

        Self {
            default_permissions: config.default_permissions.iter().cloned().collect(),
            staff,
            muted,
            online: DashMap::new(),
        }
    }

    pub fn set_muted(&self, handle: Uuid, muted: bool) {
        if muted {
            self.muted.insert(handle, ());
        } else {
            self.muted.remove(&handle);
        }
    }
}

#[async_trait]
impl PlayerDirectory for ConfigDirectory {
    async fn lookup_handle(&self, name: &str) -> Option<Uuid> {
        let lowered = name.to_lowercase();
        self.online
            .iter()
            .find(|entry| entry.value().1.to_lowercase() == lowered)
            .map(|entry| *entry.key())
    }

    fn rank(&self, handle: Uuid) -> u32 {
        self.staff.get(&handle).map(|s| s.rank).unwrap_or(0)
    }

    fn has_permission(&self, handle: Uuid, permission: &str) -> bool {
        if self.default_permissions.contains(permission) {
            return true;
        }
        self.staff
            .get(&handle)
            .is_some_and(|s| s.permissions.contains(permission))
    }

    fn display_name(&self, handle: Uuid, name: &str) -> String {
        match self.staff.get(&handle).and_then(|s| s.tag.as_deref()) {
            Some(tag) => format!("{}{}", tag, name),
            None => name.to_string(),
        }
    }

    fn is_online(&self, handle: Uuid) -> bool {
        self.online.contains_key(&handle)
    }

    fn is_muted(&self, handle: Uuid) -> bool {
        self.muted.contains_key(&handle)
    }

    fn servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = self
            .online
            .iter()
            .map(|entry| entry.value().0.clone())
            .collect();
        servers.sort();
        servers.dedup();
        servers
    }

    fn online_players(&self, server: &str) -> Vec<PlayerRef> {
        self.online
            .iter()
            .filter(|entry| entry.value().0 == server)
            .map(|entry| PlayerRef {
                handle: *entry.key(),
                name: entry.value().1.clone(),
            })
            .collect()
    }

    fn note_presence(&self, server: &str, player: &PlayerRef, online: bool) {
        if online {
            self.online
                .insert(player.handle, (server.to_string(), player.name.clone()));
        } else {
            self.online.remove(&player.handle);
        }
    }
}
