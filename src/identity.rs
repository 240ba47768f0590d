//! Identity and ban resolution cache.
//!
//! Resolves mutable display names / stable handles to durable store ids and
//! caches ban status in front of the relational store. Ban entries are valid
//! only within a fixed age window and the cache is size-capped, so an entry
//! may be absent at any moment; absence always triggers a synchronous
//! re-fetch.
//!
//! Failure asymmetry (deliberate, do not unify):
//! - identity resolution fails open: a store error resolves to "no identity"
//! - ban lookup fails closed: a store error resolves to a synthetic
//!   [`BanKind::Invalid`] ban

use crate::db::{BanRow, Database, DbError, LogEntry};
use crate::directory::PlayerDirectory;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Validity window for a cached ban.
pub const BAN_MAX_AGE: Duration = Duration::from_secs(60);

/// Cap on cached ban entries; the oldest retrieval is evicted first.
const BAN_CACHE_CAP: usize = 4096;

/// A durable player identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub id: i64,
    pub handle: Uuid,
    pub name: String,
}

/// Ban kinds. `Invalid` is only ever synthesized on store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanKind {
    Local,
    Global,
    Temporary,
    Invalid,
}

impl BanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanKind::Local => "local",
            BanKind::Global => "global",
            BanKind::Temporary => "temporary",
            BanKind::Invalid => "invalid",
        }
    }

    /// Unknown stored kinds decode as `Invalid` rather than failing the
    /// lookup.
    pub fn parse(s: &str) -> Self {
        match s {
            "local" => BanKind::Local,
            "global" => BanKind::Global,
            "temporary" => BanKind::Temporary,
            _ => BanKind::Invalid,
        }
    }
}

/// An active ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    pub subject: i64,
    pub issuer: i64,
    pub reason: String,
    pub kind: BanKind,
    /// Issue time, unix seconds. Distinct from the cache retrieval time.
    pub time: i64,
}

impl Ban {
    fn from_row(row: BanRow) -> Self {
        Self {
            subject: row.subject,
            issuer: row.issuer,
            reason: row.reason,
            kind: BanKind::parse(&row.kind),
            time: row.time,
        }
    }

    fn to_row(&self) -> BanRow {
        BanRow {
            subject: self.subject,
            reason: self.reason.clone(),
            issuer: self.issuer,
            kind: self.kind.as_str().to_string(),
            time: self.time,
        }
    }
}

#[derive(Clone)]
struct CachedBan {
    ban: Ban,
    retrieved_at: Instant,
}

/// In-process cache over the identities/bans tables.
pub struct IdentityCache {
    db: Database,
    directory: Arc<dyn PlayerDirectory>,
    ids: DashMap<Uuid, i64>,
    players: DashMap<i64, PlayerIdentity>,
    bans: DashMap<i64, CachedBan>,
    ban_max_age: Duration,
}

impl IdentityCache {
    pub fn new(db: Database, directory: Arc<dyn PlayerDirectory>) -> Self {
        Self {
            db,
            directory,
            ids: DashMap::new(),
            players: DashMap::new(),
            bans: DashMap::new(),
            ban_max_age: BAN_MAX_AGE,
        }
    }

    /// Test hook: shrink the ban validity window.
    #[cfg(test)]
    pub fn with_ban_max_age(mut self, age: Duration) -> Self {
        self.ban_max_age = age;
        self
    }

    /// Deterministic synthetic handle for bracketed "special" names.
    pub fn synthetic_handle(name: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("SPECIAL:{}", name).as_bytes())
    }

    /// Resolve a handle and/or name to a durable id.
    ///
    /// At least one of `handle`/`name` must be supplied. A cache hit by
    /// handle returns immediately; on a store fetch, a differing supplied
    /// name updates the stored name but never the id. Store failure
    /// resolves to `None` (fail-open).
    pub async fn resolve_id(
        &self,
        handle: Option<Uuid>,
        name: Option<&str>,
        create_if_missing: bool,
    ) -> Option<i64> {
        if handle.is_none() && name.is_none() {
            warn!("resolve_id called without handle or name");
            return None;
        }

        let mut handle = handle;
        if let Some(name) = name {
            if name.starts_with('[') {
                handle = Some(Self::synthetic_handle(name));
            }
        }
        if handle.is_none() {
            if let Some(name) = name {
                handle = self.directory.lookup_handle(name).await;
            }
        }

        if let Some(h) = handle {
            if let Some(id) = self.ids.get(&h) {
                return Some(*id);
            }
        }

        let repo = self.db.identities();
        let lookup = match (handle, name) {
            (Some(h), _) => repo.by_handle(h).await,
            (None, Some(n)) => repo.by_name(n).await,
            (None, None) => return None,
        };

        match lookup {
            Ok(Some(mut row)) => {
                if let Some(name) = name {
                    if row.name != name {
                        debug!(id = row.id, old = %row.name, new = %name, "Rename detected");
                        if let Err(e) = repo.rename(row.handle, name).await {
                            warn!(error = %e, id = row.id, "Failed to persist rename");
                        } else {
                            row.name = name.to_string();
                        }
                    }
                }
                self.cache_identity(row.id, row.handle, row.name);
                Some(row.id)
            }
            Ok(None) if create_if_missing => {
                let Some(h) = handle else {
                    error!(name = ?name, "Cannot create identity without a handle");
                    return None;
                };
                let Some(name) = name else {
                    error!(handle = %h, "Cannot create identity without a name");
                    return None;
                };
                match repo.insert(h, name).await {
                    Ok(id) => {
                        self.cache_identity(id, h, name.to_string());
                        Some(id)
                    }
                    Err(e) => {
                        warn!(error = %e, handle = %h, "Identity insert failed; treating as unresolved");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Identity lookup failed; treating as unresolved");
                None
            }
        }
    }

    /// Look up the identity behind a store id.
    pub async fn identity_by_id(&self, id: i64) -> Option<PlayerIdentity> {
        if let Some(identity) = self.players.get(&id) {
            return Some(identity.clone());
        }
        match self.db.identities().by_id(id).await {
            Ok(Some(row)) => {
                self.cache_identity(row.id, row.handle, row.name.clone());
                Some(PlayerIdentity {
                    id: row.id,
                    handle: row.handle,
                    name: row.name,
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, id, "Identity-by-id lookup failed");
                None
            }
        }
    }

    /// Ban status for a subject.
    ///
    /// A cached entry counts only while younger than the validity window.
    /// Store failure yields a synthetic `Invalid` ban (fail-closed).
    pub async fn get_ban(&self, subject: i64) -> Option<Ban> {
        if let Some(cached) = self.bans.get(&subject) {
            if cached.retrieved_at.elapsed() < self.ban_max_age {
                return Some(cached.ban.clone());
            }
        }
        self.bans.remove(&subject);

        match self.db.bans().get(subject).await {
            Ok(Some(row)) => {
                let ban = Ban::from_row(row);
                self.cache_ban(subject, ban.clone());
                Some(ban)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, subject, "Ban lookup failed; treating subject as banned");
                Some(Ban {
                    subject,
                    issuer: 0,
                    reason: "Database failure".to_string(),
                    kind: BanKind::Invalid,
                    time: 0,
                })
            }
        }
    }

    /// Persist a ban, replacing any existing ban for the same subject, and
    /// refresh the cache entry.
    pub async fn add_ban(&self, ban: Ban) -> Result<(), DbError> {
        let repo = self.db.bans();
        repo.delete(ban.subject).await?;
        repo.insert(&ban.to_row()).await?;
        self.cache_ban(ban.subject, ban);
        Ok(())
    }

    /// Delete a subject's ban from store and cache.
    pub async fn delete_ban(&self, subject: i64) -> Result<bool, DbError> {
        let removed = self.db.bans().delete(subject).await?;
        self.bans.remove(&subject);
        Ok(removed)
    }

    /// Identities sharing a recorded network address with `subject`.
    pub async fn possible_alts(&self, subject: i64) -> Vec<PlayerIdentity> {
        let ids = match self.db.activity().shared_address_subjects(subject).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, subject, "Alt correlation query failed");
                return Vec::new();
            }
        };

        let mut alts = Vec::with_capacity(ids.len());
        for id in ids {
            match self.identity_by_id(id).await {
                Some(identity) => alts.push(identity),
                None => warn!(id, "Alt correlation referenced unknown identity"),
            }
        }
        alts
    }

    /// Advisory one-line alt summary, color-coding each alt by its current
    /// ban status (`§c` banned, `§a` clear). `None` when no alts exist.
    pub async fn alts_summary(&self, name: &str, subject: i64) -> Option<String> {
        let alts = self.possible_alts(subject).await;
        if alts.is_empty() {
            return None;
        }

        let mut list = String::new();
        let mut has_bans = false;
        for (i, alt) in alts.iter().enumerate() {
            if i > 0 {
                list.push_str(", ");
            }
            if self.get_ban(alt.id).await.is_some() {
                has_bans = true;
                list.push_str("\u{a7}c");
            } else {
                list.push_str("\u{a7}a");
            }
            list.push_str(&alt.name);
        }

        Some(if has_bans {
            format!("{} has some banned possible alts: {}", name, list)
        } else {
            format!("Possible alts of {}: {}", name, list)
        })
    }

    /// Most recent activity-log entry, optionally filtered.
    pub async fn latest_log_entry(
        &self,
        subject: i64,
        action: Option<&str>,
        server: Option<&str>,
    ) -> Option<LogEntry> {
        match self.db.activity().latest_entry(subject, action, server).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, subject, "Activity-log lookup failed");
                None
            }
        }
    }

    fn cache_identity(&self, id: i64, handle: Uuid, name: String) {
        self.ids.insert(handle, id);
        self.players.insert(id, PlayerIdentity { id, handle, name });
    }

    fn cache_ban(&self, subject: i64, ban: Ban) {
        if self.bans.len() >= BAN_CACHE_CAP && !self.bans.contains_key(&subject) {
            let oldest = self
                .bans
                .iter()
                .min_by_key(|entry| entry.value().retrieved_at)
                .map(|entry| *entry.key());
            if let Some(key) = oldest {
                self.bans.remove(&key);
            }
        }
        self.bans.insert(
            subject,
            CachedBan {
                ban,
                retrieved_at: Instant::now(),
            },
        );
    }

    /// Drop a cached ban entry. Models the original cache's right to shed
    /// entries under memory pressure at any time.
    #[cfg(test)]
    pub fn evict_ban(&self, subject: i64) {
        self.bans.remove(&subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use crate::directory::ConfigDirectory;

    fn directory() -> Arc<dyn PlayerDirectory> {
        Arc::new(ConfigDirectory::from_config(&DirectoryConfig::default()))
    }

    async fn cache() -> IdentityCache {
        let db = Database::new(":memory:").await.unwrap();
        IdentityCache::new(db, directory())
    }

    fn ban(subject: i64, kind: BanKind) -> Ban {
        Ban {
            subject,
            issuer: 1,
            reason: "test".into(),
            kind,
            time: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn resolve_is_idempotent_per_handle() {
        let cache = cache().await;
        let handle = Uuid::new_v4();

        let id = cache.resolve_id(Some(handle), Some("Foxy"), true).await.unwrap();
        let again = cache.resolve_id(Some(handle), Some("Foxy"), false).await.unwrap();
        assert_eq!(id, again);

        // A cache hit by handle returns as-is; rename detection runs when
        // the row comes from the store, keeping the id and rewriting the
        // stored name.
        let fresh = IdentityCache::new(cache.db.clone(), directory());
        let renamed = fresh.resolve_id(Some(handle), Some("FoxyTwo"), false).await;
        assert_eq!(renamed, Some(id));
        let row = fresh.db.identities().by_handle(handle).await.unwrap().unwrap();
        assert_eq!(row.name, "FoxyTwo");
    }

    #[tokio::test]
    async fn resolve_by_name_finds_existing_row() {
        let cache = cache().await;
        let handle = Uuid::new_v4();
        let id = cache.resolve_id(Some(handle), Some("Solo"), true).await.unwrap();

        // Lookup with the name only: no cached handle, no directory entry,
        // so the store's name index must answer.
        let found = cache.resolve_id(None, Some("Solo"), false).await;
        assert_eq!(found, Some(id));
    }

    #[tokio::test]
    async fn bracketed_names_get_synthetic_handles() {
        let cache = cache().await;
        let id = cache.resolve_id(None, Some("[Server]"), true).await.unwrap();
        let again = cache.resolve_id(None, Some("[Server]"), false).await;
        assert_eq!(again, Some(id));
        assert_eq!(
            IdentityCache::synthetic_handle("[Server]"),
            IdentityCache::synthetic_handle("[Server]")
        );
    }

    #[tokio::test]
    async fn unknown_without_create_is_unresolved() {
        let cache = cache().await;
        assert!(cache.resolve_id(Some(Uuid::new_v4()), Some("Ghost"), false).await.is_none());
        assert!(cache.resolve_id(None, Some("Ghost"), false).await.is_none());
    }

    #[tokio::test]
    async fn ban_roundtrip_and_replacement() {
        let cache = cache().await;
        cache.add_ban(ban(9, BanKind::Local)).await.unwrap();
        assert_eq!(cache.get_ban(9).await.unwrap().kind, BanKind::Local);

        // Re-banning replaces the previous row.
        cache.add_ban(ban(9, BanKind::Global)).await.unwrap();
        assert_eq!(cache.get_ban(9).await.unwrap().kind, BanKind::Global);

        assert!(cache.delete_ban(9).await.unwrap());
        assert!(cache.get_ban(9).await.is_none());
    }

    #[tokio::test]
    async fn expired_cache_entry_forces_refetch() {
        let db = Database::new(":memory:").await.unwrap();
        let cache = IdentityCache::new(db, directory()).with_ban_max_age(Duration::ZERO);

        cache.add_ban(ban(3, BanKind::Local)).await.unwrap();
        // Entry is instantly stale; the row is gone from the store, so the
        // forced re-fetch must see no ban despite the cache insert above.
        cache.db.bans().delete(3).await.unwrap();
        assert!(cache.get_ban(3).await.is_none());
    }

    #[tokio::test]
    async fn eviction_is_transparent() {
        let cache = cache().await;
        cache.add_ban(ban(4, BanKind::Local)).await.unwrap();
        cache.evict_ban(4);
        // Absent entry within the TTL window still re-fetches from store.
        assert_eq!(cache.get_ban(4).await.unwrap().kind, BanKind::Local);
    }

    #[tokio::test]
    async fn store_failure_is_fail_closed_for_bans_and_fail_open_for_identities() {
        let db = Database::new(":memory:").await.unwrap();
        sqlx::query("DROP TABLE bans").execute(db.pool()).await.unwrap();
        sqlx::query("DROP TABLE identities").execute(db.pool()).await.unwrap();
        let cache = IdentityCache::new(db, directory());

        let ban = cache.get_ban(1).await.unwrap();
        assert_eq!(ban.kind, BanKind::Invalid);
        assert_eq!(ban.reason, "Database failure");

        assert!(cache.resolve_id(Some(Uuid::new_v4()), Some("Foxy"), true).await.is_none());
    }

    #[tokio::test]
    async fn alts_summary_colors_by_ban_status() {
        let cache = cache().await;
        let a = cache.resolve_id(Some(Uuid::new_v4()), Some("Main"), true).await.unwrap();
        let b = cache.resolve_id(Some(Uuid::new_v4()), Some("AltOne"), true).await.unwrap();

        let activity = cache.db.activity();
        activity.record_address(a, "10.1.1.1").await.unwrap();
        activity.record_address(b, "10.1.1.1").await.unwrap();

        let summary = cache.alts_summary("Main", a).await.unwrap();
        assert!(summary.starts_with("Possible alts of Main:"));
        assert!(summary.contains("\u{a7}aAltOne"));

        cache.add_ban(ban(b, BanKind::Local)).await.unwrap();
        let summary = cache.alts_summary("Main", a).await.unwrap();
        assert!(summary.contains("banned possible alts"));
        assert!(summary.contains("\u{a7}cAltOne"));

        assert!(cache.alts_summary("Loner", 999).await.is_none());
    }
}
