//! Ban row operations.
//!
//! The table holds at most one ban per subject; issuing a new one replaces
//! the old row (delete-then-insert, as the moderation backend expects).

use super::DbError;
use sqlx::SqlitePool;

/// A ban row as stored. `kind` is the serialized [`crate::identity::BanKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRow {
    pub subject: i64,
    pub reason: String,
    pub issuer: i64,
    pub kind: String,
    pub time: i64,
}

/// Repository for the bans table.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the active ban for a subject, if any.
    pub async fn get(&self, subject: i64) -> Result<Option<BanRow>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, i64, String, i64)>(
            "SELECT subject, reason, issuer, kind, time FROM bans WHERE subject = ?",
        )
        .bind(subject)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(subject, reason, issuer, kind, time)| BanRow {
            subject,
            reason,
            issuer,
            kind,
            time,
        }))
    }

    /// Insert a ban row. Callers delete any existing ban first.
    pub async fn insert(&self, ban: &BanRow) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO bans (subject, reason, issuer, kind, time) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ban.subject)
        .bind(&ban.reason)
        .bind(ban.issuer)
        .bind(&ban.kind)
        .bind(ban.time)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Delete the ban for a subject. Returns whether a row was removed.
    pub async fn delete(&self, subject: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM bans WHERE subject = ?")
            .bind(subject)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
