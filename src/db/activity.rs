//! Address-history correlation and activity-log queries.

use super::DbError;
use sqlx::SqlitePool;

/// One activity-log entry (login/logout/etc.) for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub subject: i64,
    pub action: String,
    pub time: i64,
    pub address: Option<String>,
    pub server: Option<String>,
}

/// Repository for address_history and activity_log.
pub struct ActivityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ActivityRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Ids of other subjects sharing any recorded network address with
    /// `subject`, excluding `subject` itself.
    pub async fn shared_address_subjects(&self, subject: i64) -> Result<Vec<i64>, DbError> {
        let rows = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT DISTINCT subject FROM address_history
            WHERE address IN (SELECT address FROM address_history WHERE subject = ?)
              AND subject != ?
            "#,
        )
        .bind(subject)
        .bind(subject)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// The single most recent log entry for a subject, optionally filtered
    /// by action and/or server.
    pub async fn latest_entry(
        &self,
        subject: i64,
        action: Option<&str>,
        server: Option<&str>,
    ) -> Result<Option<LogEntry>, DbError> {
        let mut sql = String::from(
            "SELECT subject, action, time, address, server FROM activity_log WHERE subject = ?",
        );
        if action.is_some() {
            sql.push_str(" AND action = ?");
        }
        if server.is_some() {
            sql.push_str(" AND server = ?");
        }
        sql.push_str(" ORDER BY time DESC LIMIT 1");

        let mut query =
            sqlx::query_as::<_, (i64, String, i64, Option<String>, Option<String>)>(&sql)
                .bind(subject);
        if let Some(action) = action {
            query = query.bind(action);
        }
        if let Some(server) = server {
            query = query.bind(server);
        }

        let row = query.fetch_optional(self.pool).await?;

        Ok(row.map(|(subject, action, time, address, server)| LogEntry {
            subject,
            action,
            time,
            address,
            server,
        }))
    }

    /// Record an address observation for a subject.
    pub async fn record_address(&self, subject: i64, address: &str) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO address_history (subject, address) SELECT ?, ? \
             WHERE NOT EXISTS (SELECT 1 FROM address_history WHERE subject = ? AND address = ?)",
        )
        .bind(subject)
        .bind(address)
        .bind(subject)
        .bind(address)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Append an activity-log entry.
    pub async fn record_entry(&self, entry: &LogEntry) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO activity_log (subject, action, time, address, server) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.subject)
        .bind(&entry.action)
        .bind(entry.time)
        .bind(&entry.address)
        .bind(&entry.server)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LogEntry;
    use crate::db::Database;

    #[tokio::test]
    async fn shared_addresses_exclude_self() {
        let db = Database::new(":memory:").await.unwrap();
        let activity = db.activity();

        activity.record_address(1, "10.0.0.1").await.unwrap();
        activity.record_address(2, "10.0.0.1").await.unwrap();
        activity.record_address(3, "10.0.0.2").await.unwrap();

        let alts = activity.shared_address_subjects(1).await.unwrap();
        assert_eq!(alts, vec![2]);
    }

    #[tokio::test]
    async fn latest_entry_respects_filters() {
        let db = Database::new(":memory:").await.unwrap();
        let activity = db.activity();

        for (action, time, server) in [
            ("login", 100, "survival"),
            ("logout", 200, "survival"),
            ("login", 300, "creative"),
        ] {
            activity
                .record_entry(&LogEntry {
                    subject: 5,
                    action: action.into(),
                    time,
                    address: Some("10.0.0.9".into()),
                    server: Some(server.into()),
                })
                .await
                .unwrap();
        }

        let latest = activity.latest_entry(5, None, None).await.unwrap().unwrap();
        assert_eq!(latest.time, 300);

        let logout = activity
            .latest_entry(5, Some("logout"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(logout.time, 200);

        let survival = activity
            .latest_entry(5, Some("login"), Some("survival"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(survival.time, 100);

        assert!(activity
            .latest_entry(5, Some("kick"), None)
            .await
            .unwrap()
            .is_none());
    }
}
