//! Identity row operations: lookup by handle or name, insert with a
//! generated id, rename tracking.

use super::DbError;
use sqlx::SqlitePool;
use uuid::Uuid;

/// A durable identity row. The id is assigned exactly once per handle and
/// never changes; the name follows the player's current display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRow {
    pub id: i64,
    pub handle: Uuid,
    pub name: String,
}

/// Repository for the identities table.
pub struct IdentityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> IdentityRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up an identity by stable handle.
    pub async fn by_handle(&self, handle: Uuid) -> Result<Option<IdentityRow>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, handle, name FROM identities WHERE handle = ?",
        )
        .bind(handle.to_string())
        .fetch_optional(self.pool)
        .await?;

        row.map(decode_row).transpose()
    }

    /// Look up an identity by current display name.
    pub async fn by_name(&self, name: &str) -> Result<Option<IdentityRow>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, handle, name FROM identities WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        row.map(decode_row).transpose()
    }

    /// Look up an identity by store-assigned id.
    pub async fn by_id(&self, id: i64) -> Result<Option<IdentityRow>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, handle, name FROM identities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(decode_row).transpose()
    }

    /// Insert a new identity and return its generated id.
    pub async fn insert(&self, handle: Uuid, name: &str) -> Result<i64, DbError> {
        let result = sqlx::query("INSERT INTO identities (handle, name) VALUES (?, ?)")
            .bind(handle.to_string())
            .bind(name)
            .execute(self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Rewrite the stored display name for a handle (rename detection).
    pub async fn rename(&self, handle: Uuid, name: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE identities SET name = ? WHERE handle = ?")
            .bind(name)
            .bind(handle.to_string())
            .execute(self.pool)
            .await?;

        Ok(())
    }
}

fn decode_row((id, handle, name): (i64, String, String)) -> Result<IdentityRow, DbError> {
    let handle = Uuid::parse_str(&handle)
        .map_err(|e| DbError::Corrupt(format!("identity {} has bad handle: {}", id, e)))?;
    Ok(IdentityRow { id, handle, name })
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use uuid::Uuid;

    #[tokio::test]
    async fn insert_lookup_rename() {
        let db = Database::new(":memory:").await.unwrap();
        let handle = Uuid::new_v4();

        let id = db.identities().insert(handle, "Foxy").await.unwrap();
        assert!(id > 0);

        let row = db.identities().by_handle(handle).await.unwrap().unwrap();
        assert_eq!(row.name, "Foxy");

        db.identities().rename(handle, "FoxyNew").await.unwrap();
        let row = db.identities().by_name("FoxyNew").await.unwrap().unwrap();
        assert_eq!(row.id, id);
        assert!(db.identities().by_name("Foxy").await.unwrap().is_none());
    }
}
