//! CRUD operations for [`Group`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use palaver_shared::types::{GroupId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Group;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new group.
    pub fn create_group(&self, group: &Group) -> Result<()> {
        self.conn().execute(
            "INSERT INTO groups (id, name, creator, invite_token, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                group.id.0.to_string(),
                group.name,
                group.creator.to_hex(),
                group.invite_token,
                group.is_active as i64,
                group.created_at.to_rfc3339(),
                group.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single group by id.
    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, creator, invite_token, is_active, created_at, updated_at
                 FROM groups
                 WHERE id = ?1",
                params![id.0.to_string()],
                row_to_group,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all active groups, ordered by creation date descending.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, creator, invite_token, is_active, created_at, updated_at
             FROM groups
             WHERE is_active = 1
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record or clear the group's outstanding invite token.
    pub fn set_invite_token(&self, id: GroupId, token: Option<&str>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE groups SET invite_token = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.0.to_string(), token, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Soft delete: mark the group inactive.  The row is never removed.
    pub fn deactivate_group(&self, id: GroupId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE groups SET is_active = 0, updated_at = ?2 WHERE id = ?1",
            params![id.0.to_string(), Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Bump the group's `updated_at` (membership or key change).
    pub fn touch_group(&self, id: GroupId) -> Result<()> {
        self.conn().execute(
            "UPDATE groups SET updated_at = ?2 WHERE id = ?1",
            params![id.0.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Group`].
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let creator_hex: String = row.get(2)?;
    let invite_token: Option<String> = row.get(3)?;
    let is_active: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let creator = UserId::from_hex(&creator_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at = parse_timestamp(&created_str, 5)?;
    let updated_at = parse_timestamp(&updated_str, 6)?;

    Ok(Group {
        id: GroupId(id),
        name,
        creator,
        invite_token,
        is_active: is_active != 0,
        created_at,
        updated_at,
    })
}

pub(crate) fn parse_timestamp(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn sample_group() -> Group {
        let now = Utc::now();
        Group {
            id: GroupId::new(),
            name: "reading club".to_string(),
            creator: UserId([7u8; 32]),
            invite_token: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_create_and_get_group() {
        let (_dir, db) = test_db();
        let group = sample_group();
        db.create_group(&group).unwrap();

        let loaded = db.get_group(group.id).unwrap();
        assert_eq!(loaded.name, group.name);
        assert_eq!(loaded.creator, group.creator);
        assert!(loaded.is_active);
    }

    #[test]
    fn test_get_missing_group_is_not_found() {
        let (_dir, db) = test_db();
        assert!(matches!(
            db.get_group(GroupId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_deactivate_hides_from_listing_but_keeps_row() {
        let (_dir, db) = test_db();
        let group = sample_group();
        db.create_group(&group).unwrap();

        db.deactivate_group(group.id).unwrap();

        assert!(db.list_groups().unwrap().is_empty());
        let loaded = db.get_group(group.id).unwrap();
        assert!(!loaded.is_active);
    }

    #[test]
    fn test_invite_token_round_trip() {
        let (_dir, db) = test_db();
        let group = sample_group();
        db.create_group(&group).unwrap();

        db.set_invite_token(group.id, Some("token-abc")).unwrap();
        assert_eq!(
            db.get_group(group.id).unwrap().invite_token.as_deref(),
            Some("token-abc")
        );

        db.set_invite_token(group.id, None).unwrap();
        assert!(db.get_group(group.id).unwrap().invite_token.is_none());
    }
}
