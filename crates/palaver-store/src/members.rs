//! CRUD operations for [`Member`] records.

use rusqlite::params;

use palaver_shared::types::{GroupId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::groups::parse_timestamp;
use crate::models::Member;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a member, or update their display name and admin flag if the
    /// membership already exists.
    pub fn add_member(&self, member: &Member) -> Result<()> {
        self.conn().execute(
            "INSERT INTO members (group_id, member, display_name, is_admin, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (group_id, member) DO UPDATE SET
                 display_name = excluded.display_name,
                 is_admin = excluded.is_admin",
            params![
                member.group_id.0.to_string(),
                member.member.to_hex(),
                member.display_name,
                member.is_admin as i64,
                member.joined_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch one membership record.
    pub fn get_member(&self, group_id: GroupId, member: &UserId) -> Result<Member> {
        self.conn()
            .query_row(
                "SELECT group_id, member, display_name, is_admin, joined_at
                 FROM members
                 WHERE group_id = ?1 AND member = ?2",
                params![group_id.0.to_string(), member.to_hex()],
                row_to_member,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List every member of a group, ordered by join date.
    pub fn list_members(&self, group_id: GroupId) -> Result<Vec<Member>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id, member, display_name, is_admin, joined_at
             FROM members
             WHERE group_id = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![group_id.0.to_string()], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Whether a member exists and holds the admin flag.
    pub fn is_admin(&self, group_id: GroupId, member: &UserId) -> Result<bool> {
        match self.get_member(group_id, member) {
            Ok(m) => Ok(m.is_admin),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Grant or revoke the admin flag.
    pub fn set_admin(&self, group_id: GroupId, member: &UserId, is_admin: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE members SET is_admin = ?3 WHERE group_id = ?1 AND member = ?2",
            params![group_id.0.to_string(), member.to_hex(), is_admin as i64],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove a membership.  Returns `true` if a row was deleted.
    pub fn remove_member(&self, group_id: GroupId, member: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM members WHERE group_id = ?1 AND member = ?2",
            params![group_id.0.to_string(), member.to_hex()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Member`].
fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    let group_str: String = row.get(0)?;
    let member_hex: String = row.get(1)?;
    let display_name: Option<String> = row.get(2)?;
    let is_admin: i64 = row.get(3)?;
    let joined_str: String = row.get(4)?;

    let group_id = uuid::Uuid::parse_str(&group_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let member = UserId::from_hex(&member_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Member {
        group_id: GroupId(group_id),
        member,
        display_name,
        is_admin: is_admin != 0,
        joined_at: parse_timestamp(&joined_str, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Group;
    use chrono::Utc;

    fn test_db_with_group() -> (tempfile::TempDir, Database, GroupId) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let now = Utc::now();
        let group = Group {
            id: GroupId::new(),
            name: "g".to_string(),
            creator: UserId([1u8; 32]),
            invite_token: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        db.create_group(&group).unwrap();
        (dir, db, group.id)
    }

    fn member(group_id: GroupId, byte: u8, is_admin: bool) -> Member {
        Member {
            group_id,
            member: UserId([byte; 32]),
            display_name: None,
            is_admin,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_list_remove() {
        let (_dir, db, group_id) = test_db_with_group();
        db.add_member(&member(group_id, 1, true)).unwrap();
        db.add_member(&member(group_id, 2, false)).unwrap();

        assert_eq!(db.list_members(group_id).unwrap().len(), 2);
        assert!(db.remove_member(group_id, &UserId([2u8; 32])).unwrap());
        assert_eq!(db.list_members(group_id).unwrap().len(), 1);
        assert!(!db.remove_member(group_id, &UserId([2u8; 32])).unwrap());
    }

    #[test]
    fn test_upsert_updates_admin_flag() {
        let (_dir, db, group_id) = test_db_with_group();
        db.add_member(&member(group_id, 3, false)).unwrap();
        db.add_member(&member(group_id, 3, true)).unwrap();

        assert!(db.is_admin(group_id, &UserId([3u8; 32])).unwrap());
        assert_eq!(db.list_members(group_id).unwrap().len(), 1);
    }

    #[test]
    fn test_is_admin_false_for_unknown_member() {
        let (_dir, db, group_id) = test_db_with_group();
        assert!(!db.is_admin(group_id, &UserId([9u8; 32])).unwrap());
    }

    #[test]
    fn test_set_admin_missing_member_is_not_found() {
        let (_dir, db, group_id) = test_db_with_group();
        assert!(matches!(
            db.set_admin(group_id, &UserId([9u8; 32]), true),
            Err(StoreError::NotFound)
        ));
    }
}
