//! Domain model structs persisted in the local database.

use chrono::{DateTime, Utc};

use palaver_shared::types::{GroupId, UserId};

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A group the local user belongs to (or used to belong to).
///
/// Leaving a group clears `is_active` instead of deleting the row, so
/// history and membership stay queryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Unique group identifier.
    pub id: GroupId,
    /// Human-readable group name.
    pub name: String,
    /// Identity of the member who created the group.
    pub creator: UserId,
    /// Outstanding signed invite token, if one was minted.
    pub invite_token: Option<String>,
    /// Cleared when the local user leaves the group.
    pub is_active: bool,
    /// When the group was created.
    pub created_at: DateTime<Utc>,
    /// Last membership or key change.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// One member of a group.  `(group_id, member)` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// The group this membership belongs to.
    pub group_id: GroupId,
    /// Member identity.
    pub member: UserId,
    /// Optional human-readable display name.
    pub display_name: Option<String>,
    /// Admins may remove members and mint invites.
    pub is_admin: bool,
    /// When the member joined.
    pub joined_at: DateTime<Utc>,
}
