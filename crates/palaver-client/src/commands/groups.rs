//! Group lifecycle and membership administration.
//!
//! Admin gating lives here: only admins remove members or mint invites,
//! and the creator can never be removed.  Removing a member rotates the
//! local sender key and redistributes it to everyone remaining, so the
//! removed member's chain ends at the rotation boundary.

use chrono::Utc;
use tracing::{info, warn};

use palaver_group::KeyDistributionManager;
use palaver_shared::invite::InviteToken;
use palaver_shared::types::{GroupId, UserId};
use palaver_store::{Group, Member};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;

impl Engine {
    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a new group with ourselves as creator and sole admin.
    pub async fn create_group(&self, name: &str) -> Result<GroupId> {
        let group_id = GroupId::new();
        let now = Utc::now();
        let local = self.local_user();

        {
            let db = self.db()?;
            db.create_group(&Group {
                id: group_id,
                name: name.to_string(),
                creator: local.clone(),
                invite_token: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            })?;
            db.add_member(&Member {
                group_id,
                member: local,
                display_name: None,
                is_admin: true,
                joined_at: now,
            })?;
        }

        self.keys.create_group_key(group_id).await;
        self.persist_group_keys(group_id).await?;

        info!(group = %group_id, name, "Created group");
        self.emit(EngineEvent::GroupJoined {
            group_id,
            name: name.to_string(),
        })
        .await;
        Ok(group_id)
    }

    /// Mint a signed, expiring invite token.  Admin only.
    pub async fn create_invite(&self, group_id: GroupId) -> Result<String> {
        self.ensure_admin(group_id)?;
        let group = self.db()?.get_group(group_id)?;

        let token = InviteToken::create(self.identity(), group_id, group.name).encode();
        self.db()?.set_invite_token(group_id, Some(&token))?;

        info!(group = %group_id, "Created invite");
        Ok(token)
    }

    /// Join a group from an invite token.
    ///
    /// The token is verified against the inviter's signature and expiry,
    /// then our fresh sender key goes to the inviter over the pairwise
    /// channel.  The token grants membership only; reading messages still
    /// requires each sender's key distribution.
    pub async fn join_group(&self, code: &str) -> Result<GroupId> {
        let token = InviteToken::decode(code)?;
        token.verify()?;

        let group_id = token.payload.group_id;
        let inviter = UserId(token.payload.inviter_pubkey);
        let now = Utc::now();

        {
            let db = self.db()?;
            db.create_group(&Group {
                id: group_id,
                name: token.payload.group_name.clone(),
                creator: inviter.clone(),
                invite_token: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            })?;
            db.add_member(&Member {
                group_id,
                member: inviter.clone(),
                display_name: None,
                is_admin: true,
                joined_at: now,
            })?;
            db.add_member(&Member {
                group_id,
                member: self.local_user(),
                display_name: None,
                is_admin: false,
                joined_at: now,
            })?;
        }

        let dist = self.keys.create_group_key(group_id).await;
        self.persist_group_keys(group_id).await?;

        let deliveries = KeyDistributionManager::deliveries(&dist, &[inviter])?;
        self.distribute_keys(&deliveries).await?;

        info!(group = %group_id, "Joined group");
        self.emit(EngineEvent::GroupJoined {
            group_id,
            name: token.payload.group_name,
        })
        .await;
        Ok(group_id)
    }

    /// Leave a group locally: soft delete the row and drop all key state.
    pub async fn leave_group(&self, group_id: GroupId) -> Result<()> {
        {
            let db = self.db()?;
            db.deactivate_group(group_id)?;
            db.delete_group_keys(group_id)?;
        }
        self.keys.remove_group(group_id).await;

        info!(group = %group_id, "Left group");
        self.emit(EngineEvent::GroupLeft { group_id }).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add a member and send them our current sender key.  Admin only.
    pub async fn add_member(
        &self,
        group_id: GroupId,
        member: UserId,
        display_name: Option<String>,
    ) -> Result<()> {
        self.ensure_admin(group_id)?;

        {
            let db = self.db()?;
            db.add_member(&Member {
                group_id,
                member: member.clone(),
                display_name,
                is_admin: false,
                joined_at: Utc::now(),
            })?;
            db.touch_group(group_id)?;
        }

        let dist = self.keys.distribution_for(group_id).await?;
        let deliveries = KeyDistributionManager::deliveries(&dist, &[member.clone()])?;
        self.distribute_keys(&deliveries).await?;

        info!(group = %group_id, member = %member.short(), "Added member");
        self.emit(EngineEvent::MemberAdded { group_id, member }).await;
        Ok(())
    }

    /// Remove a member, rotate the sender key, and redistribute it to
    /// everyone remaining.  Admin only; the creator is never removable.
    ///
    /// The rotation always stands: if some remaining member did not
    /// confirm delivery of the new key, the membership change and rotation
    /// are already persisted and the failure is surfaced last.
    pub async fn remove_member(&self, group_id: GroupId, member: UserId) -> Result<()> {
        self.ensure_admin(group_id)?;

        let group = self.db()?.get_group(group_id)?;
        if member == group.creator {
            return Err(EngineError::CreatorImmutable);
        }

        let removed = self.db()?.remove_member(group_id, &member)?;
        if !removed {
            return Err(EngineError::NotAMember {
                group_id,
                member,
            });
        }
        self.db()?.delete_receiver_state(group_id, &member)?;
        self.keys.remove_receiver(group_id, &member).await?;

        // Forward secrecy boundary: the removed member's chain stops here.
        let dist = self.keys.rotate(group_id).await?;
        self.persist_group_keys(group_id).await?;
        self.db()?.touch_group(group_id)?;

        info!(group = %group_id, member = %member.short(), "Removed member, key rotated");
        self.emit(EngineEvent::MemberRemoved {
            group_id,
            member: member.clone(),
        })
        .await;
        self.emit(EngineEvent::KeyRotated { group_id }).await;

        let recipients = self.remote_members(group_id)?;
        let deliveries = KeyDistributionManager::deliveries(&dist, &recipients)?;
        if let Err(e) = self.distribute_keys(&deliveries).await {
            warn!(group = %group_id, error = %e, "Rotated key not confirmed everywhere");
            return Err(e);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.db()?.list_groups()?)
    }

    pub fn list_members(&self, group_id: GroupId) -> Result<Vec<Member>> {
        Ok(self.db()?.list_members(group_id)?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    pub(crate) fn ensure_admin(&self, group_id: GroupId) -> Result<()> {
        let local = self.local_user();
        if !self.db()?.is_admin(group_id, &local)? {
            return Err(EngineError::NotAdmin(local));
        }
        Ok(())
    }

    /// Every member of the group except ourselves.
    pub(crate) fn remote_members(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        let local = self.local_user();
        Ok(self
            .db()?
            .list_members(group_id)?
            .into_iter()
            .map(|m| m.member)
            .filter(|m| *m != local)
            .collect())
    }
}
