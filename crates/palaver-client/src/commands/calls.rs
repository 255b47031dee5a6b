//! Voice call commands: thin delegation to the mesh coordinator plus the
//! bandwidth policy.

use tracing::{info, warn};

use palaver_media::bandwidth::{self, BandwidthEstimate};
use palaver_shared::types::{CallId, GroupId};

use crate::engine::Engine;
use crate::error::Result;
use crate::events::EngineEvent;

impl Engine {
    /// Start a call with every current group member.
    ///
    /// The mesh coordinator enforces the hard participant limit before any
    /// connection attempt; here we additionally surface the soft-limit
    /// bandwidth warning.
    pub async fn start_call(&self, group_id: GroupId) -> Result<CallId> {
        let peers = self.remote_members(group_id)?;
        self.warn_if_strained(peers.len() + 1).await;

        let call_id = self.mesh.start_call(group_id, peers).await?;
        info!(group = %group_id, call = %call_id, "Call started");
        Ok(call_id)
    }

    /// Join a call another member announced.
    pub async fn join_call(&self, group_id: GroupId, call_id: CallId) -> Result<()> {
        let peers = self.remote_members(group_id)?;
        self.warn_if_strained(peers.len() + 1).await;

        self.mesh.join_call(group_id, call_id, peers).await?;
        info!(group = %group_id, call = %call_id, "Joined call");
        Ok(())
    }

    pub async fn leave_call(&self, call_id: CallId) -> Result<()> {
        self.mesh.leave_call(call_id).await?;
        Ok(())
    }

    pub async fn set_mute(&self, call_id: CallId, muted: bool) -> Result<()> {
        self.mesh.set_mute(call_id, muted).await?;
        Ok(())
    }

    /// The media stack finished gathering candidates for this call.
    pub async fn local_description_ready(&self, call_id: CallId, sdp: String) -> Result<()> {
        self.mesh.gathering_complete(call_id, sdp).await?;
        Ok(())
    }

    /// Estimate the bandwidth cost of calling this group right now.
    pub fn bandwidth_estimate(&self, group_id: GroupId) -> Result<BandwidthEstimate> {
        let members = self.db()?.list_members(group_id)?;
        Ok(bandwidth::estimate(members.len()))
    }

    async fn warn_if_strained(&self, participant_count: usize) {
        let estimate = bandwidth::estimate(participant_count);
        if estimate.warning {
            warn!(participants = participant_count, "{}", estimate.message);
            self.emit(EngineEvent::BandwidthWarning(estimate)).await;
        }
    }
}
