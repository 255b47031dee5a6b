//! Mesh bandwidth estimation.
//!
//! Every participant carries `n - 1` audio streams in each direction at a
//! fixed per-stream rate, so mesh cost grows linearly per client and
//! quadratically for the group.  The soft limit only warns; the hard limit
//! is enforced by the coordinator before any negotiation starts.

use serde::Serialize;

use palaver_shared::constants::{AUDIO_STREAM_KBPS, CALL_HARD_LIMIT, CALL_SOFT_LIMIT};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BandwidthEstimate {
    pub upload_kbps: u32,
    pub download_kbps: u32,
    pub total_kbps: u32,
    pub warning: bool,
    pub message: String,
}

/// Estimate the local bandwidth cost of a mesh call with
/// `participant_count` participants (including ourselves).
pub fn estimate(participant_count: usize) -> BandwidthEstimate {
    let streams = participant_count.saturating_sub(1) as u32;
    let upload_kbps = streams * AUDIO_STREAM_KBPS;
    let download_kbps = streams * AUDIO_STREAM_KBPS;
    let total_kbps = upload_kbps + download_kbps;
    let warning = participant_count > CALL_SOFT_LIMIT;

    let message = if participant_count > CALL_HARD_LIMIT {
        format!(
            "{participant_count} participants exceeds the mesh limit of {CALL_HARD_LIMIT}"
        )
    } else if warning {
        format!(
            "{participant_count} participants: expect ~{total_kbps} kbps; \
             audio quality may degrade beyond {CALL_SOFT_LIMIT}"
        )
    } else {
        format!("{participant_count} participants: ~{total_kbps} kbps")
    };

    BandwidthEstimate {
        upload_kbps,
        download_kbps,
        total_kbps,
        warning,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_participant_is_free() {
        let est = estimate(1);
        assert_eq!(est.upload_kbps, 0);
        assert_eq!(est.download_kbps, 0);
        assert!(!est.warning);
    }

    #[test]
    fn test_linear_per_stream_cost() {
        let est = estimate(3);
        assert_eq!(est.upload_kbps, 2 * AUDIO_STREAM_KBPS);
        assert_eq!(est.download_kbps, 2 * AUDIO_STREAM_KBPS);
        assert_eq!(est.total_kbps, 4 * AUDIO_STREAM_KBPS);
    }

    #[test]
    fn test_warning_threshold() {
        assert!(!estimate(4).warning);
        assert!(estimate(5).warning);
    }

    #[test]
    fn test_over_hard_limit_message() {
        let est = estimate(9);
        assert!(est.warning);
        assert!(est.message.contains("exceeds"));
    }
}
