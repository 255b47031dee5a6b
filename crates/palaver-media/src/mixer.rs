//! Client-side audio mixer for mesh calls.
//!
//! Each participant receives one stream per remote peer; the mixer buffers
//! them per sender and combines whatever is available into a single
//! playback frame with clipping prevention.

use std::collections::{HashMap, VecDeque};

use palaver_shared::types::UserId;

/// Per-peer jitter buffers feeding additive mixing.
#[derive(Default)]
pub struct MeshMixer {
    queues: HashMap<UserId, VecDeque<f32>>,
}

impl MeshMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a decoded frame from one peer.
    pub fn push_frame(&mut self, peer: &UserId, frame: &[f32]) {
        self.queues
            .entry(peer.clone())
            .or_default()
            .extend(frame.iter().copied());
    }

    /// Drop a peer's buffered audio (left the call or failed).
    pub fn remove_peer(&mut self, peer: &UserId) {
        self.queues.remove(peer);
    }

    /// Produce the next output frame of `len` samples, mixing every peer
    /// that has audio queued.  Peers with nothing buffered contribute
    /// silence rather than stalling the output.
    pub fn next_frame(&mut self, len: usize) -> Vec<f32> {
        let mut output = vec![0.0f32; len];
        let mut sources = 0usize;

        for queue in self.queues.values_mut() {
            if queue.is_empty() {
                continue;
            }
            sources += 1;
            for slot in output.iter_mut() {
                match queue.pop_front() {
                    Some(sample) => *slot += sample,
                    None => break,
                }
            }
        }

        if sources > 1 {
            // sqrt scaling keeps perceived loudness steadier than 1/n
            let scale = 1.0 / (sources as f32).sqrt();
            for sample in &mut output {
                *sample *= scale;
            }
        }

        for sample in &mut output {
            *sample = sample.clamp(-1.0, 1.0);
        }

        output
    }

    pub fn peer_count(&self) -> usize {
        self.queues.len()
    }
}
