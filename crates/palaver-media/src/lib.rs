//! # palaver-media
//!
//! Mesh-topology group calls.
//!
//! Every participant keeps a direct connection to every other participant
//! (N-1 connections each); there is no media server.  The
//! [`MeshCoordinator`] drives the call lifecycle state machine, decides per
//! peer pair who initiates (deterministic tie-break on identity), runs all
//! peer negotiations in parallel with a hard per-peer deadline, and fans a
//! single shared audio capture out to every connection.

pub mod audio;
pub mod bandwidth;
pub mod mesh;
pub mod mixer;
pub mod negotiation;

mod error;

pub use bandwidth::{estimate, BandwidthEstimate};
pub use error::CallError;
pub use mesh::{CallEvent, CallState, MeshCoordinator, OutboundSignal};
pub use negotiation::{NegotiationAction, PeerNegotiation, PeerRole};
