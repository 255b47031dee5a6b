use thiserror::Error;

use palaver_shared::types::CallId;

#[derive(Error, Debug)]
pub enum CallError {
    /// Hard participant limit exceeded.  Raised at `start_call`/`join_call`
    /// entry, before any connection attempt; fully recoverable by retrying
    /// with fewer participants.
    #[error("Call capacity exceeded: {count} participants (max {max})")]
    CapacityExceeded { count: usize, max: usize },

    #[error("Already in a call")]
    AlreadyInCall,

    #[error("No such call: {0}")]
    UnknownCall(CallId),

    #[error("Call is not in a state that allows this operation: {0}")]
    InvalidState(&'static str),

    #[error("Signaling channel closed")]
    SignalingClosed,

    #[error("No audio input device available")]
    NoInputDevice,

    #[error("No audio output device available")]
    NoOutputDevice,

    #[error("Audio stream error: {0}")]
    StreamError(String),
}

pub type Result<T> = std::result::Result<T, CallError>;
