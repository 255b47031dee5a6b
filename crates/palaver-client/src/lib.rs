//! # palaver-client
//!
//! The engine the application layer drives.  It owns the identity, the
//! local database, the key distribution manager, and the call mesh
//! coordinator, and talks to the outside world through two channels: an
//! outbound [`TransportCommand`] channel the transport task drains, and an
//! [`EngineEvent`] mailbox the UI drains.

pub mod commands;
pub mod engine;
pub mod events;
pub mod outbound;

mod error;

pub use engine::Engine;
pub use error::EngineError;
pub use events::EngineEvent;
pub use outbound::TransportCommand;
