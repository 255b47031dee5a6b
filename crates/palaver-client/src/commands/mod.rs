//! Engine command surface, grouped by concern.

pub mod calls;
pub mod groups;
pub mod messaging;
