//! Session state management.

pub mod state;

pub use state::{ApplyResult, SessionError, SessionState};
