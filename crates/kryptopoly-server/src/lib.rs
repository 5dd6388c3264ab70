//! Kryptopoly session server
//!
//! Authoritative host for game sessions: one task per session, a registry
//! routing requests to them, per-viewer snapshots pushed to watchers.

pub mod actor;
pub mod config;
pub mod game;
pub mod player_manager;
pub mod protocol;
pub mod registry;

pub use actor::{spawn_session, Identity, Joined, SessionHandle, SessionInfo, Watcher};
pub use config::{ConfigError, ServerConfig};
pub use game::{SessionError, SessionState};
pub use player_manager::{DirectoryError, Player, PlayerDirectory};
pub use protocol::*;
pub use registry::{Created, RegistryError, SessionRegistry};
