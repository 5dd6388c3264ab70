//! Wire types shared by the Kryptopoly session engine and its clients.

mod catalog;
mod command;
mod error;
mod ids;
mod settlement;
mod snapshot;
mod types;
pub mod wire;

pub use crate::catalog::*;
pub use crate::command::*;
pub use crate::error::*;
pub use crate::ids::*;
pub use crate::settlement::*;
pub use crate::snapshot::*;
pub use crate::types::*;
pub use crate::wire::{hash_bytes_fnv1a64, snapshot_hash, WireError};
