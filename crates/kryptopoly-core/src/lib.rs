mod catalog;
mod commitments;
mod engine;
mod error;
mod locks;
mod rules;
pub mod settlement;

pub use crate::catalog::*;
pub use crate::commitments::*;
pub use crate::engine::*;
pub use crate::error::*;
pub use crate::locks::*;
pub use crate::rules::*;
