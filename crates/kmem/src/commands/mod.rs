//! Command implementations for kmem CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod compact;
pub mod conflicts;
pub mod daemon;
pub mod record;
pub mod status;
