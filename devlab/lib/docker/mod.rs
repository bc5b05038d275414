//! Container engine gateway.
//!
//! All interaction with the container engine goes through the engine's CLI so that devlab
//! works identically against docker and podman daemons.

mod helper;
mod reference;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use helper::*;
pub use reference::*;
