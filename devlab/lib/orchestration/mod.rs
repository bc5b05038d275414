//! Component lifecycle management.
//!
//! Each action is a free async function taking a [`DevlabContext`], so the CLI handlers,
//! the global multi-project actions, and tests all drive the same code paths.

mod build;
mod context;
mod down;
mod global;
mod ordering;
mod reset;
mod restart;
mod shell;
mod status;
mod up;
mod update;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use build::*;
pub use context::*;
pub use down::*;
pub use global::*;
pub use ordering::*;
pub use reset::*;
pub use restart::*;
pub use shell::*;
pub use status::*;
pub use up::*;
pub use update::*;
