//! Utility functions and types.

mod net;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use net::*;
pub use path::*;
