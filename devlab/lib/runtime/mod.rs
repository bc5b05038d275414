//! Child process supervision and output capture.

mod command;
mod output;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use command::*;
pub use output::*;
