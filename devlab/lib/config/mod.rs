//! Configuration types, defaults, and discovery.

mod component;
mod defaults;
mod devlab;
mod script;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use component::*;
pub use defaults::*;
pub use devlab::*;
pub use script::*;
