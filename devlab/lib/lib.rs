//! `devlab` is a tool for orchestrating local development environments made of containers and
//! host processes.
//!
//! # Overview
//!
//! devlab reads a single project configuration file and brings a set of components up and down
//! in a deterministic order. It handles:
//! - Component lifecycle management (up, down, restart, reset)
//! - Image building and staleness tracking
//! - Provisioning and status scripts
//! - Persistent per-project state
//! - Host processes running alongside containers
//!
//! # Architecture
//!
//! devlab consists of several key components:
//!
//! - **Config**: Project configuration discovery and parsing
//! - **Docker**: Container engine gateway (docker or podman)
//! - **Images**: Image resolution and staleness detection
//! - **Orchestration**: Component lifecycle and ordering
//! - **Runtime**: Child process supervision and output capture
//! - **Scripts**: Provisioning script dispatch
//! - **State**: Persistent environment state store
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use devlab::orchestration::{self, DevlabContext, UpOpts};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = DevlabContext::load(None).await?;
//!     orchestration::up(&ctx, &[], UpOpts::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration types, discovery and validation
//! - [`docker`] - Container engine gateway
//! - [`images`] - Image resolution and registry checks
//! - [`orchestration`] - Component lifecycle management
//! - [`runtime`] - Child process supervision
//! - [`scripts`] - Provisioning script dispatch
//! - [`state`] - Persistent environment state
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod docker;
pub mod images;
pub mod orchestration;
pub mod runtime;
pub mod scripts;
pub mod state;
pub mod utils;

pub use error::*;
