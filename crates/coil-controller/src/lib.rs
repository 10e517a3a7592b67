//! Coil control plane
//!
//! Hosts the BlockRequest controller and the `coil` command line used to
//! administer pools and blocks.

#![deny(missing_docs)]

pub mod cli;
pub mod commands;
pub mod watcher;

pub use cli::Cli;
pub use watcher::{block_request_controller, Context, KubeBlockRequestReader};
