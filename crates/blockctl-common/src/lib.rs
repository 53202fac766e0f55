//! blockctl Common - Shared types and configuration
//!
//! This crate provides the types, size constants, and configuration
//! structures used by the metadata store, the LVM controller, and the CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
