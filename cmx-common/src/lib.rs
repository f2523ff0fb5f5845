//! # CMX Common Library
//!
//! Shared code for the CMX analysis workspace:
//! - Common error type
//! - Bootstrap TOML configuration and config-file resolution
//! - Logging setup
//! - Analysis event types and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
