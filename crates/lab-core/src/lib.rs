//! Core types for lab-host
//!
//! # Modules
//!
//! - `config`: Environment loading and host configuration
//! - `error`: Error types and Result alias
//! - `signal`: Typed broadcast signals
//! - `token`: Identity-keyed service tokens

pub mod config;
pub mod error;
pub mod signal;
pub mod token;

// Re-exports
pub use config::HostConfig;
pub use error::{Error, Result};
pub use signal::{Signal, SlotId};
pub use token::{AnyToken, Token, TokenId};
