//! `muster-core` — shared configuration and error types for the Muster
//! attendance bot.

pub mod config;
pub mod error;

pub use config::MusterConfig;
pub use error::{MusterError, Result};
