//! # Wavepipe Common Library
//!
//! Shared code for the wavepipe workspace:
//! - Global tunable parameters (`params::PARAMS`)
//! - Configuration file loading and resolution
//! - Shared error types

pub mod config;
pub mod error;
pub mod params;

pub use error::{Error, Result};
