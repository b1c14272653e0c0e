//! Common utilities shared by the channel, the CLI and the plan runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
