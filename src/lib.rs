//! Story bridge - story-change coordination for on-device Storybook tests
//!
//! The orchestrator side of a Storybook-driven mobile test run: a WebSocket
//! listener the app under test connects to, and a channel that switches the
//! app to a story and waits until the device confirms it has rendered.

pub mod channel;
pub mod cli;
pub mod commands;
pub mod common;
pub mod device;
pub mod plan;
pub mod protocol;

// Re-export commonly used types for tests
pub use channel::{RenderOutcome, StoryChannel};
pub use common::{Error, Result};
