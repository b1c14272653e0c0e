//! Wire protocol between the bridge and the Storybook app on the device
//!
//! One JSON object per WebSocket text frame:
//! ```text
//! { "type": "<message-kind>", "from"?: "<string>", "args"?: [ ... ] }
//! ```

pub mod message;

pub use message::{decode, encode_set_current_story, Envelope, Inbound, MessageKind, StoryRef};
