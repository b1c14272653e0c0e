//! Message envelope, message kinds and story-id normalisation

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::Result;

/// Frame envelope exchanged with the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind, see [`MessageKind`]
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender identifier, set by the device on the handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Message kinds the bridge understands
///
/// Storybook puts the camelCase event name on the wire; the upper-case
/// constant names are accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Device handshake carrying its identifier in `from`
    ChannelCreated,
    /// Orchestrator command, `args[0] = { storyId }`
    SetCurrentStory,
    /// Story finished rendering
    StoryRendered,
    /// Requested story was already current
    StoryUnchanged,
    /// Rendering threw, `args[0]` is the error payload
    StoryThrewException,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelCreated => "channelCreated",
            Self::SetCurrentStory => "setCurrentStory",
            Self::StoryRendered => "storyRendered",
            Self::StoryUnchanged => "storyUnchanged",
            Self::StoryThrewException => "storyThrewException",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "channelCreated" | "CHANNEL_CREATED" => Some(Self::ChannelCreated),
            "setCurrentStory" | "SET_CURRENT_STORY" => Some(Self::SetCurrentStory),
            "storyRendered" | "STORY_RENDERED" => Some(Self::StoryRendered),
            "storyUnchanged" | "STORY_UNCHANGED" => Some(Self::StoryUnchanged),
            "storyThrewException" | "STORY_THREW_EXCEPTION" => Some(Self::StoryThrewException),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted shapes of a story reference in `args[0]`
///
/// This is a closed set: anything else is treated as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoryRef {
    /// `"button--primary"`
    Bare(String),
    /// `{ "storyId": "button--primary" }`
    Wrapped {
        #[serde(rename = "storyId")]
        story_id: String,
    },
}

impl StoryRef {
    /// Normalise to the story id
    pub fn into_id(self) -> String {
        match self {
            Self::Bare(id) | Self::Wrapped { story_id: id } => id,
        }
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    ChannelCreated { from: Option<String> },
    StoryRendered { story_id: String },
    StoryUnchanged { story_id: String },
    StoryThrewException { reason: String },
    /// Well-formed frame of a kind the bridge does not act on
    Ignored { kind: String },
}

/// Decode an inbound frame
///
/// Returns `None` for malformed frames (invalid JSON, missing `type`, or a
/// render signal without a recognisable story reference).
pub fn decode(text: &str) -> Option<Inbound> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed frame");
            return None;
        }
    };

    let Some(kind) = MessageKind::parse(&envelope.kind) else {
        return Some(Inbound::Ignored {
            kind: envelope.kind,
        });
    };

    match kind {
        MessageKind::ChannelCreated => Some(Inbound::ChannelCreated {
            from: envelope.from,
        }),
        MessageKind::StoryRendered => {
            story_ref(&envelope).map(|story_id| Inbound::StoryRendered { story_id })
        }
        MessageKind::StoryUnchanged => {
            story_ref(&envelope).map(|story_id| Inbound::StoryUnchanged { story_id })
        }
        MessageKind::StoryThrewException => Some(Inbound::StoryThrewException {
            reason: error_reason(envelope.args.first()),
        }),
        // Our own command echoed back, nothing to do
        MessageKind::SetCurrentStory => Some(Inbound::Ignored {
            kind: envelope.kind,
        }),
    }
}

fn story_ref(envelope: &Envelope) -> Option<String> {
    let arg = envelope.args.first()?.clone();
    match serde_json::from_value::<StoryRef>(arg) {
        Ok(story) => Some(story.into_id()),
        Err(_) => {
            tracing::debug!(kind = %envelope.kind, "Dropping render signal without story id");
            None
        }
    }
}

fn error_reason(payload: Option<&Value>) -> String {
    match payload {
        None | Some(Value::Null) => "unknown error".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Encode the `SET_CURRENT_STORY` command
pub fn encode_set_current_story(story_id: &str) -> Result<String> {
    let envelope = Envelope {
        kind: MessageKind::SetCurrentStory.as_str().to_string(),
        from: None,
        args: vec![serde_json::to_value(StoryRef::Wrapped {
            story_id: story_id.to_string(),
        })?],
    };
    Ok(serde_json::to_string(&envelope)?)
}
