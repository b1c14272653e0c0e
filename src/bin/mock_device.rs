//! Mock device binary for manual end-to-end runs
//!
//! Connects to a running bridge the way the Storybook app does, announces
//! itself and answers every story change. Stories listed with `--throw`
//! report a render exception instead.

use std::collections::HashSet;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use story_bridge::protocol::{Envelope, MessageKind, StoryRef};

#[derive(Parser)]
#[command(name = "mock-device", about = "Fake Storybook device for story-bridge")]
struct Args {
    /// Bridge URL; overrides --port
    #[arg(long)]
    url: Option<String>,

    /// Bridge port on localhost
    #[arg(long, default_value_t = 7007)]
    port: u16,

    /// Identifier sent in the handshake
    #[arg(long, default_value = "mock-device")]
    id: String,

    /// Story ids that throw while rendering
    #[arg(long = "throw")]
    throw: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("mock-device: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let url = args
        .url
        .unwrap_or_else(|| format!("ws://127.0.0.1:{}", args.port));
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();
    eprintln!("mock-device: connected to {url} as {}", args.id);

    let hello = json!({ "type": MessageKind::ChannelCreated.as_str(), "from": args.id, "args": [] });
    sink.send(Message::Text(hello.to_string().into())).await?;

    let throwing: HashSet<String> = args.throw.into_iter().collect();
    let mut current: Option<String> = None;

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
            continue;
        };
        if MessageKind::parse(&envelope.kind) != Some(MessageKind::SetCurrentStory) {
            continue;
        }
        let Some(story_id) = envelope
            .args
            .into_iter()
            .next()
            .and_then(|arg| serde_json::from_value::<StoryRef>(arg).ok())
            .map(StoryRef::into_id)
        else {
            continue;
        };

        let reply = if throwing.contains(&story_id) {
            eprintln!("mock-device: {story_id} throws");
            json!({
                "type": MessageKind::StoryThrewException.as_str(),
                "args": [format!("{story_id} threw on purpose")],
            })
        } else {
            let kind = if current.as_deref() == Some(story_id.as_str()) {
                MessageKind::StoryUnchanged
            } else {
                MessageKind::StoryRendered
            };
            eprintln!("mock-device: {kind} {story_id}");
            current = Some(story_id.clone());
            json!({ "type": kind.as_str(), "args": [{ "storyId": story_id }] })
        };
        sink.send(Message::Text(reply.to_string().into())).await?;
    }

    eprintln!("mock-device: bridge closed the connection");
    Ok(())
}
