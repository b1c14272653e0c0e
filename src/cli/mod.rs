//! CLI command handling
//!
//! Runs CLI commands against a [`StoryChannel`] and formats output. Every
//! command tears the channel down before returning, successful or not.

use std::time::Duration;

use colored::Colorize;

use crate::channel::{RenderOutcome, StoryChannel};
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::plan;

/// How often `listen` checks for connection changes
const LISTEN_POLL: Duration = Duration::from_millis(250);

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    let channel = StoryChannel::from_config(config)?;
    let result = run(command, &channel).await;
    channel.teardown().await;
    result
}

async fn run(command: Commands, channel: &StoryChannel) -> Result<()> {
    match command {
        Commands::Run {
            plan,
            platform,
            verbose,
            json,
        } => {
            let result = plan::run_plan_file(channel, &plan, platform, verbose).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            if result.passed() {
                Ok(())
            } else {
                Err(Error::PlanFailed {
                    name: result.name.clone(),
                    failed: result.failed(),
                    total: result.stories.len(),
                })
            }
        }

        Commands::Change { story_ids } => {
            let addr = channel.prepare().await?;
            tracing::debug!(%addr, "Listener ready");
            channel.establish_route().await?;

            for story_id in &story_ids {
                match channel.request_story_change(story_id).await? {
                    RenderOutcome::Rendered => {
                        println!("{} {}", "✓".green(), story_id);
                    }
                    RenderOutcome::Unchanged => {
                        println!("{} {} {}", "✓".green(), story_id, "(unchanged)".dimmed());
                    }
                }
            }
            Ok(())
        }

        Commands::Listen => listen(channel).await,
    }
}

async fn listen(channel: &StoryChannel) -> Result<()> {
    let addr = channel.prepare().await?;
    if let Err(e) = channel.establish_route().await {
        println!("{} {}", "!".yellow(), e);
    }
    println!("Listening on {} (Ctrl-C to stop)", addr.to_string().bold());

    let mut ticker = tokio::time::interval(LISTEN_POLL);
    let mut last: Option<Option<String>> = None;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!();
                return Ok(());
            }
            _ = ticker.tick() => {
                let current = channel
                    .is_connected()
                    .then(|| channel.peer_identifier().unwrap_or_default());
                if last.as_ref() != Some(&current) {
                    match &current {
                        Some(id) if id.is_empty() => println!("{} device connected", "●".green()),
                        Some(id) => println!("{} device connected: {}", "●".green(), id),
                        None if last.is_some() => println!("{} device disconnected", "○".dimmed()),
                        None => println!("{} waiting for a device", "○".dimmed()),
                    }
                    last = Some(current);
                }
            }
        }
    }
}
