//! Story plan runner
//!
//! Walks the app through every story in a plan over one channel. A failed
//! story is recorded and the run moves on to the next one.

use std::path::Path;
use std::time::{Duration, Instant};

use colored::Colorize;
use serde::Serialize;

use crate::channel::{RenderOutcome, StoryChannel};
use crate::common::Result;

use super::config::{Platform, StoryPlan};

/// How one planned story ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StoryStatus {
    Ready { outcome: RenderOutcome },
    Failed { code: String, error: String },
    Skipped,
}

/// Result for one planned story
#[derive(Debug, Clone, Serialize)]
pub struct StoryResult {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub status: StoryStatus,
    pub elapsed_ms: u64,
}

/// Result of a plan run
#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub name: String,
    pub stories: Vec<StoryResult>,
}

impl PlanResult {
    pub fn ready(&self) -> usize {
        self.count(|s| matches!(s, StoryStatus::Ready { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, StoryStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, StoryStatus::Skipped))
    }

    /// True when no story failed
    pub fn passed(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&StoryStatus) -> bool) -> usize {
        self.stories.iter().filter(|s| pred(&s.status)).count()
    }
}

/// Load a plan from `path` and run it
pub async fn run_plan_file(
    channel: &StoryChannel,
    path: &Path,
    platform: Option<Platform>,
    verbose: bool,
) -> Result<PlanResult> {
    let plan = StoryPlan::load(path)?;
    run_plan(channel, &plan, platform, verbose).await
}

/// Run every story of `plan` in order
///
/// Fails only if the listener cannot be bound; story failures are reported
/// in the result. The caller owns the channel and tears it down.
pub async fn run_plan(
    channel: &StoryChannel,
    plan: &StoryPlan,
    platform: Option<Platform>,
    verbose: bool,
) -> Result<PlanResult> {
    println!(
        "\n{} {}",
        "Running Plan:".blue().bold(),
        plan.name.white().bold()
    );
    if let Some(desc) = &plan.description {
        println!("  {}", desc.dimmed());
    }

    let addr = channel.prepare().await?;
    if verbose {
        println!("  Listening on {}", addr.to_string().dimmed());
    }
    match channel.establish_route().await {
        Ok(()) => {
            if verbose {
                println!("  {} Device route ready", "✓".green());
            }
        }
        // Retried by the first story change
        Err(e) => println!("  {} {}", "!".yellow(), e),
    }

    println!("\n{}", "Stories:".cyan());
    let mut results = Vec::with_capacity(plan.stories.len());
    for story in &plan.stories {
        let name = story.display_name().to_string();

        if !story.runs_on(platform) {
            println!("  {} {} {}", "-".dimmed(), name, "(skipped)".dimmed());
            results.push(StoryResult {
                id: story.id.clone(),
                name,
                status: StoryStatus::Skipped,
                elapsed_ms: 0,
            });
            continue;
        }

        let started = Instant::now();
        let outcome = channel.request_story_change(&story.id).await;
        let elapsed = started.elapsed();

        let status = match outcome {
            Ok(outcome) => {
                let note = match outcome {
                    RenderOutcome::Rendered => String::new(),
                    RenderOutcome::Unchanged => " (unchanged)".to_string(),
                };
                println!(
                    "  {} {}{} {}",
                    "✓".green(),
                    name,
                    note.dimmed(),
                    format_elapsed(elapsed).dimmed()
                );
                StoryStatus::Ready { outcome }
            }
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), name, e);
                // Errors without a story are channel setup failures
                if e.story_id().is_none() {
                    println!("    {}", "channel setup failed; the story was never requested".dimmed());
                }
                StoryStatus::Failed {
                    code: e.code().to_string(),
                    error: e.to_string(),
                }
            }
        };
        if verbose && story.id != name {
            println!("    {}", story.id.dimmed());
        }

        results.push(StoryResult {
            id: story.id.clone(),
            name,
            status,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
    }

    let result = PlanResult {
        name: plan.name.clone(),
        stories: results,
    };
    print_summary(&result);
    Ok(result)
}

fn print_summary(result: &PlanResult) {
    let counts = format!(
        "{} ready, {} failed, {} skipped",
        result.ready(),
        result.failed(),
        result.skipped()
    );
    if result.passed() {
        println!("\n{} {}", "✓ Plan Passed:".green().bold(), counts);
    } else {
        println!("\n{} {}", "✗ Plan Failed:".red().bold(), counts);
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() > 0 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(id: &str, status: StoryStatus) -> StoryResult {
        StoryResult {
            id: id.to_string(),
            name: id.to_string(),
            status,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_counts() {
        let result = PlanResult {
            name: "plan".to_string(),
            stories: vec![
                story(
                    "a",
                    StoryStatus::Ready {
                        outcome: RenderOutcome::Rendered,
                    },
                ),
                story(
                    "b",
                    StoryStatus::Failed {
                        code: "CHANGE_TIMEOUT".to_string(),
                        error: "timed out".to_string(),
                    },
                ),
                story("c", StoryStatus::Skipped),
            ],
        };
        assert_eq!(result.ready(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.skipped(), 1);
        assert!(!result.passed());
    }

    #[test]
    fn test_result_json_shape() {
        let result = story(
            "a",
            StoryStatus::Ready {
                outcome: RenderOutcome::Unchanged,
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["outcome"], "unchanged");
        assert_eq!(json["id"], "a");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.5s");
    }
}
