//! CLI command definitions
//!
//! Defines the clap commands for the story-bridge CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::plan::Platform;

#[derive(Subcommand)]
pub enum Commands {
    /// Walk the app through every story in a YAML plan
    Run {
        /// Path to the YAML story plan
        plan: PathBuf,

        /// Platform under test; platform-restricted stories are skipped otherwise
        #[arg(long, value_enum)]
        platform: Option<Platform>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,

        /// Print the result as JSON after the run
        #[arg(long)]
        json: bool,
    },

    /// Change the app to each story in order
    Change {
        /// Storybook story ids, e.g. button--primary
        #[arg(required = true)]
        story_ids: Vec<String>,
    },

    /// Bind the listener and report device connections until Ctrl-C
    Listen,
}
