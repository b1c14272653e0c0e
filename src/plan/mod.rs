//! Story plans
//!
//! A plan lists the stories to walk the app through, with per-story platform
//! filters. The runner drives each one through a [`StoryChannel`] and reports
//! structured results rather than stopping at the first failure.
//!
//! [`StoryChannel`]: crate::channel::StoryChannel

mod config;
mod runner;

pub use config::*;
pub use runner::{run_plan, run_plan_file, PlanResult, StoryResult, StoryStatus};
