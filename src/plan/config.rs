//! Story plan configuration types
//!
//! Defines the data structures for deserializing YAML story plans.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::common::{Error, Result};

/// A complete story plan loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct StoryPlan {
    /// Name of the plan
    pub name: String,
    /// Optional description of what the plan covers
    pub description: Option<String>,
    /// Stories in the order they are visited
    pub stories: Vec<PlannedStory>,
}

/// One story to visit
#[derive(Deserialize, Debug)]
pub struct PlannedStory {
    /// Storybook story id, e.g. `button--primary`
    pub id: String,
    /// Human-readable name; defaults to the id
    pub name: Option<String>,
    /// Restrict the story to these platforms; empty means all
    #[serde(default)]
    pub only_on_platforms: Vec<Platform>,
    /// Skip the story entirely
    #[serde(default)]
    pub skip: bool,
}

/// Mobile platform a run targets
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
}

impl PlannedStory {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Whether the story should run on `platform`
    ///
    /// Platform-restricted stories are skipped when the platform is unknown.
    pub fn runs_on(&self, platform: Option<Platform>) -> bool {
        if self.skip {
            return false;
        }
        if self.only_on_platforms.is_empty() {
            return true;
        }
        platform.is_some_and(|p| self.only_on_platforms.contains(&p))
    }
}

impl StoryPlan {
    /// Load a plan from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read story plan '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let plan: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse story plan: {}", e)))?;
        if plan.stories.iter().any(|s| s.id.trim().is_empty()) {
            return Err(Error::Config("story plan contains an empty story id".to_string()));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
name: Buttons
description: Primary and secondary buttons
stories:
  - id: button--primary
    name: Primary
  - id: button--secondary
    only_on_platforms: [android]
  - id: button--disabled
    skip: true
"#;

    #[test]
    fn test_parse_plan() {
        let plan = StoryPlan::from_yaml(PLAN).unwrap();
        assert_eq!(plan.name, "Buttons");
        assert_eq!(plan.stories.len(), 3);
        assert_eq!(plan.stories[0].display_name(), "Primary");
        assert_eq!(plan.stories[1].display_name(), "button--secondary");
        assert_eq!(plan.stories[1].only_on_platforms, vec![Platform::Android]);
    }

    #[test]
    fn test_platform_filter() {
        let plan = StoryPlan::from_yaml(PLAN).unwrap();
        let secondary = &plan.stories[1];
        assert!(secondary.runs_on(Some(Platform::Android)));
        assert!(!secondary.runs_on(Some(Platform::Ios)));
        assert!(!secondary.runs_on(None));
        assert!(plan.stories[0].runs_on(None));
        assert!(!plan.stories[2].runs_on(Some(Platform::Android)));
    }

    #[test]
    fn test_demo_plan_parses() {
        let plan = StoryPlan::from_yaml(include_str!("../../demos/buttons.yaml")).unwrap();
        let on_ios: Vec<_> = plan
            .stories
            .iter()
            .filter(|s| s.runs_on(Some(Platform::Ios)))
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(on_ios, vec!["button--primary", "button--secondary"]);
    }

    #[test]
    fn test_empty_story_id_rejected() {
        let err = StoryPlan::from_yaml("name: x\nstories:\n  - id: ''\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
