//! Planner Configuration
//!
//! Settings shared by one planning run. Defaults can be overridden by the
//! `config` section of a workflow definition and then by command-line
//! options.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::registry::DEFAULT_RESOLVE_ATTEMPTS;

/// How the graph treats sub-workflow outputs that are consumed outside the
/// sub-workflow without being staged out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StagingPolicy {
    /// Reject the consumer when it is added
    #[default]
    Strict,
    /// Warn and leave the artifact out of the consumer's catalog
    Permissive,
}

/// Configuration for a planning run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlanConfig {
    /// Workflow name, used to name emitted files
    pub name: String,
    /// Directory emitted files are written to; relative artifact
    /// directories are anchored here
    pub output_dir: PathBuf,
    /// Directory remote seeds are downloaded to (default: `{output_dir}/seeds`)
    pub seed_dir: Option<PathBuf>,
    /// Site name recorded in catalog entries
    pub site: String,
    pub staging_policy: StagingPolicy,
    /// Download attempts for remote seed files
    pub resolve_attempts: u32,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            name: "workflow".to_string(),
            output_dir: PathBuf::from("."),
            seed_dir: None,
            site: "local".to_string(),
            staging_policy: StagingPolicy::default(),
            resolve_attempts: DEFAULT_RESOLVE_ATTEMPTS,
        }
    }
}

impl PlanConfig {
    /// Creates a default configuration for a named workflow.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the seed download directory.
    pub fn seed_dir(&self) -> PathBuf {
        self.seed_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("seeds"))
    }
}
