//! Configuration for call graph creation
//!
//! Values come from an optional TOML file and are then overridden by
//! command-line flags.
//!
//! ```toml
//! run_cmd = "./app --size 128"
//! build_cmd = "make"
//! clean_cmd = "make clean"
//! profile_file = "cere_profile/app.prof"
//! root_policy = "retain"
//! ```

use crate::call_graph::DEFAULT_INTEREST_MARKER;
use crate::node_pruner::RootPolicy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings consumed by the profile runner and the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command that runs the application; only used to locate the binary
    pub run_cmd: String,

    /// Command that builds the instrumented application
    pub build_cmd: String,

    /// Command that cleans previous build products
    pub clean_cmd: String,

    /// Appended to `build_cmd` when rebuilding for profiling
    #[serde(default = "default_build_mode")]
    pub build_mode: String,

    /// Binary profile captured by an earlier profiling run
    #[serde(default = "default_profile_file")]
    pub profile_file: PathBuf,

    /// Profile renderer invoked as `<pprof> -dot <binary> <profile_file>`
    #[serde(default = "default_pprof")]
    pub pprof: String,

    /// Directory receiving the graph snapshots
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Symbol-name token that marks interest points
    #[serde(default = "default_interest_marker")]
    pub interest_marker: String,

    pub root_policy: RootPolicy,

    /// Skip the clean/build step and use the binary already on disk
    pub skip_rebuild: bool,
}

fn default_build_mode() -> String {
    "CERE_MODE=\"original --instrument --instrument-app\"".to_string()
}

fn default_profile_file() -> PathBuf {
    PathBuf::from("cere_profile/app.prof")
}

fn default_pprof() -> String {
    "pprof".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("cere_profile")
}

fn default_interest_marker() -> String {
    DEFAULT_INTEREST_MARKER.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_cmd: String::new(),
            build_cmd: String::new(),
            clean_cmd: String::new(),
            build_mode: default_build_mode(),
            profile_file: default_profile_file(),
            pprof: default_pprof(),
            output_dir: default_output_dir(),
            interest_marker: default_interest_marker(),
            root_policy: RootPolicy::default(),
            skip_rebuild: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Check settings needed before any graph work
    ///
    /// Only the settings used in every mode are checked here; the profile
    /// runner checks the external commands it actually needs.
    pub fn validate(&self) -> Result<()> {
        if self.interest_marker.trim().is_empty() {
            bail!("interest_marker must not be empty");
        }
        if self.pprof.trim().is_empty() {
            bail!("pprof must name a renderer executable");
        }
        Ok(())
    }

    /// Check the commands needed to rebuild and profile the application
    pub fn validate_commands(&self) -> Result<()> {
        if self.run_cmd.trim().is_empty() {
            bail!("run_cmd is not set; it is needed to locate the binary");
        }
        if !self.skip_rebuild && self.build_cmd.trim().is_empty() {
            bail!("build_cmd is not set; pass --skip-rebuild to use the existing binary");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.interest_marker, "__cere__");
        assert_eq!(config.pprof, "pprof");
        assert_eq!(config.profile_file, PathBuf::from("cere_profile/app.prof"));
        assert_eq!(config.root_policy, RootPolicy::Retain);
        assert!(!config.skip_rebuild);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            run_cmd = "./app 12"
            build_cmd = "make"
            clean_cmd = "make clean"
            root_policy = "forbid"
            "#,
        )
        .unwrap();

        assert_eq!(config.run_cmd, "./app 12");
        assert_eq!(config.clean_cmd, "make clean");
        assert_eq!(config.root_policy, RootPolicy::Forbid);
        // Unset fields keep their defaults
        assert_eq!(config.output_dir, PathBuf::from("cere_profile"));
        assert_eq!(config.interest_marker, "__cere__");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Config::from_toml_str("run_cmd = ").is_err());
        assert!(Config::from_toml_str("root_policy = \"sometimes\"").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/callgraph.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.interest_marker = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_commands() {
        let mut config = Config::default();
        assert!(config.validate_commands().is_err());

        config.run_cmd = "./app".to_string();
        assert!(config.validate_commands().is_err());

        config.skip_rebuild = true;
        assert!(config.validate_commands().is_ok());

        config.skip_rebuild = false;
        config.build_cmd = "make".to_string();
        assert!(config.validate_commands().is_ok());
    }
}
