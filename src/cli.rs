//! CLI argument parsing for codelet-callgraph

use crate::config::Config;
use crate::node_pruner::RootPolicy;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "codelet-callgraph")]
#[command(version)]
#[command(
    about = "Build a weighted, acyclic call graph of instrumented regions from profiler output",
    long_about = None
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Command that runs the application (used to locate the binary)
    #[arg(long = "run-cmd", value_name = "CMD")]
    pub run_cmd: Option<String>,

    /// Command that builds the application
    #[arg(long = "build-cmd", value_name = "CMD")]
    pub build_cmd: Option<String>,

    /// Command that cleans the application build
    #[arg(long = "clean-cmd", value_name = "CMD")]
    pub clean_cmd: Option<String>,

    /// Captured binary profile
    #[arg(long = "profile-file", value_name = "PATH")]
    pub profile_file: Option<PathBuf>,

    /// Profile renderer executable
    #[arg(long = "pprof", value_name = "CMD")]
    pub pprof: Option<String>,

    /// Directory receiving graph snapshots
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Symbol-name token marking interest points
    #[arg(long = "marker", value_name = "TOKEN")]
    pub marker: Option<String>,

    /// How to treat roots that are not interest points when pruning
    #[arg(long = "root-policy", value_enum)]
    pub root_policy: Option<RootPolicy>,

    /// Use the binary already on disk instead of rebuilding
    #[arg(long = "skip-rebuild")]
    pub skip_rebuild: bool,

    /// Read renderer dot output from a file ("-" for stdin) instead of running the renderer
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Print the run report as JSON on stdout
    #[arg(long = "json")]
    pub json: bool,

    /// Enable debug tracing output
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Apply command-line overrides on top of `config`
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(run_cmd) = &self.run_cmd {
            config.run_cmd = run_cmd.clone();
        }
        if let Some(build_cmd) = &self.build_cmd {
            config.build_cmd = build_cmd.clone();
        }
        if let Some(clean_cmd) = &self.clean_cmd {
            config.clean_cmd = clean_cmd.clone();
        }
        if let Some(profile_file) = &self.profile_file {
            config.profile_file = profile_file.clone();
        }
        if let Some(pprof) = &self.pprof {
            config.pprof = pprof.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(marker) = &self.marker {
            config.interest_marker = marker.clone();
        }
        if let Some(policy) = self.root_policy {
            config.root_policy = policy;
        }
        if self.skip_rebuild {
            config.skip_rebuild = true;
        }
    }
}
