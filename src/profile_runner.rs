//! Rebuild, locate and render the profiled application
//!
//! Everything around the graph engine that talks to the outside world:
//!
//! 1. Rebuild the instrumented application (`clean_cmd && build_cmd MODE`)
//! 2. Locate the binary from `run_cmd`
//! 3. Check that the captured profile exists
//! 4. Spawn `<pprof> -dot <binary> <profile>` and stream its stdout into
//!    the pipeline
//!
//! Steps 1-3 are preconditions: any failure aborts before graph work starts.
//! Nothing is retried here.

use crate::call_graph::CallGraph;
use crate::config::Config;
use crate::graph_sink::GraphSink;
use crate::pipeline::{GraphPipeline, PipelineReport};
use anyhow::{bail, Context, Result};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Inputs resolved by [`ProfileRunner::prepare`]
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedProfile {
    pub binary: PathBuf,
    pub profile_file: PathBuf,
}

/// Drives the external build and render tools for one configuration
#[derive(Debug, Clone)]
pub struct ProfileRunner<'a> {
    config: &'a Config,
}

impl<'a> ProfileRunner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Check every precondition, rebuilding first unless disabled
    pub fn prepare(&self) -> Result<PreparedProfile> {
        self.config.validate_commands()?;

        if self.config.skip_rebuild {
            debug!("skipping rebuild");
        } else {
            self.rebuild()?;
        }

        let Some(binary) = resolve_binary(&self.config.run_cmd) else {
            error!(run_cmd = %self.config.run_cmd, "binary not found");
            bail!(
                "Cannot find the binary in run command `{}`. Configure run_cmd with the binary path.",
                self.config.run_cmd
            );
        };

        let profile_file = self.config.profile_file.clone();
        if !profile_file.is_file() {
            error!(path = %profile_file.display(), "profile file missing");
            bail!(
                "No profiling file at {}. Run the profiler first.",
                profile_file.display()
            );
        }

        Ok(PreparedProfile {
            binary,
            profile_file,
        })
    }

    /// Clean and rebuild the application with the profiling build mode
    pub fn rebuild(&self) -> Result<()> {
        let script = rebuild_script(self.config);
        info!(command = %script, "rebuilding application");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .output()
            .with_context(|| format!("Failed to launch rebuild command `{}`", script))?;

        debug!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "rebuild output"
        );

        if !output.status.success() {
            bail!(
                "Rebuild failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Run the renderer and feed its output through `pipeline`
    pub fn render(
        &self,
        prepared: &PreparedProfile,
        pipeline: &GraphPipeline,
        sink: &mut dyn GraphSink,
    ) -> Result<(CallGraph, PipelineReport)> {
        let mut words = self.config.pprof.split_whitespace();
        let program = words.next().context("pprof must name a renderer executable")?;

        let mut child = Command::new(program)
            .args(words)
            .arg("-dot")
            .arg(&prepared.binary)
            .arg(&prepared.profile_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to launch profile renderer `{}`", program))?;

        let stdout = child
            .stdout
            .take()
            .context("Profile renderer stdout was not captured")?;

        let result = pipeline.run(BufReader::new(stdout), sink);
        if result.is_err() {
            // The renderer may still be writing; stop it before reporting.
            let _ = child.kill();
        }
        let status = child.wait().context("Failed to wait for profile renderer")?;

        let built = result?;
        if !status.success() {
            bail!("Profile renderer `{}` exited with {}", program, status);
        }
        Ok(built)
    }

    /// Prepare and render in one call
    pub fn run(
        &self,
        pipeline: &GraphPipeline,
        sink: &mut dyn GraphSink,
    ) -> Result<(CallGraph, PipelineReport)> {
        let prepared = self.prepare()?;
        self.render(&prepared, pipeline, sink)
    }
}

/// Shell script used to rebuild the application
pub fn rebuild_script(config: &Config) -> String {
    let build = format!("{} {}", config.build_cmd.trim(), config.build_mode.trim());
    let build = build.trim();
    if config.clean_cmd.trim().is_empty() {
        build.to_string()
    } else {
        format!("{} && {}", config.clean_cmd.trim(), build)
    }
}

/// First word of `run_cmd` that names an executable file
pub fn resolve_binary(run_cmd: &str) -> Option<PathBuf> {
    run_cmd
        .split_whitespace()
        .map(Path::new)
        .find(|path| is_executable(path))
        .map(Path::to_path_buf)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
