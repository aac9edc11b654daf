use anyhow::{Context, Result};
use clap::Parser;
use codelet_callgraph::cli::Cli;
use codelet_callgraph::config::Config;
use codelet_callgraph::graph_sink::{DotGraphSink, JsonGraphSink, SinkSet};
use codelet_callgraph::node_pruner::PruneOptions;
use codelet_callgraph::pipeline::{GraphPipeline, PipelineReport};
use codelet_callgraph::profile_runner::ProfileRunner;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` forces TRACE level
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Load the configuration file (if any) and apply CLI overrides
fn load_config(args: &Cli) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

/// Build the graph from a saved dot file, or stdin for "-"
fn run_offline(
    input: &Path,
    pipeline: &GraphPipeline,
    sinks: &mut SinkSet,
) -> Result<PipelineReport> {
    let (_, report) = if input == Path::new("-") {
        pipeline.run(io::stdin().lock(), sinks)?
    } else {
        let file = File::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        pipeline.run(BufReader::new(file), sinks)?
    };
    Ok(report)
}

fn print_summary(report: &PipelineReport) {
    eprintln!("Call graph: {} samples", report.total_samples);
    eprintln!(
        "  parsed:    {:>6} nodes {:>6} edges  self coverage {:>7.2}%",
        report.parsed_nodes, report.parsed_edges, report.parsed_self_coverage
    );
    eprintln!(
        "  collapsed: {:>6} cycles ({} self-recursive), {} nodes removed",
        report.collapse.cycles_collapsed(),
        report.collapse.self_loops_stripped,
        report.collapse.nodes_removed
    );
    eprintln!(
        "  pruned:    {:>6} nodes, {} roots retained",
        report.prune.removed.len(),
        report.prune.retained_roots.len()
    );
    eprintln!(
        "  final:     {:>6} nodes {:>6} edges  self coverage {:>7.2}%",
        report.final_nodes, report.final_edges, report.final_self_coverage
    );
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = load_config(&args)?;

    let pipeline = GraphPipeline::new()?
        .interest_marker(config.interest_marker.clone())
        .prune_options(PruneOptions {
            root_policy: config.root_policy,
        });

    let mut sinks = SinkSet::new()
        .with(JsonGraphSink::new(&config.output_dir))
        .with(DotGraphSink::new(&config.output_dir));

    let report = match &args.input {
        Some(input) => run_offline(input, &pipeline, &mut sinks)?,
        None => {
            let (_, report) = ProfileRunner::new(&config).run(&pipeline, &mut sinks)?;
            report
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(())
}
