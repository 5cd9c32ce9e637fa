//! DagPlan CLI Entry Point
//!
//! Plans a workflow definition into a DAG description and file catalogs.
//!
//! # Usage
//!
//! ```bash
//! # Plan a workflow
//! dagplan workflow.yaml
//!
//! # Write emitted files elsewhere
//! dagplan workflow.yaml --output-dir /data/run
//!
//! # Check the graph without writing anything
//! dagplan workflow.yaml --validate-only
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use dagplan::workflow::{Emission, StagingPolicy, WorkflowGraph};
use dagplan::{load_definition, APP_NAME, VERSION};

/// Default definition file used when none is specified.
const DEFAULT_DEFINITION: &str = "workflow.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    definition_path: Option<String>,
    output_dir: Option<PathBuf>,
    permissive: bool,
    retries: Option<u32>,
    validate_only: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Workflow Planner with Nested Sub-Workflows");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: dagplan [OPTIONS] <DEFINITION_FILE>");
    println!();
    println!("Arguments:");
    println!("  <DEFINITION_FILE>   Path to workflow definition YAML (default: {})", DEFAULT_DEFINITION);
    println!();
    println!("Options:");
    println!("  --output-dir PATH   Directory for the emitted DAG and catalogs");
    println!("  --permissive        Warn instead of failing on unstaged sub-workflow outputs");
    println!("  --retries N         Download attempts for remote seed files");
    println!("  --validate-only     Check the graph without writing anything");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  dagplan inference.yaml");
    println!("  dagplan inference.yaml --output-dir /data/run --retries 5");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--permissive" => {
                config.permissive = true;
            }
            "--validate-only" => {
                config.validate_only = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--output-dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("--output-dir requires a path argument".to_string());
                }
                config.output_dir = Some(PathBuf::from(&args[i]));
            }
            "--retries" => {
                i += 1;
                if i >= args.len() {
                    return Err("--retries requires a number argument".to_string());
                }
                let retries: u32 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid retries value: {}", args[i]))?;
                if retries == 0 {
                    return Err("--retries must be at least 1".to_string());
                }
                config.retries = Some(retries);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.definition_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.definition_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Prints what was planned and where it was written.
fn print_summary(graph: &WorkflowGraph, emission: &Emission) {
    let subworkflows = graph.nodes().filter(|n| n.is_subworkflow()).count();
    let jobs = graph.len() - subworkflows;

    println!();
    println!("{}", "Workflow planned".green().bold());
    println!("  Name:          {}", graph.name());
    println!("  Jobs:          {}", jobs);
    println!("  Sub-workflows: {}", subworkflows);
    println!("  Edges:         {}", graph.edges().len());
    println!("  Catalog:       {} entries", emission.catalog.len());
    println!();
    println!("  DAG:           {}", emission.dag_path.display());
    println!("  Catalog map:   {}", emission.catalog_path.display());
    for path in &emission.cache_paths {
        println!("  Cache:         {}", path.display());
    }
    println!();
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("{} {}", "Error:".red().bold(), e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let definition_path = config
        .definition_path
        .unwrap_or_else(|| DEFAULT_DEFINITION.to_string());

    let definition = load_definition(Path::new(&definition_path)).map_err(|e| {
        error!("Failed to load definition: {}", e);
        format!("Could not load workflow from '{}': {}", definition_path, e)
    })?;

    // Definition settings first, then command-line overrides
    let mut plan_config = definition.plan_config();
    if let Some(dir) = config.output_dir {
        plan_config.output_dir = dir;
    }
    if config.permissive {
        plan_config.staging_policy = StagingPolicy::Permissive;
    }
    if let Some(retries) = config.retries {
        plan_config.resolve_attempts = retries;
    }

    if plan_config.staging_policy == StagingPolicy::Permissive {
        warn!("Permissive staging: unstaged sub-workflow outputs will be missing from catalogs");
    }
    info!("Output directory: {}", plan_config.output_dir.display());

    let mut built = definition.build_with(plan_config)?;

    if config.validate_only {
        let order = built.graph.validate()?;
        println!();
        println!(
            "{} {} nodes in a valid order, nothing written",
            "Valid:".green().bold(),
            order.len()
        );
        return Ok(());
    }

    let emission = built.graph.save()?;
    print_summary(&built.graph, &emission);

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
