use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use stratus::az::AzCliProvider;
use stratus::batch::BatchRunner;
use stratus::config::RunOptions;
use stratus::normalize::normalize;
use stratus::redact::redact;
use stratus::retry::ThreadSleeper;
use stratus::spec::DeploymentSpec;
use stratus::{logging, plan};

/// Stratus: deploy ARM templates described by a JSON deployment spec.
///
/// For every declared unit: ensure the resource group exists, apply the
/// template with retries and exponential backoff, then verify the outcome.
#[derive(Parser, Debug)]
#[command(name = "stratus", version)]
#[command(about = "Declarative ARM template deployment orchestrator", long_about = None)]
struct Cli {
    /// Path to the JSON deployment spec
    spec: PathBuf,

    /// Also append log lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Number of units deployed concurrently (1-64)
    #[arg(long, default_value_t = 1)]
    parallelism: usize,

    /// Simulate: no resource group creation, what-if instead of deploy, no verification
    #[arg(long)]
    dry_run: bool,

    /// Sequential mode: keep deploying remaining units after a failure
    #[arg(long)]
    keep_going: bool,

    /// Validate the spec, print the normalized plan and exit
    #[arg(long)]
    print_plan: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn print_error_chain(err: &anyhow::Error) {
    eprintln!("Error: {}", redact(&err.to_string()));

    let mut n = 0;
    let mut cur = err.source();
    while let Some(cause) = cur {
        eprintln!("  {n}: {}", redact(&cause.to_string()));
        n += 1;
        cur = cause.source();
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = real_main(cli) {
        print_error_chain(&err);
        std::process::exit(1);
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let options = RunOptions {
        spec_path: cli.spec,
        log_file: cli.log_file,
        parallelism: cli.parallelism,
        dry_run: cli.dry_run,
        keep_going: cli.keep_going,
        debug: cli.debug,
    };
    options.validate()?;

    logging::init(options.debug, options.log_file.as_deref())?;

    let spec_display = options.spec_path.display().to_string();
    let doc = DeploymentSpec::load_from_file(&options.spec_path)
        .with_context(|| format!("failed to load deployment spec: {spec_display}"))?;
    let spec = normalize(&doc, &options.spec_base_dir())
        .with_context(|| format!("invalid deployment spec: {spec_display}"))?;

    if cli.print_plan {
        plan::print_plan(&spec);
        return Ok(());
    }

    let api = AzCliProvider::from_env();
    let report = BatchRunner::new(&api, &ThreadSleeper, options.batch_options()).run(&spec)?;

    println!(
        "RUN SUMMARY: {} unit(s) succeeded{}",
        report.succeeded_count(),
        if report.dry_run { " (dry-run)" } else { "" }
    );
    Ok(())
}
