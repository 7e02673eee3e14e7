//! snaut - headless Spectronaut batch runner
//!
//! Validates a batch of raw files, unpacks zipped Bruker folders in
//! parallel, writes the condition table and drives SpectronautCMD through
//! activate / run / deactivate, with Ctrl-C cancelling the whole run.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use snaut::config::RunnerConfig;
use snaut::datafiles::collect_entries;
use snaut::error::WorkflowError;
use snaut::operation::Operation;
use snaut::progress::{EventSinks, LogLevel};
use snaut::tool::ToolOptions;
use snaut::workflow::Workflow;

#[derive(Parser)]
#[command(name = "snaut")]
#[command(version)]
#[command(about = "Headless Spectronaut batch runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file (default: ~/.snaut/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Spectronaut license key (overrides the configuration file)
    #[arg(long, global = true, env = "SPECTRONAUTKEY", hide_env_values = true)]
    key: Option<String>,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a DirectDIA search over a batch of raw files
    Direct {
        /// Input files: .raw files, .d folders or .d.zip archives
        files: Vec<PathBuf>,

        /// Output directory for the run
        #[arg(short, long)]
        output: PathBuf,

        /// Spectronaut settings (properties) file
        #[arg(short, long)]
        settings: PathBuf,

        /// FASTA database
        #[arg(long)]
        fasta: PathBuf,

        /// Experiment name (default: stem of the first input file)
        #[arg(short, long)]
        name: Option<String>,

        /// Report schema file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Gene ontology file
        #[arg(long)]
        go: Option<PathBuf>,

        /// Modification repository to import before the run
        #[arg(long)]
        mod_repository: Option<PathBuf>,

        /// Enzyme database to import before the run
        #[arg(long)]
        enzyme_db: Option<PathBuf>,

        /// Temp directory handed to the tool
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Write parquet output
        #[arg(long)]
        parquet: bool,

        /// Stop the tool at the first error
        #[arg(long)]
        terminate_on_error: bool,

        /// Segmented analysis
        #[arg(long)]
        segmented: bool,

        /// Wall-clock timeout for the main run, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Convert raw files to the tool's native format, one invocation per file
    Convert {
        /// Input files: .raw files, .d folders or .d.zip archives
        files: Vec<PathBuf>,

        /// Output directory for the run
        #[arg(short, long)]
        output: PathBuf,

        /// Optional settings (properties) file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Wall-clock timeout per conversion, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Write a default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(if cli.verbose {
                "snaut=debug".parse()?
            } else {
                "snaut=warn".parse()?
            }))
            .init();
    }

    let mut config = RunnerConfig::load(cli.config.as_ref());
    if cli.key.is_some() {
        config.spectronaut_key = cli.key;
    }

    match cli.command {
        Commands::InitConfig => {
            let path = RunnerConfig::create_default(cli.config.as_ref())?;
            println!("Configuration at {}", path.display());
            Ok(())
        }

        Commands::Direct {
            files,
            output,
            settings,
            fasta,
            name,
            report,
            go,
            mod_repository,
            enzyme_db,
            temp_dir,
            parquet,
            terminate_on_error,
            segmented,
            timeout,
        } => {
            if let Some(secs) = timeout {
                config.tool_timeout_secs = Some(secs);
            }
            let options = ToolOptions {
                protocol: Some("direct".to_string()),
                experiment_name: name,
                properties_file: Some(settings),
                fasta_file: Some(fasta),
                report_file: report,
                go_file: go,
                mod_repository,
                enzyme_database: enzyme_db,
                temp_directory: temp_dir,
                output_directory: Some(output),
                verbose: true,
                parquet,
                terminate_on_error,
                segmented,
                ..Default::default()
            };
            run(config, &files, options, false).await
        }

        Commands::Convert {
            files,
            output,
            settings,
            timeout,
        } => {
            if let Some(secs) = timeout {
                config.tool_timeout_secs = Some(secs);
            }
            let options = ToolOptions {
                properties_file: settings,
                output_directory: Some(output),
                verbose: true,
                ..Default::default()
            };
            run(config, &files, options, true).await
        }
    }
}

async fn run(
    config: RunnerConfig,
    files: &[PathBuf],
    options: ToolOptions,
    convert: bool,
) -> Result<()> {
    let mut entries = collect_entries(files);
    println!("{} input file(s)", entries.len());

    let workflow = Workflow::new(config, terminal_sinks());
    let op = Operation::new();

    let handle = op.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling, waiting for processes to exit...");
            handle.cancel();
        }
    });

    let result = if convert {
        workflow.run_convert(&mut entries, options, &op).await
    } else {
        workflow.run_direct(&mut entries, options, &op).await
    };

    match result {
        Ok(true) => {
            println!("Done.");
            Ok(())
        }
        Ok(false) => bail!("Processing failed, see log above"),
        Err(WorkflowError::Cancelled) => bail!("Cancelled"),
        Err(e) => Err(e.into()),
    }
}

/// Terminal sinks: log lines to stdout/stderr, progress to an indicatif bar
/// that appears with the first fraction and clears when the phase ends.
fn terminal_sinks() -> EventSinks {
    let bar: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));

    let log_bar = bar.clone();
    let log = Arc::new(move |level: LogLevel, message: &str| {
        let line = match level {
            LogLevel::Debug => return,
            LogLevel::Info => message.to_string(),
            LogLevel::Warn => format!("WARNING: {}", message),
            LogLevel::Error => format!("ERROR: {}", message),
        };
        // route through the bar while it is drawn, so lines do not clobber it
        match log_bar.lock().unwrap().as_ref() {
            Some(bar) => bar.println(line),
            None if level == LogLevel::Error => eprintln!("{}", line),
            None => println!("{}", line),
        }
    });

    let progress = Arc::new(move |fraction: Option<f64>| {
        let mut slot = bar.lock().unwrap();
        match fraction {
            Some(fraction) => {
                let bar = slot.get_or_insert_with(|| {
                    let bar = ProgressBar::new(100);
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}%")
                            .unwrap()
                            .progress_chars("=>-"),
                    );
                    bar
                });
                bar.set_position((fraction.clamp(0.0, 1.0) * 100.0) as u64);
            }
            None => {
                if let Some(bar) = slot.take() {
                    bar.finish_and_clear();
                }
            }
        }
    });

    EventSinks::new(log, progress)
}
