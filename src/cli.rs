use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::interpreter::{FlowEngine, FlowEngineFactory};
use crate::processor::ScriptProcessor;
use crate::runner::StageRunner;
use crate::session::{MemoryRepository, Record, Relationship};

#[derive(Parser)]
#[command(name = "flowscript")]
#[command(about = "Run Flow scripts against records on a bounded interpreter pool", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Script file (overrides config)
    #[arg(long, global = true, conflicts_with = "script_body")]
    pub script_file: Option<PathBuf>,

    /// Inline script text (overrides config)
    #[arg(long, global = true)]
    pub script_body: Option<String>,

    /// Number of interpreters and concurrent tasks (overrides config)
    #[arg(short = 'j', long, global = true)]
    pub max_concurrent_tasks: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process files as records and report where each was routed
    Run {
        /// Input files, one record each
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write routed records to <dir>/<relationship>/<filename>
        #[arg(short = 'o', long)]
        output_dir: Option<PathBuf>,
    },

    /// Run the stream variant from stdin to stdout
    Transform,

    /// Validate configuration and build the interpreter pool
    Check,

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut builder = Config::builder().config_path(cli.config.clone());
    if let Some(n) = cli.max_concurrent_tasks {
        builder = builder.max_concurrent_tasks(n);
    }
    let mut config = builder.build().context("Failed to load configuration")?;

    // A source given on the command line replaces whichever one the config names
    if let Some(path) = &cli.script_file {
        config.script.script_file = Some(path.clone());
        config.script.script_body = None;
    }
    if let Some(body) = &cli.script_body {
        config.script.script_body = Some(body.clone());
        config.script.script_file = None;
    }
    Ok(config)
}

fn start(config: &Config) -> Result<Arc<ScriptProcessor<FlowEngine>>> {
    let processor =
        ScriptProcessor::start(config, &FlowEngineFactory).context("Failed to start script stage")?;
    Ok(Arc::new(processor))
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Eagerly load and validate configuration before executing any command
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
        }
        Commands::Check => {
            let processor = start(&config)?;
            println!(
                "ok: {} interpreter(s), script {} (sha256 {})",
                processor.pool().capacity(),
                processor.script().origin(),
                processor.script().short_fingerprint()
            );
            processor.stop();
        }
        Commands::Transform => {
            let processor = start(&config)?;
            processor
                .transform(std::io::stdin(), std::io::stdout())
                .await
                .context("Transform failed")?;
            processor.stop();
        }
        Commands::Run { files, output_dir } => {
            let processor = start(&config)?;
            let repository = MemoryRepository::new();
            for path in &files {
                let content = std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                repository.enqueue_record(Record::new(content).with_attributes([(
                    "filename".to_string(),
                    file_name(path),
                )]));
            }

            let runner = StageRunner::new(Arc::clone(&processor), repository);
            let report = runner.run_queue().await;
            processor.stop();

            for relationship in Relationship::all() {
                for record in runner.repository().transferred(relationship) {
                    let name = record
                        .attributes
                        .get("filename")
                        .cloned()
                        .unwrap_or_else(|| record.id.clone());
                    println!("{:<8} {}", relationship, name);
                    if let Some(dir) = &output_dir {
                        write_record(dir, relationship, &name, &record.content)?;
                    }
                }
            }
            for record in runner.repository().queue() {
                let name = record.attributes.get("filename").cloned().unwrap_or(record.id);
                println!("{:<8} {}", "requeued", name);
            }
            for error in &report.errors {
                eprintln!("error: {}", error);
            }

            if report.failed > 0 {
                anyhow::bail!("{} of {} record(s) failed", report.failed, report.triggers());
            }
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn write_record(dir: &Path, relationship: Relationship, name: &str, content: &[u8]) -> Result<()> {
    let target_dir = dir.join(relationship.name());
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;
    let target = target_dir.join(name);
    std::fs::write(&target, content)
        .with_context(|| format!("Failed to write {}", target.display()))
}
