use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "tapeout")]
#[command(version, about = "Hardware design build orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the pipeline document
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// Explicit run override, the highest-priority configuration source.
    /// May be given multiple times.
    #[arg(long = "set", value_name = "VAR=VALUE", global = true)]
    pub overrides: Vec<String>,

    /// PDK/SCL default values document, the lowest-priority source
    #[arg(long, global = true)]
    pub pdk: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute the pipeline described by the config document
    Run {
        /// Run tag; generated when absent
        #[arg(long)]
        tag: Option<String>,
        /// Directory holding one subdirectory per run
        #[arg(long, default_value = "runs")]
        run_dir: PathBuf,
    },
    /// Resolve the configuration and pipeline without executing anything
    Check,
    /// List the steps the document registers
    Steps,
    /// List the flows the document registers
    Flows,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose {
            "tapeout=debug"
        } else {
            "tapeout=warn"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match &cli.command {
        Commands::Run { tag, run_dir } => {
            cmd::cmd_run(&cli, tag.clone(), run_dir.clone()).await
        }
        Commands::Check => cmd::cmd_check(&cli).map(|()| ExitCode::SUCCESS),
        Commands::Steps => cmd::cmd_steps(&cli).map(|()| ExitCode::SUCCESS),
        Commands::Flows => cmd::cmd_flows(&cli).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", console::style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
