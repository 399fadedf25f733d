//! Command-line interface for the Katara compiler backend.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod build;
mod config;
mod doc;
mod fs;
mod pipeline;
mod run;

/// Katara compiler backend driver
#[derive(Parser)]
#[command(name = "katara")]
#[command(about = "Katara compiler backend driver", long_about = None)]
struct Cli {
    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile IR sources to an x86-64 binary
    Build {
        paths: Vec<PathBuf>,
        #[arg(short, long, default_value = "target")]
        output_dir: PathBuf,
        #[arg(long, default_value = "katara.toml")]
        config: PathBuf,
    },
    /// Emit a CFG/summary documentation dump for IR sources
    Doc {
        paths: Vec<PathBuf>,
        #[arg(short, long, default_value = "target/doc")]
        output_dir: PathBuf,
    },
    /// Interpret IR sources directly and report the exit code
    Run { paths: Vec<PathBuf> },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    pipeline::log_verbosity(cli.verbose);

    let fs = fs::RealFilesystem;

    let result: Result<i64> = match cli.command {
        Commands::Build { paths, output_dir, config: config_path } => {
            let config = config::KataraConfig::load(&config_path).unwrap_or_default();
            build::build_paths(&fs, &paths, &output_dir, &config).map(|()| 0)
        }
        Commands::Doc { paths, output_dir } => doc::doc_paths(&fs, &paths, &output_dir).map(|()| 0),
        Commands::Run { paths } => run::run_paths(&fs, &paths),
    };

    match result {
        Ok(code) => {
            let code = code.clamp(0, u8::MAX as i64) as u8;
            ExitCode::from(code)
        }
        Err(err) => {
            log::error!("{err:#}");
            let code = pipeline::exit_code_for(&err).clamp(1, u8::MAX as i32) as u8;
            ExitCode::from(code)
        }
    }
}
