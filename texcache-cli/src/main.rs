//! texcache CLI - inspect and maintain texture cache directories.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use runner::GlobalOptions;

#[derive(Parser)]
#[command(name = "texcache")]
#[command(version = texcache::VERSION)]
#[command(about = "Inspect and maintain texcache cache directories", long_about = None)]
struct Cli {
    /// Config file (default: ~/.texcache/config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Cache directory, overriding the config file
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Mirror log output to stdout
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache maintenance and item access
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    let options = GlobalOptions {
        config: cli.config,
        cache_dir: cli.cache_dir,
        verbose: cli.verbose,
    };

    let result = match cli.command {
        Commands::Cache { action } => commands::cache::run(action, &options),
        Commands::Config { command } => commands::config::run(command, &options),
    };

    if let Err(e) = result {
        e.exit();
    }
}
