//! Configuration management CLI commands.

use clap::Subcommand;
use texcache::config::ConfigFile;

use crate::error::CliError;
use crate::runner::{CliRunner, GlobalOptions};

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration as INI
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, options: &GlobalOptions) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            let runner = CliRunner::without_logging(options)?;
            println!("{}", runner.config_path().display());
            Ok(())
        }
        ConfigCommands::Show => {
            let runner = CliRunner::without_logging(options)?;
            print!("{}", runner.config().to_ini_string());
            Ok(())
        }
        ConfigCommands::Init { force } => run_init(options, force),
    }
}

fn run_init(options: &GlobalOptions, force: bool) -> Result<(), CliError> {
    let path = options
        .config
        .clone()
        .unwrap_or_else(texcache::config::config_file_path);

    if force {
        ConfigFile::default().save_to(&path)?;
        println!("Wrote default configuration to {}", path.display());
    } else if ConfigFile::ensure_exists_at(&path)? {
        println!("Created {}", path.display());
    } else {
        println!("{} already exists (use --force to overwrite)", path.display());
    }
    Ok(())
}
