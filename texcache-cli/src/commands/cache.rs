//! Cache management CLI commands.

use std::fs;
use std::path::PathBuf;

use clap::Subcommand;
use texcache::cache::{ContentId, ErrorCode, TextureCache, ValidationScope};
use texcache::config::format_size;

use crate::error::CliError;
use crate::runner::{CliRunner, GlobalOptions};

/// Priority given to requests submitted from the command line.
const CLI_PRIORITY: u32 = 100;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache occupancy and counters (opens the cache read-only)
    Stats,

    /// Check index entries against their body files
    ///
    /// Entries whose body is missing or the wrong size are dropped, and body
    /// files with no index entry are deleted. Without --full only the current
    /// rotating 1/32 slice is checked.
    Validate {
        /// Check every entry instead of one slice
        #[arg(long)]
        full: bool,
    },

    /// Evict cold entries until the cache is under its size target
    Purge,

    /// Remove every cached item
    Clear,

    /// Read an item from the cache
    Get {
        /// Item id (UUID)
        id: ContentId,

        /// Write the bytes to this file instead of printing a summary
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Byte offset to start reading at
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Maximum number of bytes to read
        #[arg(long)]
        max_len: Option<usize>,
    },

    /// Store a file in the cache
    Put {
        /// File to store
        file: PathBuf,

        /// Item id (UUID); a random one is generated if omitted
        #[arg(long)]
        id: Option<ContentId>,

        /// Declared full size of the item, if the file is a prefix of it
        #[arg(long)]
        declared_size: Option<i32>,
    },
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, options: &GlobalOptions) -> Result<(), CliError> {
    let runner = CliRunner::new(options)?;
    runner.log_startup("cache");
    execute(&runner, action)
}

fn execute(runner: &CliRunner, action: CacheAction) -> Result<(), CliError> {
    match action {
        CacheAction::Stats => {
            let cache = runner.open_cache_read_only()?;
            println!("Cache directory: {}", cache.config().cache_dir.display());
            println!();
            print!("{}", cache.stats().format());
            Ok(())
        }
        CacheAction::Validate { full } => {
            let cache = runner.open_cache()?;
            let scope = if full {
                ValidationScope::Full
            } else {
                ValidationScope::rotating()
            };
            let report = cache.validate(scope)?;
            let deleted = cache.drain_deletions();
            println!(
                "Checked {} entries: {} mismatched, {} orphaned body files ({} deleted)",
                report.checked, report.mismatched, report.orphans, deleted
            );
            Ok(())
        }
        CacheAction::Purge => {
            let cache = runner.open_cache()?;
            cache.purge()?;
            let deleted = cache.drain_deletions();
            print_occupancy(&cache);
            println!(
                "Evicted {} entries, deleted {} body files",
                cache.stats().evictions,
                deleted
            );
            Ok(())
        }
        CacheAction::Clear => {
            let cache = runner.open_cache()?;
            let before = cache.stats();
            cache.clear()?;
            println!(
                "Cleared {} entries ({})",
                before.live_entries,
                format_size(before.total_bytes)
            );
            Ok(())
        }
        CacheAction::Get {
            id,
            output,
            offset,
            max_len,
        } => {
            let service = runner.start_service()?;
            let max_len = max_len.unwrap_or(usize::MAX);
            let handle = service.read(id, offset, max_len, CLI_PRIORITY)?;
            let result = service.wait(handle);
            if !result.success {
                return Err(CliError::Request {
                    id,
                    code: result.error.unwrap_or(ErrorCode::Aborted),
                });
            }

            match output {
                Some(path) => {
                    fs::write(&path, &result.data).map_err(|error| CliError::File {
                        path: path.clone(),
                        error,
                    })?;
                    println!("Wrote {} bytes to {}", result.data.len(), path.display());
                }
                None => {
                    println!("Id:            {}", id);
                    println!("Bytes read:    {}", result.bytes_transferred);
                    println!("Declared size: {}", result.declared_size);
                    println!("Format:        {}", result.format_hint);
                }
            }
            Ok(())
        }
        CacheAction::Put {
            file,
            id,
            declared_size,
        } => {
            let data = fs::read(&file).map_err(|error| CliError::File {
                path: file.clone(),
                error,
            })?;
            let id = id.unwrap_or_else(ContentId::new_v4);
            let declared = declared_size
                .unwrap_or_else(|| i32::try_from(data.len()).unwrap_or(i32::MAX));

            let service = runner.start_service()?;
            let handle = service.write(id, data, declared, CLI_PRIORITY)?;
            let result = service.wait(handle);
            service.cache().drain_deletions();
            if !result.success {
                return Err(CliError::Request {
                    id,
                    code: result.error.unwrap_or(ErrorCode::Aborted),
                });
            }
            println!("Stored {} bytes as {}", result.bytes_transferred, id);
            Ok(())
        }
    }
}

fn print_occupancy(cache: &TextureCache) {
    let stats = cache.stats();
    println!(
        "{} entries, {} of {} ({:.1}%)",
        stats.live_entries,
        format_size(stats.total_bytes),
        format_size(stats.max_bytes),
        stats.byte_usage() * 100.0
    );
}
