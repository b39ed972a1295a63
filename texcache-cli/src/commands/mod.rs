//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`cache`] - Cache maintenance (stats, validate, purge, clear) and item access (get, put)
//! - [`config`] - Configuration management (path, show, init)

pub mod cache;
pub mod config;
