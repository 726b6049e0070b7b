//! # quarry-cli
//!
//! Command-line interface for named-query projections.
//!
//! ## Commands
//!
//! - `quarry resolve` - List the assets a named query selects
//! - `quarry build` - Get or build a projection artifact
//! - `quarry control` - Show the control record for a projection
//! - `quarry invalidate` - Drop a cached projection
//!
//! ## Configuration
//!
//! The CLI uses environment variables or command-line flags for settings:
//!
//! - `QUARRY_CATALOG` - JSON catalog file (customers, named queries, assets)
//! - `QUARRY_STORE_ROOT` - Directory used as object storage
//! - `QUARRY_*` engine settings, see [`quarry_named_query::ProjectionConfig::from_env`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use quarry_core::{FileSystemBackend, StorageBackend};
use quarry_named_query::{
    MemoryCatalog, OutputKind, ProjectionConfig, ProjectionRequest, ProjectionService, QueryArgs,
};

/// Quarry CLI - named-query projection command-line interface.
#[derive(Debug, Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON catalog file.
    #[arg(long, env = "QUARRY_CATALOG", default_value = "catalog.json")]
    pub catalog: PathBuf,

    /// Directory used as object storage.
    #[arg(long, env = "QUARRY_STORE_ROOT", default_value = ".quarry")]
    pub store: PathBuf,

    /// Seconds after which an in-progress build is taken over.
    #[arg(long, env = "QUARRY_CONTROL_STALE_SECS")]
    pub stale_secs: Option<u64>,

    /// Milliseconds to wait on another caller's build before reporting pending.
    #[arg(long, env = "QUARRY_PENDING_WAIT_MS")]
    pub pending_wait_ms: Option<u64>,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a `QUARRY_*` variable is malformed.
    pub fn config(&self) -> Result<Config> {
        let mut projection = ProjectionConfig::from_env().context("invalid QUARRY_* settings")?;
        if let Some(secs) = self.stale_secs {
            projection.stale_threshold = std::time::Duration::from_secs(secs);
        }
        if let Some(ms) = self.pending_wait_ms {
            projection.pending_wait = std::time::Duration::from_millis(ms);
        }
        projection
            .validate()
            .context("invalid projection settings")?;

        Ok(Config {
            catalog: self.catalog.clone(),
            store: self.store.clone(),
            projection,
            format: self.format.clone(),
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the assets a named query selects.
    Resolve(commands::resolve::ResolveArgs),
    /// Get or build a projection artifact.
    Build(commands::build::BuildArgs),
    /// Show the control record for a projection.
    Control(commands::control::ControlArgs),
    /// Drop a cached projection so the next build regenerates it.
    Invalidate(commands::control::ControlArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON catalog file.
    pub catalog: PathBuf,
    /// Object storage root directory.
    pub store: PathBuf,
    /// Engine configuration.
    pub projection: ProjectionConfig,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Loads the catalog and opens storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or parsed.
    pub fn service(&self) -> Result<ProjectionService> {
        let json = std::fs::read_to_string(&self.catalog)
            .with_context(|| format!("failed to read catalog {}", self.catalog.display()))?;
        let catalog = MemoryCatalog::from_json(&json)
            .with_context(|| format!("failed to parse catalog {}", self.catalog.display()))?;
        let storage: Arc<dyn StorageBackend> = Arc::new(FileSystemBackend::new(self.store.clone()));
        Ok(ProjectionService::from_catalog(
            Arc::new(catalog),
            storage,
            self.projection.clone(),
        ))
    }
}

/// Arguments naming one named query and its request arguments.
#[derive(Debug, Clone, Args)]
pub struct QueryTarget {
    /// Customer id or name.
    pub customer: String,

    /// Named query name.
    pub query: String,

    /// Positional arguments as a path, e.g. `4/ledger`.
    #[arg(default_value = "")]
    pub path: String,

    /// Keyed argument `name=value`; repeatable.
    #[arg(long = "arg", short = 'a', value_parser = parse_keyed)]
    pub args: Vec<(String, String)>,
}

impl QueryTarget {
    /// Request arguments from the path and keyed flags.
    #[must_use]
    pub fn query_args(&self) -> QueryArgs {
        let keyed: BTreeMap<String, String> = self.args.iter().cloned().collect();
        keyed
            .into_iter()
            .fold(QueryArgs::from_path(&self.path), |args, (k, v)| {
                args.with_keyed(k, v)
            })
    }

    /// A projection request of `kind` for this target.
    #[must_use]
    pub fn request(&self, kind: OutputKind) -> ProjectionRequest {
        ProjectionRequest::new(&self.customer, &self.query, kind).with_args(self.query_args())
    }
}

fn parse_keyed(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}
