//! Control commands - inspect or drop a cached projection.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use quarry_named_query::{ControlFile, OutputKind, ProjectionConfig};

use super::build::parse_kind;
use crate::{Config, OutputFormat, QueryTarget};

/// Arguments for the control and invalidate commands.
#[derive(Debug, Args)]
pub struct ControlArgs {
    /// The named query whose projection to inspect.
    #[command(flatten)]
    pub target: QueryTarget,

    /// Output kind: document, archive or manifest.
    #[arg(long, short = 'k', default_value = "document", value_parser = parse_kind)]
    pub kind: OutputKind,
}

/// Show the control record for a projection.
///
/// # Errors
///
/// Returns an error if the catalog cannot be loaded or the request is invalid.
pub async fn show(args: &ControlArgs, config: &Config) -> Result<()> {
    let service = config.service()?;
    let control = service.control_file(&args.target.request(args.kind)).await?;

    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&control)?),
        OutputFormat::Text | OutputFormat::Table => {
            println!("{}", state_label(&control, &config.projection));
            if let Some(created) = control.created {
                println!("  since:   {}", created.format("%Y-%m-%d %H:%M:%S"));
            }
            if control.exists {
                println!("  items:   {}", control.item_count);
                println!("  bytes:   {}", control.size_bytes);
            }
            if control.attempt > 0 {
                println!("  attempt: {}", control.attempt);
            }
        }
    }

    Ok(())
}

/// Drop a cached projection.
///
/// # Errors
///
/// Returns an error if the catalog cannot be loaded, the request is invalid,
/// or storage deletes fail.
pub async fn invalidate(args: &ControlArgs, config: &Config) -> Result<()> {
    let service = config.service()?;
    service.invalidate(&args.target.request(args.kind)).await?;
    println!("Invalidated {} projection of {}", args.kind, args.target.query);
    Ok(())
}

fn state_label(control: &ControlFile, projection: &ProjectionConfig) -> String {
    if control.exists {
        "ready".green().to_string()
    } else if control.is_stale(projection.stale_threshold_chrono()) {
        "stale".red().to_string()
    } else if control.in_process {
        "building".yellow().to_string()
    } else {
        "absent".dimmed().to_string()
    }
}
