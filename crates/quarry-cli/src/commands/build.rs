//! Build command - get or build a projection artifact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use quarry_core::CancelSignal;
use quarry_named_query::{BuildOutcome, OutputKind};

use crate::{Config, OutputFormat, QueryTarget};

/// Arguments for the build command.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// The named query to project.
    #[command(flatten)]
    pub target: QueryTarget,

    /// Output kind: document, archive, manifest or raw-list.
    #[arg(long, short = 'k', default_value = "document", value_parser = parse_kind)]
    pub kind: OutputKind,

    /// Write the artifact bytes to this file.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

pub(crate) fn parse_kind(raw: &str) -> std::result::Result<OutputKind, String> {
    raw.parse()
}

/// Execute the build command.
///
/// # Errors
///
/// Returns an error if the request is invalid, the build fails, or the
/// output file cannot be written.
pub async fn execute(args: &BuildArgs, config: &Config, cancel: &CancelSignal) -> Result<()> {
    let service = config.service()?;
    let request = args.target.request(args.kind);
    let outcome = service.get_or_build(&request, cancel).await?;

    let bytes = match &outcome {
        BuildOutcome::Ready(handle) => Some(service.read_artifact(handle).await?),
        BuildOutcome::Inline(inline) => Some(inline.bytes.clone()),
        BuildOutcome::Pending { .. } => None,
    };
    if let (Some(path), Some(bytes)) = (&args.output, &bytes) {
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?),
        OutputFormat::Text | OutputFormat::Table => print_outcome(&outcome),
    }

    Ok(())
}

fn print_outcome(outcome: &BuildOutcome) {
    match outcome {
        BuildOutcome::Ready(handle) => {
            println!("{} {}", "ready".green(), handle.path);
            println!("  name:   {}", handle.download_name);
            println!("  type:   {}", handle.content_type);
            println!("  items:  {}", handle.item_count);
            println!("  bytes:  {}", handle.size_bytes);
            if handle.requires_auth() {
                let roles: Vec<_> = handle.roles.iter().map(String::as_str).collect();
                println!("  roles:  {}", roles.join(", ").yellow());
            }
        }
        BuildOutcome::Pending {
            key,
            retry_after_secs,
            ..
        } => {
            println!(
                "{} {key}: build in progress, retry in {retry_after_secs}s",
                "pending".yellow()
            );
        }
        BuildOutcome::Inline(inline) => {
            println!("{}", String::from_utf8_lossy(&inline.bytes));
        }
    }
}

fn outcome_json(outcome: &BuildOutcome) -> serde_json::Value {
    match outcome {
        BuildOutcome::Ready(handle) => serde_json::json!({
            "status": "ready",
            "path": handle.path,
            "downloadName": handle.download_name,
            "contentType": handle.content_type,
            "itemCount": handle.item_count,
            "sizeBytes": handle.size_bytes,
            "roles": handle.roles,
            "created": handle.created,
        }),
        BuildOutcome::Pending {
            key,
            started,
            retry_after_secs,
        } => serde_json::json!({
            "status": "pending",
            "key": key,
            "started": started,
            "retryAfterSecs": retry_after_secs,
        }),
        BuildOutcome::Inline(inline) => serde_json::json!({
            "status": "inline",
            "contentType": inline.content_type,
            "itemCount": inline.item_count,
            "ids": serde_json::from_slice::<serde_json::Value>(&inline.bytes)
                .unwrap_or(serde_json::Value::Null),
        }),
    }
}
