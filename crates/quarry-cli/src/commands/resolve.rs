//! Resolve command - list the assets a named query selects.

use anyhow::Result;
use clap::Args;
use quarry_core::CancelSignal;

use crate::{Config, OutputFormat, QueryTarget};

/// Arguments for the resolve command.
#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// The named query to resolve.
    #[command(flatten)]
    pub target: QueryTarget,
}

/// Execute the resolve command.
///
/// # Errors
///
/// Returns an error if the catalog cannot be loaded or the query does not
/// resolve.
pub async fn execute(args: &ResolveArgs, config: &Config, cancel: &CancelSignal) -> Result<()> {
    let service = config.service()?;
    let resolved = service
        .resolve_only(
            &args.target.customer,
            &args.target.query,
            &args.target.query_args(),
            cancel,
        )
        .await?;
    let assets = resolved.collect_assets(cancel).await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&assets)?);
        }
        OutputFormat::Text => {
            if assets.is_empty() {
                println!("No assets matched");
                return Ok(());
            }
            println!("{} of {} matching assets:", assets.len(), resolved.total);
            for asset in &assets {
                println!("  {} (ordinal {})", asset.qualified_id(), asset.ordinal);
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct AssetRow {
                #[tabled(rename = "Asset")]
                id: String,
                #[tabled(rename = "Ordinal")]
                ordinal: i64,
                #[tabled(rename = "Roles")]
                roles: String,
            }

            let rows: Vec<_> = assets
                .iter()
                .map(|a| AssetRow {
                    id: a.qualified_id(),
                    ordinal: a.ordinal,
                    roles: a.roles.iter().cloned().collect::<Vec<_>>().join(","),
                })
                .collect();

            if rows.is_empty() {
                println!("No assets matched");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
