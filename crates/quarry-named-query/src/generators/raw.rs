//! Raw-list projection: the ordered identifiers, never stored.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;

use super::{ArtifactSink, GenerationContext, GenerationSummary, ProjectionGenerator};
use crate::conductor::ResolvedResult;
use crate::error::{NamedQueryError, Result};
use crate::query::OutputKind;

/// Serializes the matched asset identifiers as a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawListGenerator;

#[async_trait]
impl ProjectionGenerator for RawListGenerator {
    fn kind(&self) -> OutputKind {
        OutputKind::RawList
    }

    async fn generate(
        &self,
        resolved: &ResolvedResult,
        ctx: &GenerationContext<'_>,
        sink: &mut dyn ArtifactSink,
    ) -> Result<GenerationSummary> {
        let ids: Vec<String> = resolved
            .assets_until_cancelled(ctx.cancel)
            .map_ok(|asset| asset.qualified_id())
            .try_collect()
            .await?;
        let item_count = ids.len() as u64;
        let bytes = serde_json::to_vec(&ids)
            .map_err(|e| NamedQueryError::generation(format!("list encoding: {e}")))?;
        sink.write(Bytes::from(bytes)).await?;
        Ok(GenerationSummary {
            item_count,
            roles: BTreeSet::new(),
        })
    }
}
