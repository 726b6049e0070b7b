//! Presentation-manifest projection (IIIF Presentation 2.1 shape).

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::{Value, json};

use super::{ArtifactSink, GenerationContext, GenerationSummary, ProjectionGenerator};
use crate::catalog::Asset;
use crate::conductor::ResolvedResult;
use crate::error::{NamedQueryError, Result};
use crate::query::{KindOptions, OutputKind};

const PRESENTATION_CONTEXT: &str = "http://iiif.io/api/presentation/2/context.json";
const IMAGE_CONTEXT: &str = "http://iiif.io/api/image/2/context.json";
const IMAGE_PROFILE: &str = "http://iiif.io/api/image/2/level1.json";

/// Builds a single manifest with one canvas per asset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestGenerator;

#[async_trait]
impl ProjectionGenerator for ManifestGenerator {
    fn kind(&self) -> OutputKind {
        OutputKind::Manifest
    }

    async fn generate(
        &self,
        resolved: &ResolvedResult,
        ctx: &GenerationContext<'_>,
        sink: &mut dyn ArtifactSink,
    ) -> Result<GenerationSummary> {
        let query = &resolved.query;
        let manifest_id = format!(
            "{}/iiif-resource/{}/{}",
            base(&ctx.config.image_service_base),
            query.customer,
            query.query_name
        );
        let label = match &query.options {
            KindOptions::Manifest { label: Some(label) } => label.clone(),
            _ => query.query_name.clone(),
        };

        let mut roles = BTreeSet::new();
        let mut canvases = Vec::new();
        let mut assets = resolved.assets_until_cancelled(ctx.cancel);
        while let Some(asset) = assets.try_next().await? {
            roles.extend(asset.roles.iter().cloned());
            canvases.push(canvas(&manifest_id, canvases.len(), &asset, ctx));
        }
        let item_count = canvases.len() as u64;

        let manifest = json!({
            "@context": PRESENTATION_CONTEXT,
            "@id": format!("{manifest_id}/manifest"),
            "@type": "sc:Manifest",
            "label": label,
            "sequences": [{
                "@id": format!("{manifest_id}/sequence/0"),
                "@type": "sc:Sequence",
                "canvases": canvases,
            }],
        });
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| NamedQueryError::generation(format!("manifest encoding: {e}")))?;
        sink.write(Bytes::from(bytes)).await?;
        Ok(GenerationSummary { item_count, roles })
    }
}

fn base(url: &str) -> &str {
    url.trim_end_matches('/')
}

fn canvas(manifest_id: &str, index: usize, asset: &Asset, ctx: &GenerationContext<'_>) -> Value {
    let canvas_id = format!("{manifest_id}/canvas/c{index}");
    let qualified = asset.qualified_id();
    let width = asset.width.unwrap_or(0);
    let height = asset.height.unwrap_or(0);

    if asset.is_time_based() {
        return json!({
            "@id": canvas_id,
            "@type": "sc:Canvas",
            "label": asset.id,
            "width": width,
            "height": height,
            "rendering": [{
                "@id": format!("{}/{qualified}", base(&ctx.config.av_base)),
                "format": asset.media_type,
            }],
        });
    }

    let service_id = format!("{}/{qualified}", base(&ctx.config.image_service_base));
    json!({
        "@id": canvas_id,
        "@type": "sc:Canvas",
        "label": asset.id,
        "width": width,
        "height": height,
        "thumbnail": {
            "@id": format!("{}/{qualified}/full/!200,200/0/default.jpg", base(&ctx.config.thumbnail_base)),
            "@type": "dctypes:Image",
        },
        "images": [{
            "@type": "oa:Annotation",
            "motivation": "sc:painting",
            "on": canvas_id,
            "resource": {
                "@id": format!("{service_id}/full/full/0/default.jpg"),
                "@type": "dctypes:Image",
                "format": "image/jpeg",
                "width": width,
                "height": height,
                "service": {
                    "@context": IMAGE_CONTEXT,
                    "@id": service_id,
                    "profile": IMAGE_PROFILE,
                },
            },
        }],
    })
}
