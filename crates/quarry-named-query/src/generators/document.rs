//! Document projection: one page per asset.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;

use super::pdf::PdfWriter;
use super::{ArtifactSink, GenerationContext, GenerationSummary, ProjectionGenerator, RoleGate};
use crate::catalog::Asset;
use crate::conductor::ResolvedResult;
use crate::error::Result;
use crate::query::{KindOptions, OutputKind};

/// Renders a PDF with an optional cover page followed by one page per asset.
///
/// Assets whose roles fall outside the customer's allowlist get a redacted
/// page instead of their content. Each page is passed to the sink once it is
/// rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentGenerator;

#[async_trait]
impl ProjectionGenerator for DocumentGenerator {
    fn kind(&self) -> OutputKind {
        OutputKind::Document
    }

    async fn generate(
        &self,
        resolved: &ResolvedResult,
        ctx: &GenerationContext<'_>,
        sink: &mut dyn ArtifactSink,
    ) -> Result<GenerationSummary> {
        let (object_name, cover_page, redacted_message) = match &resolved.query.options {
            KindOptions::Document {
                object_name,
                cover_page,
                redacted_message,
            } => (
                object_name.as_deref(),
                cover_page.as_deref(),
                redacted_message.as_deref(),
            ),
            _ => (None, None, None),
        };
        let object_name = object_name.unwrap_or(&ctx.config.default_object_name);
        let redacted_message = redacted_message.unwrap_or(&ctx.config.redacted_message);
        let gate = RoleGate::new(ctx.config.allowed_roles(resolved.query.customer));

        let mut pdf = PdfWriter::new();
        if let Some(cover) = cover_page {
            pdf.add_text_page(&[object_name.to_string(), cover.to_string()]);
        }
        sink.write(Bytes::from(pdf.take_pending())).await?;

        let mut roles = BTreeSet::new();
        let mut item_count = 0u64;
        let mut redacted = 0u64;
        let mut assets = resolved.assets_until_cancelled(ctx.cancel);
        while let Some(asset) = assets.try_next().await? {
            item_count += 1;
            if gate.permits(&asset) {
                gate.collect(&mut roles, &asset);
                pdf.add_text_page(&asset_lines(&asset, item_count, ctx));
            } else {
                redacted += 1;
                pdf.add_text_page(&[redacted_message.to_string()]);
            }
            sink.write(Bytes::from(pdf.take_pending())).await?;
        }

        tracing::debug!(
            pages = pdf.page_count(),
            redacted,
            "document generated"
        );
        sink.write(Bytes::from(pdf.finish())).await?;
        Ok(GenerationSummary { item_count, roles })
    }
}

fn asset_lines(asset: &Asset, position: u64, ctx: &GenerationContext<'_>) -> Vec<String> {
    let mut lines = vec![
        format!("{position}. {}", asset.qualified_id()),
        format!(
            "{}/{}/full/full/0/default.jpg",
            ctx.config.image_service_base.trim_end_matches('/'),
            asset.qualified_id()
        ),
    ];
    lines.extend(
        [&asset.string1, &asset.string2, &asset.string3]
            .into_iter()
            .flatten()
            .cloned(),
    );
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectionConfig;
    use crate::generators::test_support::{asset, render, resolve, storage};
    use quarry_core::{CancelHandle, CancelSignal, CustomerId};

    fn pages(bytes: &[u8]) -> usize {
        bytes
            .windows(b"/Type /Page ".len())
            .filter(|w| *w == b"/Type /Page ")
            .count()
    }

    fn contains(bytes: &[u8], needle: &str) -> bool {
        bytes
            .windows(needle.len())
            .any(|w| w == needle.as_bytes())
    }

    #[tokio::test]
    async fn one_page_per_asset_in_order() {
        let resolved = resolve(
            vec![asset("b", 2, &[]), asset("a", 1, &["clickthrough"]), asset("c", 3, &[])],
            OutputKind::Document,
        )
        .await;
        let config = ProjectionConfig::default();
        let storage = storage();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };

        let (bytes, summary) = render(&DocumentGenerator, &resolved, &ctx).await.unwrap();
        assert_eq!(pages(&bytes), 3);
        assert_eq!(summary.item_count, 3);
        assert!(summary.roles.contains("clickthrough"));

        let text = String::from_utf8_lossy(&bytes);
        let a = text.find("1. 42/4/a").unwrap();
        let b = text.find("2. 42/4/b").unwrap();
        let c = text.find("3. 42/4/c").unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn redacts_assets_outside_allowlist_and_adds_cover() {
        let mut resolved = resolve(
            vec![asset("open", 1, &[]), asset("secret", 2, &["staff"])],
            OutputKind::Document,
        )
        .await;
        resolved.query.options = KindOptions::Document {
            object_name: Some("Book".into()),
            cover_page: Some("https://example.org/cover".into()),
            redacted_message: Some("Withheld".into()),
        };
        let mut config = ProjectionConfig::default();
        config
            .role_allowlists
            .insert(CustomerId::new(42), ["clickthrough".to_string()].into());
        let storage = storage();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };

        let (bytes, summary) = render(&DocumentGenerator, &resolved, &ctx).await.unwrap();
        assert_eq!(pages(&bytes), 3);
        assert_eq!(summary.item_count, 2);
        assert!(summary.roles.is_empty());
        assert!(contains(&bytes, "(Withheld)"));
        assert!(!contains(&bytes, "42/4/secret"));
        assert!(contains(&bytes, "https://example.org/cover"));
    }

    #[tokio::test]
    async fn empty_result_is_a_valid_empty_document() {
        let resolved = resolve(vec![], OutputKind::Document).await;
        let config = ProjectionConfig::default();
        let storage = storage();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };
        let (bytes, summary) = render(&DocumentGenerator, &resolved, &ctx).await.unwrap();
        assert_eq!(summary.item_count, 0);
        assert!(bytes.starts_with(b"%PDF-"));
        assert_eq!(pages(&bytes), 0);
    }

    #[tokio::test]
    async fn deterministic_bytes() {
        let assets = vec![asset("x", 1, &[]), asset("y", 2, &[])];
        let resolved = resolve(assets, OutputKind::Document).await;
        let config = ProjectionConfig::default();
        let storage = storage();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };
        let (first, _) = render(&DocumentGenerator, &resolved, &ctx).await.unwrap();
        let (second, _) = render(&DocumentGenerator, &resolved, &ctx).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn pages_reach_the_sink_before_the_document_closes() {
        #[derive(Default)]
        struct Chunks(Vec<Bytes>);

        #[async_trait]
        impl ArtifactSink for Chunks {
            async fn write(&mut self, chunk: Bytes) -> Result<()> {
                self.0.push(chunk);
                Ok(())
            }
        }

        let resolved = resolve(vec![asset("x", 1, &[]), asset("y", 2, &[])], OutputKind::Document).await;
        let config = ProjectionConfig::default();
        let storage = storage();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };

        let mut chunks = Chunks::default();
        DocumentGenerator.generate(&resolved, &ctx, &mut chunks).await.unwrap();
        // Header, one chunk per page, then the closing objects.
        assert_eq!(chunks.0.len(), 4);
        assert!(contains(&chunks.0[1], "1. 42/4/x"));
        assert!(contains(&chunks.0[2], "2. 42/4/y"));
        assert!(contains(&chunks.0[3], "%%EOF"));
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let resolved = resolve(vec![asset("x", 1, &[])], OutputKind::Document).await;
        let config = ProjectionConfig::default();
        let storage = storage();
        let handle = CancelHandle::new();
        handle.cancel();
        let cancel = handle.signal();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };
        let err = render(&DocumentGenerator, &resolved, &ctx).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
