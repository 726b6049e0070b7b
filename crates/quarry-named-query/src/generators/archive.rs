//! Archive projection: a tar bundle with one entry per asset.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;

use super::{ArtifactSink, GenerationContext, GenerationSummary, ProjectionGenerator, RoleGate};
use crate::conductor::ResolvedResult;
use crate::error::{NamedQueryError, Result};
use crate::query::OutputKind;

/// Bundles each asset's source bytes under `customer/space/asset`.
///
/// Source bytes are read from object storage at the asset's storage
/// location. Assets with no stored source, or outside the customer's role
/// allowlist, are skipped. Each entry is passed to the sink before the next
/// asset is read, so at most one asset's bytes are held in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveGenerator;

#[async_trait]
impl ProjectionGenerator for ArchiveGenerator {
    fn kind(&self) -> OutputKind {
        OutputKind::Archive
    }

    async fn generate(
        &self,
        resolved: &ResolvedResult,
        ctx: &GenerationContext<'_>,
        sink: &mut dyn ArtifactSink,
    ) -> Result<GenerationSummary> {
        let gate = RoleGate::new(ctx.config.allowed_roles(resolved.query.customer));
        let mut builder = tar::Builder::new(Vec::new());
        builder.mode(tar::HeaderMode::Deterministic);

        let mut roles = BTreeSet::new();
        let mut entries = 0u64;
        let mut content_bytes = 0u64;
        let mut assets = resolved.assets_until_cancelled(ctx.cancel);
        while let Some(asset) = assets.try_next().await? {
            if !gate.permits(&asset) {
                tracing::debug!(asset = %asset.qualified_id(), "skipping restricted asset");
                continue;
            }
            let Some(location) = asset.storage_location.as_deref() else {
                tracing::warn!(asset = %asset.qualified_id(), "asset has no storage location");
                continue;
            };
            let data = match ctx.storage.get(location).await {
                Ok(data) => data,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        asset = %asset.qualified_id(),
                        location,
                        "asset source missing, skipping archive entry"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            ctx.cancel.check("archive entry")?;

            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, asset.qualified_id(), data.as_ref())
                .map_err(|e| NamedQueryError::generation(format!("archive entry: {e}")))?;
            let entry = std::mem::take(builder.get_mut());
            sink.write(Bytes::from(entry)).await?;

            gate.collect(&mut roles, &asset);
            entries += 1;
            content_bytes += data.len() as u64;
        }

        let trailer = builder
            .into_inner()
            .map_err(|e| NamedQueryError::generation(format!("archive finish: {e}")))?;
        sink.write(Bytes::from(trailer)).await?;
        tracing::debug!(entries, content_bytes, "archive generated");
        Ok(GenerationSummary {
            item_count: entries,
            roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectionConfig;
    use crate::generators::test_support::{asset, render, resolve, storage};
    use quarry_core::{CancelSignal, CustomerId, StorageBackend};
    use std::io::Read;

    const SOURCE: &str = "application/octet-stream";

    /// Keeps each chunk separately.
    #[derive(Default)]
    struct Chunks(Vec<Bytes>);

    #[async_trait]
    impl ArtifactSink for Chunks {
        async fn write(&mut self, chunk: Bytes) -> Result<()> {
            self.0.push(chunk);
            Ok(())
        }
    }

    fn entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, data)
            })
            .collect()
    }

    #[tokio::test]
    async fn bundles_sources_in_order_and_skips_missing() {
        let storage = storage();
        for id in ["a", "c"] {
            storage
                .put(
                    &format!("origin/42/4/{id}"),
                    Bytes::from(format!("bytes-of-{id}")),
                    SOURCE,
                )
                .await
                .unwrap();
        }
        let resolved = resolve(
            vec![asset("c", 3, &[]), asset("a", 1, &[]), asset("b", 2, &[])],
            OutputKind::Archive,
        )
        .await;
        let config = ProjectionConfig::default();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };

        let (bytes, summary) = render(&ArchiveGenerator, &resolved, &ctx).await.unwrap();
        let entries = entries(&bytes);
        assert_eq!(
            entries,
            vec![
                ("42/4/a".to_string(), b"bytes-of-a".to_vec()),
                ("42/4/c".to_string(), b"bytes-of-c".to_vec()),
            ]
        );
        assert_eq!(summary.item_count, 2);

        let (again, _) = render(&ArchiveGenerator, &resolved, &ctx).await.unwrap();
        assert_eq!(bytes, again);
    }

    #[tokio::test]
    async fn writes_each_entry_as_it_is_read() {
        let storage = storage();
        for id in ["a", "b"] {
            storage
                .put(&format!("origin/42/4/{id}"), Bytes::from("x".repeat(700)), SOURCE)
                .await
                .unwrap();
        }
        let resolved = resolve(vec![asset("a", 1, &[]), asset("b", 2, &[])], OutputKind::Archive).await;
        let config = ProjectionConfig::default();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };

        let mut chunks = Chunks::default();
        ArchiveGenerator.generate(&resolved, &ctx, &mut chunks).await.unwrap();
        // One chunk per entry plus the end-of-archive trailer.
        assert_eq!(chunks.0.len(), 3);
        assert!(chunks.0[..2].iter().all(|c| c.len() == 512 + 1024));
        assert!(chunks.0[2].iter().all(|b| *b == 0));

        let joined: Vec<u8> = chunks.0.concat();
        let (buffered, _) = render(&ArchiveGenerator, &resolved, &ctx).await.unwrap();
        assert_eq!(joined, buffered);
    }

    #[tokio::test]
    async fn skips_restricted_assets() {
        let storage = storage();
        for id in ["open", "staff"] {
            storage
                .put(&format!("origin/42/4/{id}"), Bytes::from("x"), SOURCE)
                .await
                .unwrap();
        }
        let resolved = resolve(
            vec![asset("open", 1, &["clickthrough"]), asset("staff", 2, &["staff"])],
            OutputKind::Archive,
        )
        .await;
        let mut config = ProjectionConfig::default();
        config
            .role_allowlists
            .insert(CustomerId::new(42), ["clickthrough".to_string()].into());
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };

        let (bytes, summary) = render(&ArchiveGenerator, &resolved, &ctx).await.unwrap();
        let names: Vec<_> = entries(&bytes).into_iter().map(|(p, _)| p).collect();
        assert_eq!(names, vec!["42/4/open"]);
        assert_eq!(
            summary.roles,
            ["clickthrough".to_string()].into()
        );
    }

    #[tokio::test]
    async fn empty_archive_is_valid() {
        let storage = storage();
        let resolved = resolve(vec![], OutputKind::Archive).await;
        let config = ProjectionConfig::default();
        let cancel = CancelSignal::never();
        let ctx = GenerationContext {
            config: &config,
            storage: &storage,
            cancel: &cancel,
        };
        let (bytes, summary) = render(&ArchiveGenerator, &resolved, &ctx).await.unwrap();
        assert_eq!(summary.item_count, 0);
        assert!(entries(&bytes).is_empty());
    }
}
