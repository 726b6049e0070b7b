//! Projection generators, one per [`OutputKind`].
//!
//! Each generator walks a [`ResolvedResult`] in order, one asset at a time,
//! writes artifact bytes into an [`ArtifactSink`] as it goes, and returns a
//! summary that the control record stores. Archives and documents emit each
//! asset's bytes as soon as they are produced; manifests and raw lists are a
//! single JSON value and are written once. Output is a pure function of the
//! resolved assets and configuration, so rebuilding from the same catalog
//! state yields identical bytes.

mod archive;
mod document;
mod manifest;
mod pdf;
mod raw;

pub use archive::ArchiveGenerator;
pub use document::DocumentGenerator;
pub use manifest::ManifestGenerator;
pub use raw::RawListGenerator;

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use quarry_core::{CancelSignal, ObjectWriter, StorageBackend};

use crate::catalog::Asset;
use crate::config::ProjectionConfig;
use crate::conductor::ResolvedResult;
use crate::error::Result;
use crate::query::OutputKind;

/// Inputs shared by all generators.
pub struct GenerationContext<'a> {
    /// Engine configuration.
    pub config: &'a ProjectionConfig,
    /// Object storage holding asset source bytes.
    pub storage: &'a dyn StorageBackend,
    /// Cancellation, checked once per asset.
    pub cancel: &'a CancelSignal,
}

impl std::fmt::Debug for GenerationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationContext")
            .field("config", self.config)
            .field("cancel", self.cancel)
            .finish_non_exhaustive()
    }
}

/// What a generator reports about its artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Number of assets represented.
    pub item_count: u64,
    /// Roles required to view the artifact.
    pub roles: BTreeSet<String>,
}

/// Destination for artifact bytes as a generator produces them.
#[async_trait]
pub trait ArtifactSink: Send {
    /// Appends `chunk` to the artifact.
    async fn write(&mut self, chunk: Bytes) -> Result<()>;
}

#[async_trait]
impl ArtifactSink for Vec<u8> {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

#[async_trait]
impl ArtifactSink for Box<dyn ObjectWriter> {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        ObjectWriter::write(&mut **self, chunk).await?;
        Ok(())
    }
}

/// Turns resolved assets into artifact bytes.
#[async_trait]
pub trait ProjectionGenerator: Send + Sync {
    /// The kind this generator produces.
    fn kind(&self) -> OutputKind;

    /// Writes the artifact for `resolved` into `sink`.
    ///
    /// On error the sink holds a partial artifact and must be discarded.
    async fn generate(
        &self,
        resolved: &ResolvedResult,
        ctx: &GenerationContext<'_>,
        sink: &mut dyn ArtifactSink,
    ) -> Result<GenerationSummary>;
}

static DOCUMENT: DocumentGenerator = DocumentGenerator;
static ARCHIVE: ArchiveGenerator = ArchiveGenerator;
static MANIFEST: ManifestGenerator = ManifestGenerator;
static RAW_LIST: RawListGenerator = RawListGenerator;

/// Returns the generator for `kind`.
#[must_use]
pub fn generator_for(kind: OutputKind) -> &'static dyn ProjectionGenerator {
    match kind {
        OutputKind::Document => &DOCUMENT,
        OutputKind::Archive => &ARCHIVE,
        OutputKind::Manifest => &MANIFEST,
        OutputKind::RawList => &RAW_LIST,
    }
}

/// Per-customer role filter applied while generating.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RoleGate<'a> {
    allowlist: Option<&'a BTreeSet<String>>,
}

impl<'a> RoleGate<'a> {
    pub(crate) fn new(allowlist: Option<&'a BTreeSet<String>>) -> Self {
        Self { allowlist }
    }

    /// An asset may be included if every role it requires is allowed.
    pub(crate) fn permits(&self, asset: &Asset) -> bool {
        self.allowlist
            .is_none_or(|allowed| asset.roles.iter().all(|r| allowed.contains(r)))
    }

    /// Adds an included asset's roles to the artifact role set.
    pub(crate) fn collect(&self, roles: &mut BTreeSet<String>, asset: &Asset) {
        roles.extend(
            asset
                .roles
                .iter()
                .filter(|r| self.allowlist.is_none_or(|allowed| allowed.contains(*r)))
                .cloned(),
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use quarry_core::{CustomerId, MemoryBackend};

    use super::{GenerationContext, GenerationSummary, ProjectionGenerator};
    use crate::catalog::{Asset, MemoryCatalog};
    use crate::conductor::{Conductor, ResolvedResult};
    use crate::error::Result;
    use crate::query::{OutputKind, ParsedQuery};

    pub(crate) fn asset(id: &str, ordinal: i64, roles: &[&str]) -> Asset {
        let mut asset = Asset::new(CustomerId::new(42), 4, id);
        asset.ordinal = ordinal;
        asset.width = Some(1000);
        asset.height = Some(1500);
        asset.storage_location = Some(format!("origin/42/4/{id}"));
        asset.roles = roles.iter().map(|r| (*r).to_string()).collect();
        asset
    }

    pub(crate) async fn resolve(assets: Vec<Asset>, kind: OutputKind) -> ResolvedResult {
        let mut catalog = MemoryCatalog::new();
        for a in assets {
            catalog = catalog.with_asset(a);
        }
        let mut query = ParsedQuery::new(CustomerId::new(42), "test", kind);
        query.space = Some(4);
        Conductor::new(Arc::new(catalog))
            .resolve(&query, &quarry_core::CancelSignal::never())
            .await
            .unwrap()
    }

    pub(crate) fn storage() -> MemoryBackend {
        MemoryBackend::new()
    }

    /// Generates into memory, returning the bytes and the summary.
    pub(crate) async fn render(
        generator: &dyn ProjectionGenerator,
        resolved: &ResolvedResult,
        ctx: &GenerationContext<'_>,
    ) -> Result<(Vec<u8>, GenerationSummary)> {
        let mut bytes = Vec::new();
        let summary = generator.generate(resolved, ctx, &mut bytes).await?;
        Ok((bytes, summary))
    }
}
