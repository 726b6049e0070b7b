//! Get-or-build orchestration for named-query projections.
//!
//! [`ProjectionService::get_or_build`] drives the per-key state machine held in
//! the control record:
//!
//! - **Ready** (`exists`): return a handle to the stored artifact. Nothing is
//!   resolved or generated.
//! - **Building** (`inProcess`, fresh): report [`BuildOutcome::Pending`],
//!   optionally after polling for up to `pending_wait`.
//! - **Absent**, or **Building** past the stale threshold: mark building,
//!   resolve, generate, store the artifact, then complete the record.
//!
//! Every build streams its artifact to a path of its own, derived from its
//! [`BuildId`], and the completed record names that path. A failed or
//! cancelled build never completes the record. It deletes only the bytes it
//! wrote, and the record stays `inProcess` so the next caller after the stale
//! threshold retries. Raw-list requests bypass the control record entirely.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use quarry_core::observability::projection_span;
use quarry_core::{BuildId, CancelSignal, StorageBackend};
use tracing::Instrument;

use crate::cache_key::CacheKey;
use crate::catalog::{AssetCatalog, CustomerResolver, MemoryCatalog, NamedQueryStore};
use crate::conductor::{Conductor, ResolvedResult};
use crate::config::ProjectionConfig;
use crate::control_file::{ControlFile, ControlFileStore};
use crate::error::{NamedQueryError, Result};
use crate::generators::{GenerationContext, GenerationSummary, generator_for};
use crate::metrics::{self, BuildOutcomeLabel};
use crate::parser::{QueryArgs, TemplateParser, validate_query_name};
use crate::query::{OutputKind, ParsedQuery};

/// A request for one projection of a named query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionRequest {
    /// Customer path token: numeric id or customer name.
    pub customer: String,
    /// Named query name.
    pub query_name: String,
    /// Request arguments.
    pub args: QueryArgs,
    /// Requested output kind.
    pub kind: OutputKind,
}

impl ProjectionRequest {
    /// Creates a request with no arguments.
    #[must_use]
    pub fn new(customer: impl Into<String>, query_name: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            customer: customer.into(),
            query_name: query_name.into(),
            args: QueryArgs::new(),
            kind,
        }
    }

    /// Sets the request arguments.
    #[must_use]
    pub fn with_args(mut self, args: QueryArgs) -> Self {
        self.args = args;
        self
    }
}

/// Reference to a stored, complete artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    /// Cache key of the artifact.
    pub key: CacheKey,
    /// Storage key of the artifact bytes.
    pub path: String,
    /// MIME type of the artifact.
    pub content_type: &'static str,
    /// Suggested file name for downloads.
    pub download_name: String,
    /// Number of assets in the artifact.
    pub item_count: u64,
    /// Artifact size in bytes.
    pub size_bytes: u64,
    /// Roles a caller must hold to view the artifact.
    pub roles: BTreeSet<String>,
    /// When the artifact was completed.
    pub created: Option<DateTime<Utc>>,
}

impl ArtifactHandle {
    /// Returns true if viewing the artifact needs an access-role check.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        !self.roles.is_empty()
    }
}

/// A projection produced without persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineArtifact {
    /// MIME type of the bytes.
    pub content_type: &'static str,
    /// Serialized projection.
    pub bytes: Bytes,
    /// Number of assets represented.
    pub item_count: u64,
}

/// Result of [`ProjectionService::get_or_build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The artifact is stored and complete.
    Ready(ArtifactHandle),
    /// Another caller is building the artifact.
    Pending {
        /// Cache key being built.
        key: CacheKey,
        /// When the in-flight build started.
        started: Option<DateTime<Utc>>,
        /// Seconds until the in-flight build would be considered stale.
        retry_after_secs: u64,
    },
    /// A raw-list projection, generated on every request.
    Inline(InlineArtifact),
}

impl BuildOutcome {
    /// The ready artifact, if any.
    #[must_use]
    pub fn as_ready(&self) -> Option<&ArtifactHandle> {
        match self {
            Self::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    /// Returns true for [`BuildOutcome::Pending`].
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

/// Resolves named queries and serves their projections from cache or by building them.
#[derive(Clone)]
pub struct ProjectionService {
    customers: Arc<dyn CustomerResolver>,
    queries: Arc<dyn NamedQueryStore>,
    conductor: Conductor,
    storage: Arc<dyn StorageBackend>,
    control: ControlFileStore,
    parser: TemplateParser,
    config: ProjectionConfig,
}

impl std::fmt::Debug for ProjectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProjectionService {
    /// Creates a service from its collaborators.
    #[must_use]
    pub fn new(
        customers: Arc<dyn CustomerResolver>,
        queries: Arc<dyn NamedQueryStore>,
        catalog: Arc<dyn AssetCatalog>,
        storage: Arc<dyn StorageBackend>,
        config: ProjectionConfig,
    ) -> Self {
        Self {
            customers,
            queries,
            conductor: Conductor::new(catalog),
            control: ControlFileStore::new(Arc::clone(&storage)),
            storage,
            parser: TemplateParser::new(),
            config,
        }
    }

    /// Creates a service whose customers, queries and assets all come from `catalog`.
    #[must_use]
    pub fn from_catalog(
        catalog: Arc<MemoryCatalog>,
        storage: Arc<dyn StorageBackend>,
        config: ProjectionConfig,
    ) -> Self {
        Self::new(
            Arc::clone(&catalog) as Arc<dyn CustomerResolver>,
            Arc::clone(&catalog) as Arc<dyn NamedQueryStore>,
            catalog,
            storage,
            config,
        )
    }

    /// The service configuration.
    #[must_use]
    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Resolves the customer and stored template and parses the request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown customer or query, or `Template` when
    /// the arguments do not satisfy the template.
    pub async fn parse(&self, request: &ProjectionRequest) -> Result<ParsedQuery> {
        validate_query_name(&request.query_name)?;
        let customer = self
            .customers
            .resolve_customer(&request.customer)
            .await?
            .ok_or_else(|| NamedQueryError::customer_not_found(&request.customer))?;
        let record = self
            .queries
            .get_named_query(customer.id, &request.query_name)
            .await?
            .ok_or_else(|| NamedQueryError::query_not_found(&request.query_name))?;
        let query = self.parser.parse(
            customer.id,
            &record.name,
            &record.template,
            &request.args,
            request.kind,
        )?;
        Ok(query)
    }

    /// Resolves a named query without generating or storing anything.
    ///
    /// # Errors
    ///
    /// See [`ProjectionService::parse`]; also `Cancelled` or a catalog error.
    pub async fn resolve_only(
        &self,
        customer: &str,
        query_name: &str,
        args: &QueryArgs,
        cancel: &CancelSignal,
    ) -> Result<ResolvedResult> {
        let request = ProjectionRequest::new(customer, query_name, OutputKind::RawList)
            .with_args(args.clone());
        let query = self.parse(&request).await?;
        self.conductor.resolve(&query, cancel).await
    }

    /// Returns the stored artifact, builds it, or reports an in-flight build.
    ///
    /// # Errors
    ///
    /// Client-input and not-found errors are returned before any control
    /// record is touched. Build failures are wrapped in
    /// [`NamedQueryError::BuildFailed`] carrying a correlation id.
    pub async fn get_or_build(
        &self,
        request: &ProjectionRequest,
        cancel: &CancelSignal,
    ) -> Result<BuildOutcome> {
        let span = projection_span("get_or_build", &request.customer, &request.query_name);
        self.get_or_build_inner(request, cancel).instrument(span).await
    }

    async fn get_or_build_inner(
        &self,
        request: &ProjectionRequest,
        cancel: &CancelSignal,
    ) -> Result<BuildOutcome> {
        cancel.check("get_or_build")?;
        let query = self.parse(request).await?;
        let kind = query.kind();
        if !kind.is_persisted() {
            return self.build_inline(&query, cancel).await.map(BuildOutcome::Inline);
        }

        let key = CacheKey::derive(&query)?;
        let threshold = self.config.stale_threshold_chrono();
        // `None` when the wait overflows the clock; the wait is then unbounded.
        let deadline = tokio::time::Instant::now().checked_add(self.config.pending_wait);

        loop {
            let file = self.control.get(&key).await;

            if file.exists {
                metrics::record_cache_hit(kind);
                tracing::debug!(key = %key, "serving stored artifact");
                return Ok(BuildOutcome::Ready(self.handle(&key, &query, &file)));
            }

            if file.in_process && !file.is_stale(threshold) {
                let now = tokio::time::Instant::now();
                let remaining = match deadline {
                    Some(deadline) => deadline.checked_duration_since(now).filter(|d| !d.is_zero()),
                    None => Some(self.config.poll_interval),
                };
                if let Some(remaining) = remaining {
                    let nap = self.config.poll_interval.min(remaining);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Err(quarry_core::Error::cancelled("pending wait").into());
                        }
                        () = tokio::time::sleep(nap) => continue,
                    }
                }
                metrics::record_pending(kind);
                let retry_after_secs = file.retry_after_secs_at(Utc::now(), threshold);
                tracing::info!(key = %key, retry_after_secs, "build already in progress");
                return Ok(BuildOutcome::Pending {
                    key,
                    started: file.created,
                    retry_after_secs,
                });
            }

            if file.in_process {
                metrics::record_stale_takeover(kind);
                tracing::warn!(
                    key = %key,
                    started = ?file.created,
                    attempt = file.attempt,
                    "taking over stale build"
                );
            }
            let attempt = file.attempt.saturating_add(1);
            return self
                .build(&key, &query, attempt, cancel)
                .await
                .map(BuildOutcome::Ready);
        }
    }

    async fn build(
        &self,
        key: &CacheKey,
        query: &ParsedQuery,
        attempt: u32,
        cancel: &CancelSignal,
    ) -> Result<ArtifactHandle> {
        let build_id = BuildId::generate();
        let artifact = key.artifact_path(&build_id);
        tracing::Span::current().record("build_id", tracing::field::display(&build_id));
        tracing::info!(key = %key, attempt, "starting projection build");

        let started = Instant::now();
        let result = self.run_build(key, &artifact, query, attempt, cancel).await;
        let elapsed = started.elapsed().as_secs_f64();
        let kind = query.kind();

        match result {
            Ok(file) => {
                metrics::record_build(kind, BuildOutcomeLabel::Success, elapsed);
                tracing::info!(
                    item_count = file.item_count,
                    size_bytes = file.size_bytes,
                    elapsed_secs = elapsed,
                    "projection build complete"
                );
                Ok(self.handle(key, query, &file))
            }
            Err(err) => {
                self.discard_partial(key, &artifact).await;
                if err.is_cancelled() {
                    metrics::record_build(kind, BuildOutcomeLabel::Cancelled, elapsed);
                    tracing::warn!(key = %key, "projection build cancelled");
                    return Err(err);
                }
                metrics::record_build(kind, BuildOutcomeLabel::Failure, elapsed);
                tracing::error!(
                    key = %key,
                    correlation_id = %build_id,
                    error = %err,
                    "projection build failed"
                );
                Err(NamedQueryError::BuildFailed {
                    correlation_id: build_id,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn run_build(
        &self,
        key: &CacheKey,
        artifact: &str,
        query: &ParsedQuery,
        attempt: u32,
        cancel: &CancelSignal,
    ) -> Result<ControlFile> {
        self.control.mark_building(key, artifact, attempt).await?;
        let resolved = self.conductor.resolve(query, cancel).await?;
        let (summary, size_bytes) = self.write_artifact(artifact, &resolved, cancel).await?;

        cancel.check("control record completion")?;
        self.control
            .complete(key, artifact, summary.item_count, size_bytes, summary.roles, attempt)
            .await
    }

    /// Streams the generated artifact to `path`. Nothing is stored under
    /// `path` unless generation finished and cancellation was not requested.
    async fn write_artifact(
        &self,
        path: &str,
        resolved: &ResolvedResult,
        cancel: &CancelSignal,
    ) -> Result<(GenerationSummary, u64)> {
        let kind = resolved.query.kind();
        let ctx = GenerationContext {
            config: &self.config,
            storage: self.storage.as_ref(),
            cancel,
        };
        let mut writer = self.storage.writer(path, kind.content_type()).await?;
        let generated = generator_for(kind)
            .generate(resolved, &ctx, &mut writer)
            .await
            .and_then(|summary| {
                cancel.check("artifact write")?;
                Ok(summary)
            });
        let summary = match generated {
            Ok(summary) => summary,
            Err(e) => {
                writer.abort().await;
                return Err(e);
            }
        };
        let meta = writer.finish().await?;
        Ok((summary, meta.size))
    }

    /// Deletes the artifact a failed build wrote, unless the control record
    /// has since been completed with that same artifact.
    async fn discard_partial(&self, key: &CacheKey, artifact: &str) {
        let current = self.control.get(key).await;
        if current.exists && current.key == artifact {
            tracing::debug!(key = %key, "artifact already completed; keeping it");
            return;
        }
        if let Err(e) = self.storage.delete(artifact).await {
            tracing::warn!(key = %key, error = %e, "failed to discard partial artifact");
        }
    }

    async fn build_inline(&self, query: &ParsedQuery, cancel: &CancelSignal) -> Result<InlineArtifact> {
        let resolved = self.conductor.resolve(query, cancel).await?;
        let ctx = GenerationContext {
            config: &self.config,
            storage: self.storage.as_ref(),
            cancel,
        };
        let kind = query.kind();
        let mut bytes = Vec::new();
        let summary = generator_for(kind).generate(&resolved, &ctx, &mut bytes).await?;
        Ok(InlineArtifact {
            content_type: kind.content_type(),
            bytes: Bytes::from(bytes),
            item_count: summary.item_count,
        })
    }

    fn handle(&self, key: &CacheKey, query: &ParsedQuery, file: &ControlFile) -> ArtifactHandle {
        let kind = query.kind();
        let name = query
            .options
            .object_name()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.config.default_object_name);
        ArtifactHandle {
            key: key.clone(),
            path: file.key.clone(),
            content_type: kind.content_type(),
            download_name: format!("{name}.{}", kind.extension()),
            item_count: file.item_count,
            size_bytes: file.size_bytes,
            roles: file.roles.clone(),
            created: file.created,
        }
    }

    /// Reads the bytes of a ready artifact.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the artifact cannot be read.
    pub async fn read_artifact(&self, handle: &ArtifactHandle) -> Result<Bytes> {
        Ok(self.storage.get(&handle.path).await?)
    }

    /// Returns the control record for a request, or the empty sentinel.
    ///
    /// Raw-list requests have no control record.
    ///
    /// # Errors
    ///
    /// See [`ProjectionService::parse`].
    pub async fn control_file(&self, request: &ProjectionRequest) -> Result<ControlFile> {
        let query = self.parse(request).await?;
        if !query.kind().is_persisted() {
            return Ok(ControlFile::empty());
        }
        Ok(self.control.get(&CacheKey::derive(&query)?).await)
    }

    /// Drops the cached projection for a request so the next call rebuilds it.
    ///
    /// The control record is removed before the artifact it names, so no
    /// reader can see a ready record without its bytes. Artifacts of builds in
    /// flight are left to their builders.
    ///
    /// # Errors
    ///
    /// See [`ProjectionService::parse`]; also `Storage` if a delete fails.
    pub async fn invalidate(&self, request: &ProjectionRequest) -> Result<()> {
        let query = self.parse(request).await?;
        if !query.kind().is_persisted() {
            return Ok(());
        }
        let key = CacheKey::derive(&query)?;
        let current = self.control.get(&key).await;
        self.storage.delete(&key.control_path()).await?;
        if current.exists && current.key.starts_with(&key.artifact_prefix()) {
            self.storage.delete(&current.key).await?;
        }
        tracing::info!(key = %key, "projection invalidated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Asset, NamedQueryRecord};
    use quarry_core::{CustomerContext, CustomerId, MemoryBackend};

    fn service() -> (ProjectionService, Arc<MemoryBackend>) {
        let customer = CustomerId::new(42);
        let mut catalog = MemoryCatalog::new()
            .with_customer(CustomerContext::new(customer, "acme"))
            .with_query(NamedQueryRecord {
                name: "by-space".into(),
                customer,
                template: "space=p1&objectname=Space {space}".into(),
                global: false,
            });
        for (id, ordinal) in [("a", 1), ("b", 2)] {
            let mut asset = Asset::new(customer, 4, id);
            asset.ordinal = ordinal;
            catalog = catalog.with_asset(asset);
        }
        let storage = Arc::new(MemoryBackend::new());
        let service = ProjectionService::from_catalog(
            Arc::new(catalog),
            Arc::clone(&storage) as Arc<dyn StorageBackend>,
            ProjectionConfig::default(),
        );
        (service, storage)
    }

    fn request(kind: OutputKind) -> ProjectionRequest {
        ProjectionRequest::new("acme", "by-space", kind).with_args(QueryArgs::from_path("4"))
    }

    #[tokio::test]
    async fn builds_then_serves_from_cache() {
        let (service, _storage) = service();
        let cancel = CancelSignal::never();

        let first = service.get_or_build(&request(OutputKind::Archive), &cancel).await.unwrap();
        let handle = first.as_ready().unwrap().clone();
        assert_eq!(handle.download_name, "Space 4.tar");
        assert_eq!(handle.content_type, "application/x-tar");

        let second = service.get_or_build(&request(OutputKind::Archive), &cancel).await.unwrap();
        assert_eq!(second.as_ready().unwrap().path, handle.path);
        assert_eq!(second.as_ready().unwrap().created, handle.created);
    }

    #[tokio::test]
    async fn unknown_names_are_not_found() {
        let (service, _storage) = service();
        let cancel = CancelSignal::never();
        let err = service
            .get_or_build(&ProjectionRequest::new("nobody", "by-space", OutputKind::Document), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::NotFound);

        let err = service
            .get_or_build(&ProjectionRequest::new("42", "missing", OutputKind::Document), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "named query not found: missing");
    }

    #[tokio::test]
    async fn missing_argument_is_client_input_and_touches_nothing() {
        let (service, storage) = service();
        let err = service
            .get_or_build(
                &ProjectionRequest::new("42", "by-space", OutputKind::Document),
                &CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::ClientInput);
        assert!(storage.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let (service, storage) = service();
        let cancel = CancelSignal::never();
        let req = request(OutputKind::Manifest);
        service.get_or_build(&req, &cancel).await.unwrap();
        assert!(service.control_file(&req).await.unwrap().exists);

        let built = service.control_file(&req).await.unwrap();
        service.invalidate(&req).await.unwrap();
        assert!(service.control_file(&req).await.unwrap().is_empty());
        assert!(!storage.exists(&built.key).await.unwrap());

        let rebuilt = service.get_or_build(&req, &cancel).await.unwrap();
        assert_eq!(rebuilt.as_ready().unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn resolve_only_returns_ordered_assets() {
        let (service, storage) = service();
        let cancel = CancelSignal::never();
        let resolved = service
            .resolve_only("42", "by-space", &QueryArgs::from_path("4"), &cancel)
            .await
            .unwrap();
        assert_eq!(resolved.total, 2);
        let ids: Vec<_> = resolved
            .collect_assets(&cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(storage.list("").await.unwrap().is_empty());
    }
}
