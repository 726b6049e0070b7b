//! Projection engine configuration.
//!
//! Values come from defaults overridden by `QUARRY_*` environment variables.
//! [`ProjectionConfig::from_lookup`] takes any key lookup so tests do not need
//! to touch the process environment.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use quarry_core::{CustomerId, Error, Result};

/// Default age after which an in-progress build is considered abandoned.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(600);

/// Default interval between control-record polls while waiting on a build.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default download name for documents and archives.
pub const DEFAULT_OBJECT_NAME: &str = "Untitled";

/// Default text on redacted document pages.
pub const DEFAULT_REDACTED_MESSAGE: &str = "This item is not available in this document.";

/// Configuration for [`crate::facade::ProjectionService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionConfig {
    /// In-progress builds older than this are taken over.
    pub stale_threshold: Duration,
    /// How long `get_or_build` waits on another caller's build before
    /// reporting it as pending. Zero reports immediately.
    pub pending_wait: Duration,
    /// Poll interval while waiting.
    pub poll_interval: Duration,
    /// Root URL of the image service referenced by manifests.
    pub image_service_base: String,
    /// Root URL of thumbnails referenced by manifests.
    pub thumbnail_base: String,
    /// Root URL of audio/video renderings referenced by manifests.
    pub av_base: String,
    /// Download name when a query sets none.
    pub default_object_name: String,
    /// Text on redacted document pages when a query sets none.
    pub redacted_message: String,
    /// Per-customer allowed roles. Assets requiring other roles are redacted.
    pub role_allowlists: BTreeMap<CustomerId, BTreeSet<String>>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            pending_wait: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            image_service_base: "https://iiif.example.org/iiif-img".to_string(),
            thumbnail_base: "https://iiif.example.org/thumbs".to_string(),
            av_base: "https://iiif.example.org/iiif-av".to_string(),
            default_object_name: DEFAULT_OBJECT_NAME.to_string(),
            redacted_message: DEFAULT_REDACTED_MESSAGE.to_string(),
            role_allowlists: BTreeMap::new(),
        }
    }
}

impl ProjectionConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `QUARRY_CONTROL_STALE_SECS`
    /// - `QUARRY_PENDING_WAIT_MS`
    /// - `QUARRY_PENDING_POLL_MS`
    /// - `QUARRY_IMAGE_SERVICE_BASE`, `QUARRY_THUMBNAIL_BASE`, `QUARRY_AV_BASE`
    /// - `QUARRY_DEFAULT_OBJECT_NAME`, `QUARRY_REDACTED_MESSAGE`
    /// - `QUARRY_ROLE_ALLOWLISTS` (`42=role-a,role-b;7=role-c`)
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is malformed or the result fails
    /// validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ProjectionConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Lookup(lookup);
        let mut config = Self::default();

        if let Some(secs) = env.u64("QUARRY_CONTROL_STALE_SECS")? {
            config.stale_threshold = Duration::from_secs(secs);
        }
        if let Some(ms) = env.u64("QUARRY_PENDING_WAIT_MS")? {
            config.pending_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = env.u64("QUARRY_PENDING_POLL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = env.string("QUARRY_IMAGE_SERVICE_BASE") {
            config.image_service_base = v;
        }
        if let Some(v) = env.string("QUARRY_THUMBNAIL_BASE") {
            config.thumbnail_base = v;
        }
        if let Some(v) = env.string("QUARRY_AV_BASE") {
            config.av_base = v;
        }
        if let Some(v) = env.string("QUARRY_DEFAULT_OBJECT_NAME") {
            config.default_object_name = v;
        }
        if let Some(v) = env.string("QUARRY_REDACTED_MESSAGE") {
            config.redacted_message = v;
        }
        if let Some(v) = env.string("QUARRY_ROLE_ALLOWLISTS") {
            config.role_allowlists = parse_role_allowlists(&v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants between fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.stale_threshold.is_zero() {
            return Err(Error::InvalidInput(
                "QUARRY_CONTROL_STALE_SECS must be greater than 0".to_string(),
            ));
        }
        if !self.pending_wait.is_zero() && self.poll_interval.is_zero() {
            return Err(Error::InvalidInput(
                "QUARRY_PENDING_POLL_MS must be greater than 0 when QUARRY_PENDING_WAIT_MS is set"
                    .to_string(),
            ));
        }
        if self.pending_wait > self.stale_threshold {
            return Err(Error::InvalidInput(
                "QUARRY_PENDING_WAIT_MS must not exceed QUARRY_CONTROL_STALE_SECS".to_string(),
            ));
        }
        Ok(())
    }

    /// Stale threshold as a `chrono` duration.
    #[must_use]
    pub fn stale_threshold_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_threshold).unwrap_or(chrono::Duration::MAX)
    }

    /// Allowed roles for `customer`, if an allowlist is configured.
    #[must_use]
    pub fn allowed_roles(&self, customer: CustomerId) -> Option<&BTreeSet<String>> {
        self.role_allowlists.get(&customer)
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }
}

/// Parses `42=role-a,role-b;7=role-c`.
fn parse_role_allowlists(value: &str) -> Result<BTreeMap<CustomerId, BTreeSet<String>>> {
    let mut out = BTreeMap::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (customer, roles) = entry.split_once('=').ok_or_else(|| {
            Error::InvalidInput(format!(
                "QUARRY_ROLE_ALLOWLISTS entry '{entry}' must be customer=role[,role...]"
            ))
        })?;
        let customer: CustomerId = customer.parse()?;
        let roles: BTreeSet<String> = roles
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        out.insert(customer, roles);
    }
    Ok(out)
}
