//! Configuration types for lecture ingestion.
//!
//! Two structs cover the two kinds of knobs:
//!
//! * [`PipelineConfig`] — how one PDF is linearised: output mode, image size
//!   threshold, inter-image throttle, vision model settings. Built via
//!   [`PipelineConfigBuilder`].
//! * [`ServiceConfig`] — where things go: blob storage and metadata store
//!   endpoints plus the service key. Loaded from the environment.
//!
//! Both are passed explicitly to the components that need them; nothing is
//! stored in process-wide state.

use crate::error::IngestError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Image byte threshold used by flattened (inline-token) mode.
pub const FLATTENED_MIN_IMAGE_BYTES: usize = 2048;

/// Image byte threshold used by structured (one image per page) mode.
pub const STRUCTURED_MIN_IMAGE_BYTES: usize = 5000;

/// Default page text for pages without any extractable text (structured mode).
pub const DEFAULT_EMPTY_PAGE_TEXT: &str = "No text on this slide.";

/// Configuration for one ingestion run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use lecture_ingest::{OutputMode, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .mode(OutputMode::Structured)
///     .image_delay_ms(500)
///     .build()
///     .unwrap();
/// assert_eq!(config.min_image_bytes(), 5000);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Flattened document string or structured page list. Default: flattened.
    pub mode: OutputMode,

    /// Minimum encoded image size in bytes. `None` uses the mode default
    /// (2048 flattened, 5000 structured).
    ///
    /// Logos, bullets and icons are tiny; anything below the threshold is
    /// dropped without calling storage or the vision model.
    pub min_image_bytes: Option<usize>,

    /// Fixed wait after each image enrichment, in milliseconds. Default: 1000.
    ///
    /// Throttles calls to the vision service so a slide deck with dozens of
    /// figures stays under provider rate limits.
    pub image_delay_ms: u64,

    /// Custom instruction prompt for image descriptions. If None, uses the
    /// built-in default.
    pub describe_prompt: Option<String>,

    /// Vision model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Vision provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Maximum tokens for one image description. Default: 500.
    pub max_tokens: usize,

    /// Sampling temperature for descriptions. Default: 0.2.
    pub temperature: f32,

    /// Upper bound on a single vision call, in seconds. Default: 60.
    ///
    /// There is no retry: one attempt per image, bounded by this timeout.
    pub api_timeout_secs: u64,

    /// Text stored for pages without text in structured mode.
    pub empty_page_text: String,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            min_image_bytes: None,
            image_delay_ms: 1000,
            describe_prompt: None,
            model: None,
            provider_name: None,
            provider: None,
            max_tokens: 500,
            temperature: 0.2,
            api_timeout_secs: 60,
            empty_page_text: DEFAULT_EMPTY_PAGE_TEXT.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mode", &self.mode)
            .field("min_image_bytes", &self.min_image_bytes())
            .field("image_delay_ms", &self.image_delay_ms)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective image threshold: the explicit value, else the mode default.
    pub fn min_image_bytes(&self) -> usize {
        self.min_image_bytes
            .unwrap_or_else(|| self.mode.default_min_image_bytes())
    }

    pub fn image_delay(&self) -> Duration {
        Duration::from_millis(self.image_delay_ms)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn min_image_bytes(mut self, bytes: usize) -> Self {
        self.config.min_image_bytes = Some(bytes);
        self
    }

    pub fn image_delay_ms(mut self, ms: u64) -> Self {
        self.config.image_delay_ms = ms;
        self
    }

    pub fn describe_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.describe_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn empty_page_text(mut self, text: impl Into<String>) -> Self {
        self.config.empty_page_text = text.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(IngestError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.empty_page_text.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "empty_page_text must not be blank".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Shape of the produced document.
///
/// | Mode | Content | Images |
/// |------|---------|--------|
/// | `Flattened` | one string, text + `<<SLIDE_IMAGE: …>>` tokens | every qualifying image, inline |
/// | `Structured` | JSON list of page records | at most one per page |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Interleaved text and inline image tokens. (default)
    #[default]
    Flattened,
    /// One record per page with text and an optional image.
    Structured,
}

impl OutputMode {
    pub fn default_min_image_bytes(self) -> usize {
        match self {
            OutputMode::Flattened => FLATTENED_MIN_IMAGE_BYTES,
            OutputMode::Structured => STRUCTURED_MIN_IMAGE_BYTES,
        }
    }
}

// ── Service endpoints ────────────────────────────────────────────────────

/// Default storage bucket for lecture images.
pub const DEFAULT_BUCKET: &str = "lecture-images";

/// Default metadata table.
pub const DEFAULT_TABLE: &str = "documents";

/// Endpoints and credentials for blob storage and the metadata store.
///
/// Both services live behind one Supabase-style base URL:
/// `/storage/v1/object/…` for blobs and `/rest/v1/<table>` for rows.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://xyz.supabase.co`. None disables both services.
    pub base_url: Option<String>,
    /// Service-role key sent as bearer token and `apikey` header.
    pub service_key: Option<String>,
    pub bucket: String,
    pub table: String,
    /// Per-request HTTP timeout in seconds. Default: 60.
    pub http_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            service_key: None,
            bucket: DEFAULT_BUCKET.to_string(),
            table: DEFAULT_TABLE.to_string(),
            http_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .field("bucket", &self.bucket)
            .field("table", &self.table)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl ServiceConfig {
    /// Config pointing at an explicit endpoint (tests, self-hosted setups).
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into().trim_end_matches('/').to_string()),
            service_key: Some(service_key.into()),
            ..Self::default()
        }
    }

    /// Load from the process environment, reading a `.env` file first if
    /// one exists.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `SUPABASE_URL` | `base_url` |
    /// | `SUPABASE_SERVICE_ROLE_KEY` | `service_key` |
    /// | `LECTURE_IMAGE_BUCKET` | `bucket` |
    /// | `LECTURE_DOCUMENTS_TABLE` | `table` |
    /// | `LECTURE_HTTP_TIMEOUT_SECS` | `http_timeout_secs` |
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            base_url: non_empty("SUPABASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            service_key: non_empty("SUPABASE_SERVICE_ROLE_KEY"),
            bucket: non_empty("LECTURE_IMAGE_BUCKET").unwrap_or(defaults.bucket),
            table: non_empty("LECTURE_DOCUMENTS_TABLE").unwrap_or(defaults.table),
            http_timeout_secs: non_empty("LECTURE_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
        }
    }

    /// Base URL and key, when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.base_url, &self.service_key) {
            (Some(url), Some(key)) => Some((url.as_str(), key.as_str())),
            _ => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn threshold_follows_mode_unless_explicit() {
        let flat = PipelineConfig::default();
        assert_eq!(flat.min_image_bytes(), 2048);

        let structured = PipelineConfig::builder()
            .mode(OutputMode::Structured)
            .build()
            .unwrap();
        assert_eq!(structured.min_image_bytes(), 5000);

        let explicit = PipelineConfig::builder()
            .mode(OutputMode::Structured)
            .min_image_bytes(10)
            .build()
            .unwrap();
        assert_eq!(explicit.min_image_bytes(), 10);
    }

    #[test]
    fn default_delay_is_one_second() {
        assert_eq!(PipelineConfig::default().image_delay(), Duration::from_secs(1));
    }

    #[test]
    fn build_rejects_zero_timeout() {
        let err = PipelineConfig::builder().api_timeout_secs(0).build();
        assert!(matches!(err, Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn build_rejects_blank_placeholder() {
        let err = PipelineConfig::builder().empty_page_text("  ").build();
        assert!(matches!(err, Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn service_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SUPABASE_URL", "https://demo.supabase.co/"),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
            ("LECTURE_HTTP_TIMEOUT_SECS", "15"),
        ]
        .into_iter()
        .collect();
        let cfg = ServiceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.base_url.as_deref(), Some("https://demo.supabase.co"));
        assert_eq!(cfg.bucket, DEFAULT_BUCKET);
        assert_eq!(cfg.table, DEFAULT_TABLE);
        assert_eq!(cfg.http_timeout_secs, 15);
        assert!(cfg.is_configured());
    }

    #[test]
    fn service_config_missing_key_is_unconfigured() {
        let cfg = ServiceConfig::from_lookup(|k| {
            (k == "SUPABASE_URL").then(|| "https://demo.supabase.co".to_string())
        });
        assert!(!cfg.is_configured());
    }

    #[test]
    fn debug_redacts_key() {
        let cfg = ServiceConfig::new("https://demo.supabase.co", "super-secret");
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
