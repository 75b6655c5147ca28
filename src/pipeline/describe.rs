//! Vision describer: image bytes → text description.
//!
//! One request per image, no retry. A failed call is reported as
//! [`EnrichmentError::DescriptionFailure`]; the linearizer turns it into a
//! bracketed marker so every image still gets a description field.

use crate::config::PipelineConfig;
use crate::error::{EnrichmentError, IngestError};
use crate::pipeline::encode::image_data;
use crate::prompts::DEFAULT_DESCRIBE_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default vision model when none is configured.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// Something that can describe an image.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Describe `bytes` (an encoded image of type `mime_type`).
    ///
    /// Returns the trimmed, non-empty description.
    async fn describe(&self, bytes: &[u8], mime_type: &str) -> Result<String, EnrichmentError>;
}

/// [`ImageDescriber`] backed by an `edgequake-llm` vision provider.
pub struct VisionDescriber {
    provider: Arc<dyn LLMProvider>,
    prompt: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl std::fmt::Debug for VisionDescriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionDescriber")
            .field("provider", &"<dyn LLMProvider>")
            .field("prompt", &self.prompt)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisionDescriber {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            prompt: config
                .describe_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_DESCRIBE_PROMPT.to_string()),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, IngestError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl ImageDescriber for VisionDescriber {
    async fn describe(&self, bytes: &[u8], mime_type: &str) -> Result<String, EnrichmentError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::user_with_images(
            self.prompt.as_str(),
            vec![image_data(bytes, mime_type)],
        )];

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Vision call failed: {}", e);
                return Err(EnrichmentError::DescriptionFailure {
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                warn!("Vision call timed out after {:?}", self.timeout);
                return Err(EnrichmentError::DescriptionFailure {
                    detail: format!("timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        debug!(
            "Described {} bytes in {:?} ({} output tokens)",
            bytes.len(),
            start.elapsed(),
            response.completion_tokens
        );
        non_empty(&response.content)
    }
}

/// Trim a model reply; an empty reply is a failure.
pub(crate) fn non_empty(content: &str) -> Result<String, EnrichmentError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(EnrichmentError::DescriptionFailure {
            detail: "empty response".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Where the vision provider comes from when none was handed in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProviderSource {
    Named { provider: String, model: String },
    AutoDetect,
}

/// Pick a provider source from the config, falling back to `env`.
///
/// An explicit `provider_name` wins over anything in the environment, so a
/// caller can pin a provider on a machine that has several API keys. The
/// `EDGEQUAKE_LLM_PROVIDER`/`EDGEQUAKE_MODEL` pair only counts when both
/// are set: it names its own model, and half of it would silently pair a
/// provider with a model it may not serve. A bare `OPENAI_API_KEY` selects
/// OpenAI with the configured (or default) vision model. Anything else is
/// left to `ProviderFactory::from_env`.
fn choose_provider_source(
    config: &PipelineConfig,
    env: impl Fn(&str) -> Option<String>,
) -> ProviderSource {
    let model = || {
        config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string())
    };
    let set = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(provider) = &config.provider_name {
        return ProviderSource::Named {
            provider: provider.clone(),
            model: model(),
        };
    }
    match (set("EDGEQUAKE_LLM_PROVIDER"), set("EDGEQUAKE_MODEL")) {
        (Some(provider), Some(model)) => ProviderSource::Named { provider, model },
        _ if set("OPENAI_API_KEY").is_some() => ProviderSource::Named {
            provider: "openai".to_string(),
            model: model(),
        },
        _ => ProviderSource::AutoDetect,
    }
}

/// The provider a [`VisionDescriber`] built from `config` will call.
///
/// A provider already set on the config is used as is; otherwise see
/// [`choose_provider_source`].
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }

    match choose_provider_source(config, |name| std::env::var(name).ok()) {
        ProviderSource::Named { provider, model } => {
            debug!("Using vision provider {} ({})", provider, model);
            create_vision_provider(&provider, &model)
        }
        ProviderSource::AutoDetect => ProviderFactory::from_env()
            .map(|(llm, _embedding)| llm)
            .map_err(|e| IngestError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "set OPENAI_API_KEY, or EDGEQUAKE_LLM_PROVIDER with EDGEQUAKE_MODEL ({})",
                    e
                ),
            }),
    }
}
