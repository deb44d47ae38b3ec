//! Downstream model providers.
//!
//! - `registry`: catalog with cost, quality and health, read by the router
//! - `traits`: the adapter capability the dispatcher invokes
//! - `mock`, `openai`, `anthropic`: interchangeable adapter implementations
//! - `health`: optional background probe feeding the registry

pub mod anthropic;
pub mod health;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod traits;

pub use anthropic::AnthropicAdapter;
pub use mock::MockAdapter;
pub use openai::OpenAiCompatibleAdapter;
pub use registry::{HealthStatus, Provider, ProviderRegistry};
pub use traits::{Completion, ProviderAdapter};

use crate::config::{ProviderConfig, ProviderKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Adapters keyed by provider id.
pub type AdapterSet = HashMap<String, Arc<dyn ProviderAdapter>>;

/// Build the adapter for one configured provider.
pub fn create_adapter(config: &ProviderConfig) -> Arc<dyn ProviderAdapter> {
    let id = config.id.trim().to_string();
    let model = config.model.clone().unwrap_or_else(|| id.clone());
    let api_key = config
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .filter(|key| !key.trim().is_empty());

    if config.kind != ProviderKind::Mock && api_key.is_none() {
        tracing::warn!(provider_id = %id, "No API key found for provider");
    }

    match config.kind {
        ProviderKind::Mock => Arc::new(
            MockAdapter::new(id, model, config.mock_units_per_word)
                .with_latency(Duration::from_millis(config.mock_latency_ms)),
        ),
        ProviderKind::OpenaiCompatible => Arc::new(OpenAiCompatibleAdapter::new(
            id,
            model,
            config.base_url.as_deref(),
            api_key,
            config.max_output_tokens,
        )),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(
            id,
            model,
            config.base_url.as_deref(),
            api_key,
            config.max_output_tokens,
        )),
    }
}

pub fn create_adapters(configs: &[ProviderConfig]) -> AdapterSet {
    configs
        .iter()
        .map(|config| {
            let adapter = create_adapter(config);
            (adapter.id().to_string(), adapter)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn adapters_follow_config_ids() {
        let config = Config::default();
        let adapters = create_adapters(&config.providers);
        assert_eq!(adapters.len(), 2);
        assert_eq!(adapters["openai"].id(), "openai");
        assert_eq!(adapters["anthropic"].id(), "anthropic");
    }

    #[tokio::test]
    async fn default_mocks_use_their_own_rates() {
        let config = Config::default();
        let adapters = create_adapters(&config.providers);
        let prompt = "a b c d e f g h i j";
        assert_eq!(adapters["openai"].invoke(prompt).await.unwrap().output_units, 13);
        assert_eq!(adapters["anthropic"].invoke(prompt).await.unwrap().output_units, 12);
    }

    #[test]
    fn remote_kinds_build_without_keys() {
        let mut config = Config::default();
        config.providers[0].kind = ProviderKind::OpenaiCompatible;
        config.providers[0].api_key_env = Some("INSTACLAW_TEST_UNSET_KEY_VAR".into());
        config.providers[1].kind = ProviderKind::Anthropic;
        let adapters = create_adapters(&config.providers);
        assert_eq!(adapters.len(), 2);
    }
}
