use std::sync::Arc;

use crate::config::AiConfig;
use crate::models::conversation::LlmMode;
use crate::services::llm::LlmProvider;
use crate::services::llm::cloud::CloudProvider;
use crate::services::llm::local::LocalProvider;

/// Process-scoped provider registry built once at startup. Handlers resolve
/// `(llm_mode, cloud_model?)` to a provider handle; nothing here is global
/// mutable state.
pub struct LlmRouter {
    config: AiConfig,
    cloud: Arc<dyn LlmProvider>,
    local: Arc<dyn LlmProvider>,
}

impl LlmRouter {
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            config: config.clone(),
            cloud: Arc::new(CloudProvider::new(config)),
            local: Arc::new(LocalProvider::new(config)),
        }
    }

    /// Router over caller-supplied providers. Tests use this to swap in
    /// scripted providers; embedders and the arbiter are unaffected.
    pub fn with_providers(
        config: AiConfig,
        cloud: Arc<dyn LlmProvider>,
        local: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            config,
            cloud,
            local,
        }
    }

    pub fn provider_for(
        &self,
        mode: LlmMode,
        cloud_model: Option<&str>,
    ) -> Arc<dyn LlmProvider> {
        match mode {
            LlmMode::Local => self.local.clone(),
            LlmMode::Cloud => match cloud_model {
                Some(model) if model != self.config.cloud_model => {
                    Arc::new(CloudProvider::new(&self.config).with_model(model))
                }
                _ => self.cloud.clone(),
            },
        }
    }

    /// Prompt budget in bytes of chunk text for a single call in `mode`.
    pub fn context_budget_bytes(&self, mode: LlmMode) -> usize {
        match mode {
            LlmMode::Cloud => self.config.cloud_context_budget_bytes,
            LlmMode::Local => self.config.local_context_budget_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_mode_routes_to_local_provider() {
        let router = LlmRouter::from_config(&AiConfig::default());
        let provider = router.provider_for(LlmMode::Local, None);
        assert_eq!(provider.name(), "local");
        assert!(provider.supports_streaming());
    }

    #[test]
    fn test_cloud_mode_ignores_model_override_when_same() {
        let router = LlmRouter::from_config(&AiConfig::default());
        let default_model = AiConfig::default().cloud_model;
        let provider = router.provider_for(LlmMode::Cloud, Some(&default_model));
        assert_eq!(provider.name(), "cloud");
        assert!(!provider.supports_streaming());
    }

    #[test]
    fn test_budget_differs_per_mode() {
        let router = LlmRouter::from_config(&AiConfig::default());
        assert!(
            router.context_budget_bytes(LlmMode::Cloud)
                > router.context_budget_bytes(LlmMode::Local)
        );
    }
}
