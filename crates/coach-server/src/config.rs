//! Server-level configuration: transport and provider wiring the domain
//! `OrchestratorConfig` deliberately leaves out (§1: "LLM provider SDKs"
//! and "pricing" are external). Loadable from a TOML file the same way as
//! `coach_core::OrchestratorConfig`, mirroring the teacher's
//! `chat_core::Config` pattern of one struct per concern.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:12123/v1".to_string(),
            api_key: "sk-test".to_string(),
            model: "gpt-5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub multimodal: ProviderConfig,
    pub premium: ProviderConfig,
    pub reply: ProviderConfig,
    pub metrics_db_path: Option<String>,
    pub metrics_bus_capacity: usize,
    pub orchestrator: coach_core::OrchestratorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8088,
            multimodal: ProviderConfig::default(),
            premium: ProviderConfig {
                model: "gpt-5-premium".to_string(),
                ..ProviderConfig::default()
            },
            reply: ProviderConfig::default(),
            metrics_db_path: None,
            metrics_bus_capacity: 1024,
            orchestrator: coach_core::OrchestratorConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_a_config_file() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8088);
        assert!(config.orchestrator.merge_step_enabled);
    }

    #[test]
    fn partial_toml_only_overrides_named_sections() {
        let config: ServerConfig = toml::from_str("port = 9000\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.multimodal.model, "gpt-5");
    }
}
