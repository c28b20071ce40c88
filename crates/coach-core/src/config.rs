//! Configuration surface (§6). Loadable from a TOML file, overridable by
//! environment variables, mirroring the teacher's `chat_core::Config`
//! single-struct-threaded-through-everything pattern.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub merge_step_enabled: bool,
    pub parallel_enabled: bool,
    pub max_retries: u32,
    pub intimacy_check_enabled: bool,
    pub moderation_fail_open: bool,
    pub prompt_log_enabled: bool,
    pub plain_text_wrap_threshold: usize,
    /// Per-arm deadline for a race arm (§4.3).
    pub arm_timeout_ms: u64,
    /// Overall per-request deadline (§5).
    pub request_timeout_ms: u64,
    /// TTL for a session's cache bucket (§3 Lifecycle).
    pub cache_ttl_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            merge_step_enabled: true,
            parallel_enabled: true,
            max_retries: 3,
            intimacy_check_enabled: true,
            moderation_fail_open: false,
            prompt_log_enabled: false,
            plain_text_wrap_threshold: 500,
            arm_timeout_ms: 20_000,
            request_timeout_ms: 45_000,
            cache_ttl_seconds: 6 * 60 * 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&raw)?)
    }

    /// `use_parallel` per §4.1: both flags enabled and the dispatch contains
    /// at least one image.
    pub fn use_parallel(&self, contains_image: bool) -> bool {
        self.merge_step_enabled && self.parallel_enabled && contains_image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.plain_text_wrap_threshold, 500);
        assert!(config.merge_step_enabled);
        assert!(config.parallel_enabled);
        assert!(!config.moderation_fail_open);
    }

    #[test]
    fn use_parallel_requires_an_image_and_both_flags() {
        let mut config = OrchestratorConfig::default();
        assert!(config.use_parallel(true));
        assert!(!config.use_parallel(false));

        config.parallel_enabled = false;
        assert!(!config.use_parallel(true));
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = OrchestratorConfig::from_toml_str("max_retries = 5\n").unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(config.merge_step_enabled);
    }
}
