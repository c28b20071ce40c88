//! `LlmProvider` is the out-of-scope collaborator named in §1 ("LLM
//! provider SDKs" is explicitly external). The pipeline only needs a thin
//! seam that can produce a raw string for an assembled prompt; concrete
//! wire protocols (OpenAI-style chat completions, Anthropic messages,
//! whatever the deployment's model tier speaks) are not modeled here.
//!
//! `ProviderArm` adapts one `LlmProvider` plus one already-bound
//! `LlmRequest` into a `coach_llm::race::LlmArm`, matching that trait's
//! doc comment: "implementors own their own provider wiring and the
//! `LlmRequest` they were constructed with".

use std::sync::Arc;

use async_trait::async_trait;
use coach_core::CoachError;
use coach_llm::{LlmArm, LlmRequest};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name, recorded on the metrics decorator
    /// (§7 Observability: "provider, model").
    fn name(&self) -> &str;

    /// Model identifier, recorded alongside `name()`.
    fn model(&self) -> &str;

    async fn complete(&self, request: &LlmRequest, cancel: CancellationToken) -> Result<String, CoachError>;
}

pub struct ProviderArm {
    provider: Arc<dyn LlmProvider>,
    request: LlmRequest,
}

impl ProviderArm {
    pub fn new(provider: Arc<dyn LlmProvider>, request: LlmRequest) -> Self {
        Self { provider, request }
    }
}

#[async_trait]
impl LlmArm for ProviderArm {
    async fn call(&self, cancel: CancellationToken) -> Result<String, CoachError> {
        self.provider.complete(&self.request, cancel).await
    }
}

/// The three provider roles the orchestrator needs: the two race arms for
/// the merge step (§4.2 step 4) and the single reply-generation model
/// (§4.5). Kept as three independent handles rather than one — a
/// deployment is free to point all three at the same backend, but the
/// race's "multimodal vs premium" framing requires they be distinguishable.
pub struct Providers {
    pub multimodal: Arc<dyn LlmProvider>,
    pub premium: Arc<dyn LlmProvider>,
    pub reply: Arc<dyn LlmProvider>,
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic stub provider for pipeline tests: returns a fixed
    /// string (or a per-call string from a script) without any network
    /// call.
    pub struct ScriptedProvider {
        name: String,
        model: String,
        responses: Vec<Result<String, CoachError>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(name: impl Into<String>, model: impl Into<String>, responses: Vec<Result<String, CoachError>>) -> Self {
            Self {
                name: name.into(),
                model: model.into(),
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn fixed(name: impl Into<String>, model: impl Into<String>, response: &str) -> Self {
            Self::new(name, model, vec![Ok(response.to_string())])
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            &self.model
        }

        async fn complete(&self, _request: &LlmRequest, _cancel: CancellationToken) -> Result<String, CoachError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(index.min(self.responses.len() - 1))
                .cloned()
                .unwrap_or_else(|| Err(CoachError::LlmProviderThrottled("script exhausted".to_string())))
        }
    }
}
