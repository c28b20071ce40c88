//! Observability decorator for LLM arms: records a `LlmCallEvent` around
//! each call without the arm itself needing to know about metrics.
//! Mirrors the teacher's client-decorator pattern of wrapping a provider
//! client to add cross-cutting concerns transparently.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use coach_core::CoachError;
use coach_metrics::{EventMeta, LlmCallEvent, LlmCallStatus, MetricsBus, MetricsEvent};
use tokio_util::sync::CancellationToken;

use crate::race::LlmArm;

pub struct MetricsDecoratedArm {
    inner: Arc<dyn LlmArm>,
    provider: String,
    model: String,
    prompt_version: String,
    metrics: MetricsBus,
}

impl MetricsDecoratedArm {
    pub fn new(
        inner: Arc<dyn LlmArm>,
        provider: impl Into<String>,
        model: impl Into<String>,
        prompt_version: impl Into<String>,
        metrics: MetricsBus,
    ) -> Self {
        Self {
            inner,
            provider: provider.into(),
            model: model.into(),
            prompt_version: prompt_version.into(),
            metrics,
        }
    }
}

#[async_trait]
impl LlmArm for MetricsDecoratedArm {
    async fn call(&self, cancel: CancellationToken) -> Result<String, CoachError> {
        let start = Instant::now();
        let result = self.inner.call(cancel).await;

        let status = match &result {
            Ok(_) => LlmCallStatus::Success,
            Err(CoachError::Timeout(_)) => LlmCallStatus::Timeout,
            Err(_) => LlmCallStatus::Error,
        };

        self.metrics.emit(MetricsEvent::LlmCall(LlmCallEvent {
            meta: EventMeta::new(None),
            provider: self.provider.clone(),
            model: self.model.clone(),
            prompt_version: self.prompt_version.clone(),
            input_tokens: 0,
            output_tokens: 0,
            cost_estimate_usd: 0.0,
            latency_ms: start.elapsed().as_millis() as u64,
            status,
        }));

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedArm(Result<&'static str, CoachError>);

    #[async_trait]
    impl LlmArm for FixedArm {
        async fn call(&self, _cancel: CancellationToken) -> Result<String, CoachError> {
            self.0.clone().map(|s| s.to_string())
        }
    }

    #[tokio::test]
    async fn decorator_emits_a_success_event_and_passes_through_result() {
        let (bus, mut rx) = coach_metrics::MetricsBus::new(10);
        let arm = MetricsDecoratedArm::new(
            Arc::new(FixedArm(Ok(r#"{"a":1}"#))),
            "openai",
            "gpt-5",
            "merge_step_v1.0",
            bus,
        );

        let raw = arm.call(CancellationToken::new()).await.unwrap();
        assert_eq!(raw, r#"{"a":1}"#);

        let event = rx.try_recv().expect("event should be queued");
        match event {
            MetricsEvent::LlmCall(call) => {
                assert_eq!(call.provider, "openai");
                assert!(matches!(call.status, LlmCallStatus::Success));
            }
            _ => panic!("wrong event type"),
        }
    }
}
