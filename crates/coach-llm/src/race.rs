//! Race Coordinator (C3, §4.3): two independent LLM calls for the same
//! logical task, first validated output wins. Modeled with structured
//! concurrency — `tokio::select!` over two spawned tasks, each holding a
//! child `CancellationToken` derived from the request scope — rather than
//! detached threads and shared state (§9 "Coroutines & races").

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use coach_core::{CoachError, FetchedImage};
use coach_metrics::{EventMeta, MetricsBus, MetricsEvent, RaceEvent, RaceOutcomeKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The assembled prompt (and, for multimodal arms, the already-fetched
/// image) handed to an arm at call time. Bound fresh per request — an arm
/// implementation owns only its provider wiring, not prompt content.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub image: Option<FetchedImage>,
}

impl LlmRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), image: None }
    }

    pub fn with_image(prompt: impl Into<String>, image: FetchedImage) -> Self {
        Self { prompt: prompt.into(), image: Some(image) }
    }
}

/// One race arm. Implementors own their own provider wiring and the
/// `LlmRequest` they were constructed with; the token is handed through so
/// the arm can check it at its own suspension points and stop early once
/// it has been cancelled (cooperative, best-effort).
#[async_trait]
pub trait LlmArm: Send + Sync {
    async fn call(&self, cancel: CancellationToken) -> Result<String, CoachError>;
}

/// Per-arm and overall deadlines (§4.3 "Timeouts").
pub struct RaceDeadlines {
    pub arm_a: Duration,
    pub arm_b: Duration,
    pub overall: Option<Duration>,
}

pub struct RaceWinner {
    pub label: &'static str,
    pub raw: String,
}

async fn run_arm(
    arm: Arc<dyn LlmArm>,
    token: CancellationToken,
    deadline: Duration,
) -> Result<String, CoachError> {
    match tokio::time::timeout(deadline, arm.call(token)).await {
        Ok(result) => result,
        Err(_) => Err(CoachError::Timeout("race arm deadline exceeded".to_string())),
    }
}

fn spawn_arm(arm: Arc<dyn LlmArm>, token: CancellationToken, deadline: Duration) -> JoinHandle<Result<String, CoachError>> {
    tokio::spawn(run_arm(arm, token, deadline))
}

/// Races `arm_a` ("multimodal") against `arm_b` ("premium") under
/// `validator`. Returns the first validated output; if neither validates,
/// the error carries the reason from whichever arm finished last.
pub async fn race(
    arm_a: Arc<dyn LlmArm>,
    arm_b: Arc<dyn LlmArm>,
    validator: impl Fn(&str) -> bool + Send + Sync,
    deadlines: RaceDeadlines,
    parent_token: &CancellationToken,
    metrics: Option<&MetricsBus>,
) -> Result<RaceWinner, CoachError> {
    let body = race_body(arm_a, arm_b, validator, &deadlines, parent_token, metrics);

    match deadlines.overall {
        Some(overall) => match tokio::time::timeout(overall, body).await {
            Ok(result) => result,
            Err(_) => {
                parent_token.cancel();
                Err(CoachError::Timeout("race overall deadline exceeded".to_string()))
            }
        },
        None => body.await,
    }
}

async fn race_body(
    arm_a: Arc<dyn LlmArm>,
    arm_b: Arc<dyn LlmArm>,
    validator: impl Fn(&str) -> bool + Send + Sync,
    deadlines: &RaceDeadlines,
    parent_token: &CancellationToken,
    metrics: Option<&MetricsBus>,
) -> Result<RaceWinner, CoachError> {
    let token_a = parent_token.child_token();
    let token_b = parent_token.child_token();

    let start = Instant::now();
    let mut handle_a = spawn_arm(arm_a, token_a.clone(), deadlines.arm_a);
    let mut handle_b = spawn_arm(arm_b, token_b.clone(), deadlines.arm_b);

    let mut a_done = false;
    let mut b_done = false;
    let mut a_result: Option<Result<String, CoachError>> = None;
    let mut b_result: Option<Result<String, CoachError>> = None;
    let mut last_finisher: &'static str = "multimodal";

    while !(a_done && b_done) {
        tokio::select! {
            res = &mut handle_a, if !a_done => {
                a_done = true;
                last_finisher = "multimodal";
                let outcome = res.unwrap_or_else(|join_error| Err(CoachError::Timeout(join_error.to_string())));
                if let Ok(raw) = &outcome {
                    if validator(raw) {
                        token_b.cancel();
                        emit_race_event(metrics, "multimodal", RaceOutcomeKind::Winner, start.elapsed());
                        return Ok(RaceWinner { label: "multimodal", raw: raw.clone() });
                    }
                }
                a_result = Some(outcome);
            }
            res = &mut handle_b, if !b_done => {
                b_done = true;
                last_finisher = "premium";
                let outcome = res.unwrap_or_else(|join_error| Err(CoachError::Timeout(join_error.to_string())));
                if let Ok(raw) = &outcome {
                    if validator(raw) {
                        token_a.cancel();
                        emit_race_event(metrics, "premium", RaceOutcomeKind::Winner, start.elapsed());
                        return Ok(RaceWinner { label: "premium", raw: raw.clone() });
                    }
                }
                b_result = Some(outcome);
            }
        }
    }

    debug!(last_finisher, "both race arms finished without a validated winner");
    emit_race_event(metrics, "multimodal", RaceOutcomeKind::Loser, start.elapsed());
    emit_race_event(metrics, "premium", RaceOutcomeKind::Loser, start.elapsed());
    emit_race_event(metrics, last_finisher, RaceOutcomeKind::BothInvalid, start.elapsed());

    let reason = match last_finisher {
        "multimodal" => describe_invalid(a_result),
        _ => describe_invalid(b_result),
    };
    Err(CoachError::RaceBothArmsInvalid(reason))
}

fn describe_invalid(result: Option<Result<String, CoachError>>) -> String {
    match result {
        Some(Ok(raw)) => format!("output did not validate: {raw}"),
        Some(Err(error)) => error.to_string(),
        None => "no result".to_string(),
    }
}

fn emit_race_event(metrics: Option<&MetricsBus>, label: &str, outcome: RaceOutcomeKind, elapsed: Duration) {
    if let Some(bus) = metrics {
        bus.emit(MetricsEvent::Race(RaceEvent {
            meta: EventMeta::new(None),
            arm_label: label.to_string(),
            outcome,
            latency_ms: elapsed.as_millis() as u64,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedArm {
        delay: Duration,
        result: Result<&'static str, CoachError>,
    }

    #[async_trait]
    impl LlmArm for ScriptedArm {
        async fn call(&self, _cancel: CancellationToken) -> Result<String, CoachError> {
            tokio::time::sleep(self.delay).await;
            self.result.clone().map(|s| s.to_string())
        }
    }

    fn always_valid(raw: &str) -> bool {
        raw.starts_with('{')
    }

    #[tokio::test]
    async fn faster_arm_wins_when_both_valid() {
        let arm_a = Arc::new(ScriptedArm { delay: Duration::from_millis(10), result: Ok(r#"{"a":1}"#) });
        let arm_b = Arc::new(ScriptedArm { delay: Duration::from_millis(50), result: Ok(r#"{"b":1}"#) });

        let outcome = race(
            arm_a,
            arm_b,
            always_valid,
            RaceDeadlines { arm_a: Duration::from_secs(1), arm_b: Duration::from_secs(1), overall: None },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.label, "multimodal");
        assert_eq!(outcome.raw, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn slower_but_only_valid_arm_still_wins() {
        let arm_a = Arc::new(ScriptedArm { delay: Duration::from_millis(5), result: Ok("not json") });
        let arm_b = Arc::new(ScriptedArm { delay: Duration::from_millis(40), result: Ok(r#"{"b":1}"#) });

        let outcome = race(
            arm_a,
            arm_b,
            always_valid,
            RaceDeadlines { arm_a: Duration::from_secs(1), arm_b: Duration::from_secs(1), overall: None },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.label, "premium");
    }

    #[tokio::test]
    async fn both_arms_invalid_fails_the_race() {
        let arm_a = Arc::new(ScriptedArm { delay: Duration::from_millis(5), result: Ok("garbage a") });
        let arm_b = Arc::new(ScriptedArm { delay: Duration::from_millis(10), result: Ok("garbage b") });

        let error = race(
            arm_a,
            arm_b,
            always_valid,
            RaceDeadlines { arm_a: Duration::from_secs(1), arm_b: Duration::from_secs(1), overall: None },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(error, CoachError::RaceBothArmsInvalid(_)));
    }

    #[tokio::test]
    async fn per_arm_timeout_is_treated_as_arm_failure() {
        let arm_a = Arc::new(ScriptedArm { delay: Duration::from_millis(100), result: Ok(r#"{"a":1}"#) });
        let arm_b = Arc::new(ScriptedArm { delay: Duration::from_millis(5), result: Ok(r#"{"b":1}"#) });

        let outcome = race(
            arm_a,
            arm_b,
            always_valid,
            RaceDeadlines { arm_a: Duration::from_millis(10), arm_b: Duration::from_secs(1), overall: None },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.label, "premium");
    }

    #[tokio::test]
    async fn loser_token_is_cancelled_on_win() {
        let checked = Arc::new(AtomicUsize::new(0));
        struct TokenCheckingArm {
            delay: Duration,
            checked: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl LlmArm for TokenCheckingArm {
            async fn call(&self, cancel: CancellationToken) -> Result<String, CoachError> {
                tokio::time::sleep(self.delay).await;
                if cancel.is_cancelled() {
                    self.checked.fetch_add(1, Ordering::SeqCst);
                }
                Ok(r#"{"late":1}"#.to_string())
            }
        }

        let arm_a = Arc::new(ScriptedArm { delay: Duration::from_millis(5), result: Ok(r#"{"a":1}"#) });
        let arm_b = Arc::new(TokenCheckingArm { delay: Duration::from_millis(60), checked: Arc::clone(&checked) });

        let outcome = race(
            arm_a,
            arm_b,
            always_valid,
            RaceDeadlines { arm_a: Duration::from_secs(1), arm_b: Duration::from_secs(1), overall: None },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.label, "multimodal");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(checked.load(Ordering::SeqCst), 1);
    }
}
