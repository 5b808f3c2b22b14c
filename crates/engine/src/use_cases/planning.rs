//! Planner orchestration: ordered provider fallback with schema validation.

use std::sync::Arc;

use fusion_domain::{
    fallback_plan, scene_plan_schema, validate_scene_plan, AudioSpec, CameraSpec, ScenePlan,
    ValidationError,
};
use serde_json::Value;

use crate::infrastructure::ports::{PlannerError, PlannerProviderPort};

/// Name reported when the deterministic planner produced the plan.
pub const FALLBACK_PLANNER: &str = "fallback";

#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    /// No providers are configured; nothing was called.
    #[error("No planner providers configured")]
    Unconfigured,

    /// Every configured provider failed after its own retries.
    #[error("All {attempts} planner providers failed; last error: {last}")]
    Exhausted { attempts: usize, last: PlannerError },
}

/// A validated plan and the planner that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub plan: ScenePlan,
    pub provider: String,
}

/// Tries providers in priority order until one returns a valid plan.
pub struct PlannerOrchestrator {
    providers: Vec<Arc<dyn PlannerProviderPort>>,
    schema: Value,
}

impl PlannerOrchestrator {
    pub fn new(providers: Vec<Arc<dyn PlannerProviderPort>>) -> Self {
        Self {
            providers,
            schema: scene_plan_schema(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    pub async fn plan(&self, prompt: &str) -> Result<PlanOutcome, PlanningError> {
        if self.providers.is_empty() {
            return Err(PlanningError::Unconfigured);
        }

        let mut last_error = None;
        for provider in &self.providers {
            let result = provider
                .propose(prompt, &self.schema)
                .await
                .and_then(|raw| merge_defaults(raw).map_err(PlannerError::from))
                .and_then(|raw| validate_scene_plan(&raw).map_err(PlannerError::from));

            match result {
                Ok(plan) => {
                    tracing::info!(provider = provider.name(), "Planner produced a valid plan");
                    return Ok(PlanOutcome {
                        plan,
                        provider: provider.name().to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %e,
                        "Planner provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| PlannerError::provider("no provider attempted"));
        tracing::error!(attempts = self.providers.len(), error = %last, "All planner providers failed");
        Err(PlanningError::Exhausted {
            attempts: self.providers.len(),
            last,
        })
    }
}

/// Insert default `camera` and `audio` blocks the provider left out.
fn merge_defaults(raw: Value) -> Result<Value, ValidationError> {
    let Value::Object(mut object) = raw else {
        return Err(ValidationError::single("$", "expected a JSON object"));
    };

    if !object.contains_key("camera") {
        object.insert("camera".to_string(), default_block(&CameraSpec::default()));
    }
    if !object.contains_key("audio") {
        object.insert("audio".to_string(), default_block(&AudioSpec::default()));
    }
    Ok(Value::Object(object))
}

fn default_block<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Plan a prompt, degrading to the deterministic planner.
///
/// An unconfigured planner always falls back. Exhaustion falls back unless
/// `strict` is set, in which case the error is returned.
pub struct PlanScene {
    orchestrator: Arc<PlannerOrchestrator>,
    strict: bool,
}

impl PlanScene {
    pub fn new(orchestrator: Arc<PlannerOrchestrator>, strict: bool) -> Self {
        Self {
            orchestrator,
            strict,
        }
    }

    pub async fn execute(&self, prompt: &str) -> Result<PlanOutcome, PlanningError> {
        match self.orchestrator.plan(prompt).await {
            Ok(outcome) => Ok(outcome),
            Err(PlanningError::Unconfigured) => {
                tracing::info!("No planner providers configured, using fallback planner");
                Ok(fallback(prompt))
            }
            Err(e @ PlanningError::Exhausted { .. }) if self.strict => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to deterministic planner");
                Ok(fallback(prompt))
            }
        }
    }
}

fn fallback(prompt: &str) -> PlanOutcome {
    PlanOutcome {
        plan: fallback_plan(prompt),
        provider: FALLBACK_PLANNER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::infrastructure::resilient::{ResilientPlanner, RetryConfig};
    use async_trait::async_trait;
    use fusion_domain::{CameraPath, TimeOfDay, Weather};
    use serde_json::json;

    fn minimal_plan() -> Value {
        json!({"environment": {"theme": "harbor", "weather": "snow", "time_of_day": "day"}})
    }

    /// Returns the same result on every call and counts calls.
    struct ScriptedProvider {
        name: &'static str,
        result: Result<Value, PlannerError>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PlannerProviderPort for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn propose(&self, _prompt: &str, _schema: &Value) -> Result<Value, PlannerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn scripted(name: &'static str, result: Result<Value, PlannerError>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            name,
            result,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(provider: &ScriptedProvider) -> u32 {
        provider.calls.load(Ordering::SeqCst)
    }

    /// Fails a fixed number of times with a transport error, then succeeds.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PlannerProviderPort for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn propose(&self, _prompt: &str, _schema: &Value) -> Result<Value, PlannerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PlannerError::transport("connection reset"))
            } else {
                Ok(minimal_plan())
            }
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            multiplier_ms: 1,
            min_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn unconfigured_fails_without_calls() {
        let orchestrator = PlannerOrchestrator::new(Vec::new());
        assert!(matches!(orchestrator.plan("x").await, Err(PlanningError::Unconfigured)));
    }

    #[tokio::test]
    async fn merges_defaults_before_validation() {
        let provider = scripted("openai", Ok(minimal_plan()));
        let providers: Vec<Arc<dyn PlannerProviderPort>> = vec![provider.clone()];
        let orchestrator = PlannerOrchestrator::new(providers);

        let outcome = orchestrator.plan("harbor").await.expect("plan");
        assert_eq!(outcome.provider, "openai");
        assert_eq!(outcome.plan.environment.weather, Weather::Snow);
        assert_eq!(outcome.plan.camera.path, CameraPath::Dolly);
        assert_eq!(outcome.plan.camera.duration_s.get(), 8);
        assert_eq!(outcome.plan.audio.tempo.get(), 80);
        assert_eq!(calls(&provider), 1);
    }

    #[tokio::test]
    async fn invalid_output_moves_to_next_provider_after_one_call() {
        let bad = scripted(
            "openai",
            Ok(json!({"environment": {"theme": "x", "weather": "hail"}})),
        );
        let unparseable = scripted("anthropic", Err(PlannerError::parse("trailing characters")));
        let good = scripted("together", Ok(minimal_plan()));
        let providers: Vec<Arc<dyn PlannerProviderPort>> =
            vec![bad.clone(), unparseable.clone(), good.clone()];
        let orchestrator = PlannerOrchestrator::new(providers);

        let outcome = orchestrator.plan("harbor").await.expect("plan");
        assert_eq!(outcome.provider, "together");
        assert_eq!((calls(&bad), calls(&unparseable), calls(&good)), (1, 1, 1));
    }

    #[tokio::test]
    async fn non_object_output_is_a_validation_error() {
        let provider = scripted("openai", Ok(json!(["not", "a", "plan"])));
        let providers: Vec<Arc<dyn PlannerProviderPort>> = vec![provider];
        let orchestrator = PlannerOrchestrator::new(providers);

        let err = orchestrator.plan("x").await.expect_err("invalid");
        assert!(matches!(
            err,
            PlanningError::Exhausted { attempts: 1, last: PlannerError::Validation(_) }
        ));
    }

    #[tokio::test]
    async fn exhaustion_names_last_cause() {
        let first = scripted("openai", Err(PlannerError::transport("HTTP 500")));
        let second = scripted("anthropic", Err(PlannerError::provider("empty content")));
        let providers: Vec<Arc<dyn PlannerProviderPort>> = vec![first, second];
        let orchestrator = PlannerOrchestrator::new(providers);

        match orchestrator.plan("x").await {
            Err(PlanningError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(last.to_string().contains("empty content"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_inside_provider_before_falling_through() {
        let flaky = Arc::new(FlakyProvider {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let resilient = ResilientPlanner::new(flaky.clone(), fast_retry(3));
        let next = scripted("anthropic", Ok(minimal_plan()));
        let providers: Vec<Arc<dyn PlannerProviderPort>> = vec![Arc::new(resilient), next.clone()];
        let orchestrator = PlannerOrchestrator::new(providers);

        let outcome = orchestrator.plan("x").await.expect("plan");
        assert_eq!(outcome.provider, "flaky");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(calls(&next), 0);
    }

    #[tokio::test]
    async fn plan_scene_falls_back_when_unconfigured() {
        let use_case = PlanScene::new(Arc::new(PlannerOrchestrator::new(Vec::new())), true);

        let outcome = use_case
            .execute("misty cyberpunk alley at night, light rain, dolly camera")
            .await
            .expect("fallback");
        assert_eq!(outcome.provider, FALLBACK_PLANNER);
        assert_eq!(outcome.plan.environment.time_of_day, TimeOfDay::Night);
        assert_eq!(outcome.plan.environment.weather, Weather::LightRain);
        assert_eq!(outcome.plan.camera.path, CameraPath::Dolly);
        assert_eq!(outcome.plan.camera.duration_s.get(), 8);
    }

    #[tokio::test]
    async fn strict_mode_surfaces_exhaustion() {
        let failing = || -> Vec<Arc<dyn PlannerProviderPort>> {
            vec![scripted("openai", Err(PlannerError::transport("down")))]
        };

        let lenient = PlanScene::new(Arc::new(PlannerOrchestrator::new(failing())), false);
        assert_eq!(lenient.execute("x").await.expect("fallback").provider, FALLBACK_PLANNER);

        let strict = PlanScene::new(Arc::new(PlannerOrchestrator::new(failing())), true);
        assert!(matches!(strict.execute("x").await, Err(PlanningError::Exhausted { .. })));
    }
}
