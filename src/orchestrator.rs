//! Multi-persona evaluation orchestrator.
//!
//! A run fans out one analysis call per selected persona (phase A), then,
//! when requested, one redraw call per persona whose analysis succeeded
//! (phase B). Every call of a phase is started before any is awaited, and a
//! phase is settled only once every call has resolved or failed.
//!
//! Results are collected on the calling task as each future completes, so
//! each persona's slot is written exactly once per phase by a single writer
//! and no locking is involved.

use crate::client::{BackendConfig, BackendError, EvaluationClient};
use crate::models::{Artifact, EvaluationModel, EvaluationReport, MediaData, Persona};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How phase A treats per-persona failures. Fixed per orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any failure fails the whole run; completed reports are discarded.
    FailFast,
    /// Failures are recorded and skipped; only zero successes fail the run.
    #[default]
    BestEffort,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Lifecycle of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    RunningAnalysis,
    RunningGeneration,
    Settled,
}

/// A persona whose call failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonaFailure {
    pub persona_id: String,
    pub persona_name: String,
    pub reason: String,
}

impl PersonaFailure {
    fn new(persona: &Persona, error: &BackendError) -> Self {
        Self {
            persona_id: persona.id.clone(),
            persona_name: persona.name.clone(),
            reason: error.to_string(),
        }
    }
}

/// Run-level error.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// Invalid call shape; no backend call was made.
    #[error("invalid evaluation request: {0}")]
    Precondition(String),

    /// Fail-fast abort, naming the first persona that failed.
    #[error("analysis failed for persona '{persona}': {source}")]
    PersonaFailed {
        persona: String,
        source: BackendError,
        /// Every phase A failure, in completion order.
        failures: Vec<PersonaFailure>,
    },

    /// Best-effort run in which no persona succeeded.
    #[error("analysis failed for all {} personas", .failures.len())]
    PartialRun { failures: Vec<PersonaFailure> },
}

/// Everything one run needs, fully resolved in memory.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub artifact: Artifact,
    /// Selected personas, in selection order.
    pub personas: Vec<Persona>,
    pub model: EvaluationModel,
    pub generate_images: bool,
    pub backend: BackendConfig,
}

/// How phase A ended for a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Complete,
    Partial { failures: Vec<PersonaFailure> },
}

/// Settled result of a run.
///
/// Keys of `optimized_images` are always keys of `reports`, which are always
/// ids of the selected personas.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub model: EvaluationModel,
    pub reports: HashMap<String, EvaluationReport>,
    pub optimized_images: HashMap<String, MediaData>,
    pub outcome: RunOutcome,
    /// Phase B failures; these never fail the run.
    pub generation_failures: Vec<PersonaFailure>,
    pub elapsed: Duration,
}

impl RunResult {
    /// Phase A failures, empty for a complete run.
    pub fn analysis_failures(&self) -> &[PersonaFailure] {
        match &self.outcome {
            RunOutcome::Complete => &[],
            RunOutcome::Partial { failures } => failures,
        }
    }
}

/// Fans persona evaluations out to an [`EvaluationClient`] and collects them.
pub struct Orchestrator {
    client: Arc<dyn EvaluationClient>,
    policy: FailurePolicy,
    phase: watch::Sender<RunPhase>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn EvaluationClient>, policy: FailurePolicy) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            client,
            policy,
            phase,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Observe phase transitions of runs on this orchestrator.
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: RunPhase) {
        debug!(?phase, "run phase");
        self.phase.send_replace(phase);
    }

    /// Evaluate the artifact with every selected persona.
    pub async fn run_evaluation(&self, request: &RunRequest) -> Result<RunResult, EvaluationError> {
        validate(request)?;

        let start = Instant::now();
        info!(
            artifact = request.artifact.kind(),
            personas = request.personas.len(),
            model = %request.model,
            policy = %self.policy,
            generate_images = request.generate_images,
            "starting evaluation run"
        );

        self.set_phase(RunPhase::RunningAnalysis);
        let (reports, failures) = self.analysis_phase(request).await;

        let outcome = match self.settle_analysis(&reports, failures) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_phase(RunPhase::Settled);
                return Err(e);
            }
        };

        let mut optimized_images = HashMap::new();
        let mut generation_failures = Vec::new();
        if request.generate_images {
            self.set_phase(RunPhase::RunningGeneration);
            (optimized_images, generation_failures) =
                self.generation_phase(request, &reports).await;
        }

        self.set_phase(RunPhase::Settled);
        let elapsed = start.elapsed();
        info!(
            reports = reports.len(),
            images = optimized_images.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "evaluation run settled"
        );

        Ok(RunResult {
            model: request.model,
            reports,
            optimized_images,
            outcome,
            generation_failures,
            elapsed,
        })
    }

    /// Phase A: one analysis call per persona, all in flight at once.
    async fn analysis_phase<'a>(
        &self,
        request: &'a RunRequest,
    ) -> (
        HashMap<String, EvaluationReport>,
        Vec<(&'a Persona, BackendError)>,
    ) {
        let mut pending: FuturesUnordered<_> = request
            .personas
            .iter()
            .map(|persona| async move {
                let result = self
                    .client
                    .analyze(&request.artifact, persona, request.model, &request.backend)
                    .await;
                (persona, result)
            })
            .collect();

        let mut reports = HashMap::with_capacity(request.personas.len());
        let mut failures = Vec::new();

        while let Some((persona, result)) = pending.next().await {
            match result {
                Ok(mut report) => {
                    report.model_type = request.model;
                    info!(
                        persona = %persona.name,
                        overall_score = report.overall_score,
                        issues = report.issues.len(),
                        "analysis complete"
                    );
                    reports.insert(persona.id.clone(), report);
                }
                Err(e) => {
                    warn!(persona = %persona.name, error = %e, "analysis failed");
                    failures.push((persona, e));
                }
            }
        }

        (reports, failures)
    }

    /// Apply the failure policy to the settled phase A results.
    fn settle_analysis(
        &self,
        reports: &HashMap<String, EvaluationReport>,
        failures: Vec<(&Persona, BackendError)>,
    ) -> Result<RunOutcome, EvaluationError> {
        if failures.is_empty() {
            return Ok(RunOutcome::Complete);
        }

        let summaries: Vec<PersonaFailure> = failures
            .iter()
            .map(|(persona, e)| PersonaFailure::new(persona, e))
            .collect();

        match self.policy {
            FailurePolicy::FailFast => {
                let mut failures = failures.into_iter();
                match failures.next() {
                    Some((persona, source)) => Err(EvaluationError::PersonaFailed {
                        persona: persona.name.clone(),
                        source,
                        failures: summaries,
                    }),
                    None => Ok(RunOutcome::Complete),
                }
            }
            FailurePolicy::BestEffort if reports.is_empty() => {
                Err(EvaluationError::PartialRun {
                    failures: summaries,
                })
            }
            FailurePolicy::BestEffort => {
                warn!(
                    succeeded = reports.len(),
                    failed = summaries.len(),
                    "continuing with partial results"
                );
                Ok(RunOutcome::Partial {
                    failures: summaries,
                })
            }
        }
    }

    /// Phase B: one redraw per persona that has a report. Failures only cost
    /// that persona its image.
    async fn generation_phase(
        &self,
        request: &RunRequest,
        reports: &HashMap<String, EvaluationReport>,
    ) -> (HashMap<String, MediaData>, Vec<PersonaFailure>) {
        let mut pending: FuturesUnordered<_> = request
            .personas
            .iter()
            .filter_map(|persona| reports.get(&persona.id).map(|report| (persona, report)))
            .map(|(persona, report)| async move {
                let result = self
                    .client
                    .regenerate(&request.artifact, persona, report, &request.backend)
                    .await;
                (persona, result)
            })
            .collect();

        let mut images = HashMap::new();
        let mut failures = Vec::new();

        while let Some((persona, result)) = pending.next().await {
            match result {
                Ok(image) => {
                    info!(persona = %persona.name, bytes = image.bytes.len(), "optimized image ready");
                    images.insert(persona.id.clone(), image);
                }
                Err(e) => {
                    warn!(persona = %persona.name, error = %e, "image generation failed");
                    failures.push(PersonaFailure::new(persona, &e));
                }
            }
        }

        (images, failures)
    }
}

fn validate(request: &RunRequest) -> Result<(), EvaluationError> {
    if request.artifact.is_empty() {
        return Err(EvaluationError::Precondition(format!(
            "{} artifact is empty",
            request.artifact.kind()
        )));
    }
    if request.personas.is_empty() {
        return Err(EvaluationError::Precondition(
            "no personas selected".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for persona in &request.personas {
        if !seen.insert(persona.id.as_str()) {
            return Err(EvaluationError::Precondition(format!(
                "persona id '{}' selected more than once",
                persona.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Provider;
    use crate::models::{DimensionScore, FlowStep};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Scripted backend: per-persona score or failure, with per-persona delay.
    #[derive(Default)]
    struct ScriptedClient {
        scores: HashMap<String, u8>,
        failing_analysis: HashSet<String>,
        failing_regeneration: HashSet<String>,
        delays_ms: HashMap<String, u64>,
        analyzed: Mutex<Vec<String>>,
        regenerated: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn with_scores(scores: &[(&str, u8)]) -> Self {
            Self {
                scores: scores
                    .iter()
                    .map(|(id, s)| (id.to_string(), *s))
                    .collect(),
                ..Default::default()
            }
        }

        fn fail_analysis(mut self, id: &str) -> Self {
            self.failing_analysis.insert(id.to_string());
            self
        }

        fn fail_regeneration(mut self, id: &str) -> Self {
            self.failing_regeneration.insert(id.to_string());
            self
        }

        fn delay(mut self, id: &str, ms: u64) -> Self {
            self.delays_ms.insert(id.to_string(), ms);
            self
        }

        async fn wait(&self, id: &str) {
            if let Some(ms) = self.delays_ms.get(id) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
        }
    }

    #[async_trait]
    impl EvaluationClient for ScriptedClient {
        async fn analyze(
            &self,
            _artifact: &Artifact,
            persona: &Persona,
            model: EvaluationModel,
            _config: &BackendConfig,
        ) -> Result<EvaluationReport, BackendError> {
            self.wait(&persona.id).await;
            self.analyzed.lock().unwrap().push(persona.id.clone());
            if self.failing_analysis.contains(&persona.id) {
                return Err(BackendError::Api {
                    status: 500,
                    body: format!("{} exploded", persona.name),
                });
            }
            let score = self.scores.get(&persona.id).copied().unwrap_or(50);
            Ok(EvaluationReport {
                model_type: model,
                overall_score: score,
                dimension_scores: vec![DimensionScore {
                    dimension: "Clarity".to_string(),
                    score,
                    comment: "ok".to_string(),
                }],
                executive_summary: String::new(),
                persona_perspective: String::new(),
                issues: vec![],
                optimization_suggestions: vec![],
            })
        }

        async fn regenerate(
            &self,
            _artifact: &Artifact,
            persona: &Persona,
            _report: &EvaluationReport,
            _config: &BackendConfig,
        ) -> Result<MediaData, BackendError> {
            self.wait(&persona.id).await;
            self.regenerated.lock().unwrap().push(persona.id.clone());
            if self.failing_regeneration.contains(&persona.id) {
                return Err(BackendError::EmptyResponse("no image".to_string()));
            }
            Ok(MediaData::new("image/png", vec![persona.id.len() as u8]))
        }
    }

    fn persona(id: &str, name: &str) -> Persona {
        let mut p = Persona::defaults().remove(0);
        p.id = id.to_string();
        p.name = name.to_string();
        p
    }

    fn request(ids: &[&str], generate_images: bool) -> RunRequest {
        RunRequest {
            artifact: Artifact::Image(MediaData::new("image/png", vec![1, 2, 3])),
            personas: ids.iter().map(|id| persona(id, &format!("P{}", id))).collect(),
            model: EvaluationModel::Ues,
            generate_images,
            backend: BackendConfig {
                provider: Provider::Gemini,
                api_key: "test".to_string(),
                analysis_model: "analysis".to_string(),
                image_model: "image".to_string(),
                base_url: None,
                timeout: Duration::from_secs(1),
                retries: 0,
                temperature: 0.2,
            },
        }
    }

    fn orchestrator(client: Arc<ScriptedClient>, policy: FailurePolicy) -> Orchestrator {
        Orchestrator::new(client, policy)
    }

    fn assert_key_invariant(result: &RunResult, request: &RunRequest) {
        let selected: HashSet<_> = request.personas.iter().map(|p| p.id.as_str()).collect();
        for id in result.reports.keys() {
            assert!(selected.contains(id.as_str()));
        }
        for id in result.optimized_images.keys() {
            assert!(result.reports.contains_key(id));
        }
    }

    #[tokio::test]
    async fn test_empty_persona_set_is_precondition_error() {
        let client = Arc::new(ScriptedClient::default());
        let orch = orchestrator(client.clone(), FailurePolicy::BestEffort);

        let result = orch.run_evaluation(&request(&[], false)).await;

        assert!(matches!(result, Err(EvaluationError::Precondition(_))));
        assert!(client.analyzed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_flow_is_precondition_error() {
        let client = Arc::new(ScriptedClient::default());
        let orch = orchestrator(client.clone(), FailurePolicy::FailFast);
        let mut req = request(&["1"], false);
        req.artifact = Artifact::Flow(Vec::<FlowStep>::new());

        let result = orch.run_evaluation(&req).await;

        assert!(matches!(result, Err(EvaluationError::Precondition(_))));
        assert!(client.analyzed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_persona_ids_are_rejected() {
        let orch = orchestrator(Arc::new(ScriptedClient::default()), FailurePolicy::BestEffort);
        let result = orch.run_evaluation(&request(&["1", "1"], false)).await;
        assert!(matches!(result, Err(EvaluationError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_all_personas_succeed() {
        let client = Arc::new(ScriptedClient::with_scores(&[("1", 60), ("2", 90)]));
        let orch = orchestrator(client, FailurePolicy::FailFast);
        let req = request(&["1", "2"], false);

        let result = assert_ok!(orch.run_evaluation(&req).await);

        assert_eq!(result.outcome, RunOutcome::Complete);
        assert_eq!(result.reports.len(), 2);
        assert_eq!(result.reports["1"].overall_score, 60);
        assert_eq!(result.reports["2"].overall_score, 90);
        assert!(result.optimized_images.is_empty());
        assert_key_invariant(&result, &req);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_order_does_not_follow_input_order() {
        let client = Arc::new(
            ScriptedClient::with_scores(&[("1", 60), ("2", 90)])
                .delay("1", 200)
                .delay("2", 10),
        );
        let orch = orchestrator(client.clone(), FailurePolicy::FailFast);

        let result = assert_ok!(orch.run_evaluation(&request(&["1", "2"], false)).await);

        assert_eq!(*client.analyzed.lock().unwrap(), vec!["2", "1"]);
        assert_eq!(result.reports.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_run_concurrently() {
        let client = Arc::new(
            ScriptedClient::default()
                .delay("1", 100)
                .delay("2", 100)
                .delay("3", 100),
        );
        let orch = orchestrator(client, FailurePolicy::BestEffort);

        let start = tokio::time::Instant::now();
        assert_ok!(orch.run_evaluation(&request(&["1", "2", "3"], false)).await);

        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_discards_completed_reports() {
        let client = Arc::new(
            ScriptedClient::default()
                .fail_analysis("2")
                .delay("1", 50)
                .delay("2", 10),
        );
        let orch = orchestrator(client.clone(), FailurePolicy::FailFast);

        let err = assert_err!(orch.run_evaluation(&request(&["1", "2"], true)).await);

        match err {
            EvaluationError::PersonaFailed {
                persona, failures, ..
            } => {
                assert_eq!(persona, "P2");
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Phase A still settled fully, and phase B never ran.
        assert_eq!(client.analyzed.lock().unwrap().len(), 2);
        assert!(client.regenerated.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_names_first_failure_to_complete() {
        let client = Arc::new(
            ScriptedClient::default()
                .fail_analysis("1")
                .fail_analysis("2")
                .delay("1", 80)
                .delay("2", 20),
        );
        let orch = orchestrator(client, FailurePolicy::FailFast);

        let err = assert_err!(orch.run_evaluation(&request(&["1", "2"], false)).await);

        assert!(err.to_string().contains("'P2'"));
        if let EvaluationError::PersonaFailed { failures, .. } = err {
            assert_eq!(failures.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_best_effort_keeps_successful_subset() {
        let client = Arc::new(ScriptedClient::with_scores(&[("1", 70)]).fail_analysis("2"));
        let orch = orchestrator(client.clone(), FailurePolicy::BestEffort);
        let req = request(&["1", "2"], true);

        let result = assert_ok!(orch.run_evaluation(&req).await);

        assert_eq!(result.reports.keys().collect::<Vec<_>>(), vec!["1"]);
        assert_eq!(result.analysis_failures().len(), 1);
        assert_eq!(result.analysis_failures()[0].persona_id, "2");
        // Phase B only for the persona with a report.
        assert_eq!(*client.regenerated.lock().unwrap(), vec!["1"]);
        assert!(result.optimized_images.keys().all(|k| k == "1"));
        assert_key_invariant(&result, &req);
    }

    #[tokio::test]
    async fn test_best_effort_with_zero_successes_is_partial_run_error() {
        let client = Arc::new(
            ScriptedClient::default()
                .fail_analysis("1")
                .fail_analysis("2"),
        );
        let orch = orchestrator(client, FailurePolicy::BestEffort);

        let err = assert_err!(orch.run_evaluation(&request(&["1", "2"], true)).await);

        match err {
            EvaluationError::PartialRun { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_report() {
        let client = Arc::new(ScriptedClient::default().fail_regeneration("2"));
        let orch = orchestrator(client, FailurePolicy::FailFast);
        let req = request(&["1", "2"], true);

        let result = assert_ok!(orch.run_evaluation(&req).await);

        assert_eq!(result.reports.len(), 2);
        assert_eq!(result.optimized_images.len(), 1);
        assert!(result.optimized_images.contains_key("1"));
        assert_eq!(result.generation_failures.len(), 1);
        assert_eq!(result.generation_failures[0].persona_id, "2");
        assert_eq!(result.outcome, RunOutcome::Complete);
        assert_key_invariant(&result, &req);
    }

    #[tokio::test]
    async fn test_reports_are_stamped_with_requested_model() {
        let orch = orchestrator(Arc::new(ScriptedClient::default()), FailurePolicy::FailFast);
        let mut req = request(&["1"], false);
        req.model = EvaluationModel::Ets;

        let result = assert_ok!(orch.run_evaluation(&req).await);

        assert_eq!(result.model, EvaluationModel::Ets);
        assert_eq!(result.reports["1"].model_type, EvaluationModel::Ets);
    }

    #[test]
    fn test_policy_is_fixed_per_orchestrator() {
        let client = Arc::new(ScriptedClient::default());

        let fail_fast = orchestrator(client.clone(), FailurePolicy::FailFast);
        let best_effort = orchestrator(client, FailurePolicy::BestEffort);

        assert_eq!(fail_fast.policy(), FailurePolicy::FailFast);
        assert_eq!(best_effort.policy(), FailurePolicy::BestEffort);
    }

    #[tokio::test]
    async fn test_phase_transitions_end_settled() {
        let orch = orchestrator(Arc::new(ScriptedClient::default()), FailurePolicy::BestEffort);
        let phases = orch.subscribe();
        assert_eq!(*phases.borrow(), RunPhase::Idle);

        assert_ok!(orch.run_evaluation(&request(&["1"], true)).await);
        assert_eq!(*phases.borrow(), RunPhase::Settled);

        let _ = orch.run_evaluation(&request(&[], false)).await;
        assert_eq!(*phases.borrow(), RunPhase::Settled);
    }
}
