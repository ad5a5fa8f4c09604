//! The pipeline runner.
//!
//! Drives a run through the ordered step sequence on a background task,
//! delegating real work to the agent collaborators, feeding step boundaries
//! through the state machine, and publishing lifecycle events. Suspends at
//! the two human checkpoints (approval after generation, confirmation after
//! the quality gate) and supports prerequisite-checked resume.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use qaflow_core::artifacts::{
    load_cases, load_execution_results, load_requirements, load_review_results,
};
use qaflow_core::error::{QaflowError, Result};
use qaflow_core::machine::{StateMachine, TransitionRequest};
use qaflow_core::manifest::RunManifest;
use qaflow_core::model::{Assertion, ExecutionSample, Verdict};
use qaflow_core::paths;
use qaflow_core::quality::{self, GateReport};
use qaflow_core::run::Run;
use qaflow_core::trace;
use qaflow_core::types::{PipelineStep, RunEvent, RunState};
use qaflow_core::workspace;
use tracing::{error, info, warn};

use crate::collab::{
    ExecuteRequest, ParseRequest, PipelineAgents, RegenerationFeedback, ReviewRequest,
};
use crate::events::{EventBus, PipelineEvent};
use crate::registry::{RegistryGuard, RunRegistry};
use crate::store::RunStore;

/// Hard cap on regeneration attempts per run.
pub const MAX_REGENERATIONS: u32 = 3;

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Project root used for PRD resolution.
    pub project_root: PathBuf,
    /// Version tags stamped into run manifests.
    pub agent_version: String,
    pub prompt_version: String,
}

impl PipelineConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            agent_version: "unversioned".to_string(),
            prompt_version: "unversioned".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineRunner
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PipelineRunner {
    store: Arc<dyn RunStore>,
    agents: Arc<dyn PipelineAgents>,
    registry: RunRegistry,
    events: EventBus,
    machine: Arc<Mutex<StateMachine>>,
    config: Arc<PipelineConfig>,
}

enum StepFlow {
    Continue,
    Suspend,
}

impl PipelineRunner {
    pub fn new(
        store: Arc<dyn RunStore>,
        agents: Arc<dyn PipelineAgents>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            agents,
            registry: RunRegistry::new(),
            events: EventBus::default(),
            machine: Arc::new(Mutex::new(StateMachine::new())),
            config: Arc::new(config),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    // ---------------------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------------------

    /// Begin executing a freshly created run. Returns as soon as the
    /// background task is spawned; progress is observable through the event
    /// bus and the store.
    pub async fn start(&self, run_id: &str) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        if run.state != RunState::Created {
            return Err(QaflowError::InvalidTransition {
                from: run.state.to_string(),
                event: RunEvent::StartParsing.to_string(),
            });
        }

        let guard = self.registry.begin(run_id)?;

        let workspace = PathBuf::from(&run.workspace_path);
        let resolved =
            paths::resolve_prd_path(&self.config.project_root, &workspace, &run.prd_path);
        run.prd_path = resolved.display().to_string();
        self.store.update(&run).await?;

        info!(run_id, prd = %run.prd_path, "pipeline starting");
        let runner = self.clone();
        tokio::spawn(async move {
            runner
                .execute_from(run, PipelineStep::Initialize, None, guard)
                .await;
        });
        Ok(())
    }

    /// Approval continuation: restarts specifically at `test_execution`,
    /// skipping generation. Permitted from `awaiting_approval` or — to
    /// tolerate a crash mid-execution — from `executing` when no instance
    /// is tracked.
    pub async fn approve(&self, run_id: &str) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        match run.state {
            RunState::AwaitingApproval | RunState::Executing => {}
            other => {
                return Err(QaflowError::InvalidTransition {
                    from: other.to_string(),
                    event: RunEvent::Approved.to_string(),
                })
            }
        }
        workspace::validate_prerequisites(
            Path::new(&run.workspace_path),
            PipelineStep::TestExecution,
        )?;

        let guard = self.registry.begin(run_id)?;
        if run.state == RunState::AwaitingApproval {
            self.apply_event(&mut run, RunEvent::Approved, None, None, None)
                .await?;
        } else {
            warn!(run_id, "continuing from executing with no tracked instance");
        }

        self.skip_steps_before(run_id, PipelineStep::TestExecution);
        self.events.publish(PipelineEvent::PipelineResumed {
            run_id: run_id.to_string(),
            from_step: PipelineStep::TestExecution,
        });

        let runner = self.clone();
        tokio::spawn(async move {
            runner
                .execute_from(run, PipelineStep::TestExecution, None, guard)
                .await;
        });
        Ok(())
    }

    /// Rejection with feedback: re-invokes generation with the accumulated
    /// context. Capped at [`MAX_REGENERATIONS`] attempts, counted from prior
    /// rejection entries in the decision log; exceeding the cap is a
    /// validation failure, not a pipeline error.
    pub async fn reject(&self, run_id: &str, feedback: RegenerationFeedback) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        let attempts = run.regeneration_attempts();
        if attempts >= MAX_REGENERATIONS {
            return Err(QaflowError::RegenerationExhausted(attempts));
        }

        let guard = self.registry.begin(run_id)?;
        let metadata = serde_json::json!({
            "category": feedback.category,
            "detail": feedback.detail,
        });
        self.apply_event(
            &mut run,
            RunEvent::Rejected,
            None,
            Some(format!("regeneration attempt {}", attempts + 1)),
            Some(metadata),
        )
        .await?;

        info!(run_id, attempt = attempts + 1, "regenerating test cases");
        let runner = self.clone();
        tokio::spawn(async move {
            runner
                .execute_from(run, PipelineStep::PrdParsing, Some(feedback), guard)
                .await;
        });
        Ok(())
    }

    /// Human confirmation of the final report: `report_ready → completed`.
    pub async fn confirm(&self, run_id: &str) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        self.apply_event(&mut run, RunEvent::Confirmed, None, None, None)
            .await?;
        if let Err(e) = self.write_manifest(&run) {
            warn!(run_id, error = %e, "manifest write failed after confirm");
        }
        Ok(())
    }

    /// Send the run back to `created` for another full pass.
    pub async fn retest(&self, run_id: &str) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        self.apply_event(&mut run, RunEvent::Retest, None, None, None)
            .await
    }

    /// Resume at `from_step` after validating that every artifact the step
    /// depends on is present. Rejected while an instance is tracked; a run
    /// stuck in `executing`/`codex_reviewing` with no tracked instance is
    /// treated as crash recovery and restarted.
    pub async fn resume(&self, run_id: &str, from_step: PipelineStep) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        if self.registry.is_running(run_id) {
            return Err(QaflowError::AlreadyRunning(run_id.to_string()));
        }
        if run.state == RunState::Completed {
            return Err(QaflowError::ResumeBlocked(run.state.to_string()));
        }
        if matches!(run.state, RunState::Executing | RunState::CodexReviewing) {
            warn!(run_id, state = %run.state, "resuming with no tracked instance (crash recovery)");
        }
        workspace::validate_prerequisites(Path::new(&run.workspace_path), from_step)?;

        let guard = self.registry.begin(run_id)?;
        // A resume is a fresh attempt: earlier deliveries of the same
        // transitions must not be absorbed as duplicates.
        {
            let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
            machine.clear_keys_for_run(run_id);
        }
        self.skip_steps_before(run_id, from_step);
        run.state = from_step.mapped_state();
        run.updated_at = chrono::Utc::now();
        self.store.update(&run).await?;
        self.events.publish(PipelineEvent::PipelineResumed {
            run_id: run_id.to_string(),
            from_step,
        });

        info!(run_id, step = %from_step, "pipeline resumed");
        let runner = self.clone();
        tokio::spawn(async move {
            runner.execute_from(run, from_step, None, guard).await;
        });
        Ok(())
    }

    /// Drive the run to `failed` with the operator's note. Work already
    /// dispatched to a collaborator is left to finish; its result is
    /// discarded when the background task next touches the store.
    pub async fn cancel(&self, run_id: &str, note: impl Into<String>) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        self.apply_event(&mut run, RunEvent::Error, None, Some(note.into()), None)
            .await?;
        if let Err(e) = self.write_manifest(&run) {
            warn!(run_id, error = %e, "manifest write failed after cancel");
        }
        Ok(())
    }

    /// Apply `TIMEOUT` on behalf of the external watchdog. The reason code
    /// is derived from the state the run is sitting in.
    pub async fn fire_timeout(&self, run_id: &str) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        self.apply_event(&mut run, RunEvent::Timeout, None, None, None)
            .await
    }

    // ---------------------------------------------------------------------------
    // Step loop
    // ---------------------------------------------------------------------------

    async fn execute_from(
        &self,
        mut run: Run,
        from: PipelineStep,
        feedback: Option<RegenerationFeedback>,
        guard: RegistryGuard,
    ) {
        // Held for the whole execution; dropping it releases the registry
        // entry on every exit path.
        let _guard = guard;

        let mut current = from;
        let mut is_first = true;
        loop {
            match self
                .step_iteration(&mut run, current, is_first, feedback.as_ref())
                .await
            {
                Ok(StepFlow::Suspend) => return,
                Ok(StepFlow::Continue) => match current.next() {
                    Some(next) => {
                        current = next;
                        is_first = false;
                    }
                    None => return,
                },
                Err(e) => {
                    self.fail_run(&mut run, current, e).await;
                    return;
                }
            }
        }
    }

    async fn step_iteration(
        &self,
        run: &mut Run,
        step: PipelineStep,
        is_first: bool,
        feedback: Option<&RegenerationFeedback>,
    ) -> Result<StepFlow> {
        self.events.publish(PipelineEvent::StepStarted {
            run_id: run.id.clone(),
            step,
        });

        // The first step of a (re)start is entered with the state already
        // set; only later boundaries fire entry events.
        if !is_first {
            if let Some(event) = entry_event(step) {
                self.apply_event(run, event, None, None, None).await?;
            }
        }

        self.run_step(run, step, feedback).await?;
        self.events.publish(PipelineEvent::StepCompleted {
            run_id: run.id.clone(),
            step,
        });

        match step {
            PipelineStep::PrdParsing => {
                self.apply_event(run, RunEvent::GenerationComplete, None, None, None)
                    .await?;
                if let Err(e) = self.write_manifest(run) {
                    warn!(run_id = %run.id, error = %e, "manifest write failed");
                }
                self.events.publish(PipelineEvent::ApprovalRequired {
                    run_id: run.id.clone(),
                });
                info!(run_id = %run.id, "suspended awaiting approval");
                Ok(StepFlow::Suspend)
            }
            PipelineStep::QualityGate => {
                if let Err(e) = self.write_manifest(run) {
                    warn!(run_id = %run.id, error = %e, "manifest write failed");
                }
                self.events.publish(PipelineEvent::ConfirmationRequired {
                    run_id: run.id.clone(),
                });
                info!(run_id = %run.id, "suspended awaiting confirmation");
                Ok(StepFlow::Suspend)
            }
            _ => Ok(StepFlow::Continue),
        }
    }

    async fn run_step(
        &self,
        run: &mut Run,
        step: PipelineStep,
        feedback: Option<&RegenerationFeedback>,
    ) -> Result<()> {
        let workspace = PathBuf::from(&run.workspace_path);
        match step {
            PipelineStep::Initialize => {
                workspace::init_workspace(&workspace)?;
                self.write_manifest(run)?;
            }
            PipelineStep::SourceIndexing => {
                // The indexer tooling fills source-context/; the pipeline
                // only guarantees the directory exists for it.
                qaflow_core::io::ensure_dir(&paths::source_context_dir(&workspace))?;
            }
            PipelineStep::PrdParsing => {
                let prd =
                    paths::resolve_prd_path(&self.config.project_root, &workspace, &run.prd_path);
                let prd_text = paths::read_prd(&prd)?;
                let (prior_requirements, prior_cases) = if feedback.is_some() {
                    (
                        load_requirements(&workspace).unwrap_or_default(),
                        load_cases(&workspace).unwrap_or_default(),
                    )
                } else {
                    (Vec::new(), Vec::new())
                };
                let output = self
                    .agents
                    .parse_document(ParseRequest {
                        run_id: run.id.clone(),
                        prd_text,
                        feedback: feedback.cloned(),
                        prior_requirements,
                        prior_cases,
                    })
                    .await?;
                qaflow_core::io::atomic_write(
                    &paths::requirements_path(&workspace),
                    &serde_json::to_vec_pretty(&output.requirements)?,
                )?;
                qaflow_core::io::atomic_write(
                    &paths::test_cases_path(&workspace),
                    &serde_json::to_vec_pretty(&output.test_cases)?,
                )?;
            }
            PipelineStep::TestExecution => {
                let cases = load_cases(&workspace)?;
                let results = self
                    .agents
                    .execute_tests(ExecuteRequest {
                        run_id: run.id.clone(),
                        workspace: workspace.clone(),
                        cases,
                    })
                    .await?;
                qaflow_core::io::atomic_write(
                    &paths::execution_results_path(&workspace),
                    &serde_json::to_vec_pretty(&results)?,
                )?;
                run.tested_routes = results.tested_routes.clone();
                let samples = case_samples(&run.id, &results.assertions);
                self.store
                    .append_execution_history(&run.project_id, &samples)
                    .await?;
            }
            PipelineStep::CodexReview => {
                let results = load_execution_results(&workspace)?;
                let review = self
                    .agents
                    .review_results(ReviewRequest {
                        run_id: run.id.clone(),
                        results,
                    })
                    .await?;
                qaflow_core::io::atomic_write(
                    &paths::review_results_path(&workspace),
                    &serde_json::to_vec_pretty(&review)?,
                )?;
            }
            PipelineStep::CrossValidation => {
                let review = load_review_results(&workspace)?;
                if !review.conflicts.is_empty() {
                    let ids: Vec<&str> = review
                        .conflicts
                        .iter()
                        .map(|c| c.assertion_id.as_str())
                        .collect();
                    return Err(QaflowError::Agent {
                        message: format!(
                            "unresolved verdict conflicts on assertions: {}",
                            ids.join(", ")
                        ),
                        tag: Some("verdict_conflict".to_string()),
                    });
                }
            }
            PipelineStep::ReportGeneration => {
                let report = render_report(run, &workspace)?;
                let path = paths::report_path(&workspace);
                qaflow_core::io::atomic_write(&path, report.as_bytes())?;
                run.report_path = Some(path.display().to_string());
            }
            PipelineStep::QualityGate => {
                let gate = self.compute_gate(run).await?;
                run.quality_metrics = gate.metrics.clone();
                info!(run_id = %run.id, passed = gate.passed, "quality gate computed");
            }
        }
        self.persist_step_outputs(run).await
    }

    /// Persist the fields a step mutated, without clobbering transitions
    /// that landed concurrently. A run driven terminal while the step was
    /// in flight (cancel, watchdog timeout) rejects the write so the
    /// caller discards the result.
    async fn persist_step_outputs(&self, run: &mut Run) -> Result<()> {
        if let Some(fresh) = self.store.find_by_id(&run.id).await? {
            if fresh.state.is_terminal() {
                return Err(QaflowError::TerminalState {
                    state: fresh.state.to_string(),
                    event: "step result".to_string(),
                });
            }
            run.state = fresh.state;
            run.reason_code = fresh.reason_code;
            run.decision_log = fresh.decision_log;
        }
        run.updated_at = chrono::Utc::now();
        self.store.update(run).await
    }

    /// Gate metrics over workspace artifacts, with incomplete and orphaned
    /// assertions excluded from the pass-rate input.
    pub async fn compute_gate(&self, run: &Run) -> Result<GateReport> {
        let workspace = PathBuf::from(&run.workspace_path);
        let requirements = load_requirements(&workspace)?;
        let cases = load_cases(&workspace)?;
        let results = load_execution_results(&workspace)?;

        let report = trace::build_trace(&requirements, &cases, &results.assertions);
        let gateable: Vec<Assertion> = trace::gateable_assertions(&results.assertions, &report)
            .into_iter()
            .cloned()
            .collect();

        let history = self.store.execution_history(&run.project_id).await?;
        Ok(quality::evaluate_gate(
            &requirements,
            &cases,
            &gateable,
            &history,
        ))
    }

    // ---------------------------------------------------------------------------
    // Failure handling
    // ---------------------------------------------------------------------------

    async fn fail_run(&self, run: &mut Run, step: PipelineStep, err: QaflowError) {
        // A terminal-state rejection here means the run was cancelled or
        // timed out while the step was in flight; the result is discarded.
        if matches!(err, QaflowError::TerminalState { .. }) {
            info!(run_id = %run.id, step = %step, "run became terminal mid-step; discarding result");
            return;
        }

        let (message, tag) = match &err {
            QaflowError::Agent { message, tag } => (message.clone(), tag.clone()),
            other => (other.to_string(), None),
        };
        error!(run_id = %run.id, step = %step, error = %message, "step failed");
        self.events.publish(PipelineEvent::StepFailed {
            run_id: run.id.clone(),
            step,
            error: message.clone(),
        });

        if let Err(e) = self
            .apply_event(run, RunEvent::Error, tag, Some(message), None)
            .await
        {
            warn!(run_id = %run.id, error = %e, "could not record failure transition");
        }
        if let Err(e) = self.write_manifest(run) {
            warn!(run_id = %run.id, error = %e, "manifest write failed after failure");
        }
    }

    // ---------------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------------

    async fn load_run(&self, run_id: &str) -> Result<Run> {
        self.store
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| QaflowError::RunNotFound(run_id.to_string()))
    }

    /// Feed one event through the state machine against the freshest stored
    /// state, then persist. Transitions for one run are serialized by the
    /// machine mutex; re-delivered events come back as no-ops and change
    /// nothing.
    async fn apply_event(
        &self,
        run: &mut Run,
        event: RunEvent,
        error_tag: Option<String>,
        reason: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        if let Some(fresh) = self.store.find_by_id(&run.id).await? {
            *run = fresh;
        }

        let mut req = TransitionRequest::new(&run.id, run.state, event);
        req.error_tag = error_tag;
        req.reason = reason;
        req.metadata = metadata;

        let transition = {
            let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
            let transition = machine.transition(&req)?;
            // Terminal runs, retest restarts, and rejections all begin a
            // fresh traversal of edges already walked once, so their
            // idempotency keys are evicted here (bounded cache). A
            // re-delivered duplicate of the evicting event itself is still
            // harmless: it no longer matches the stored state and is
            // rejected instead of double-applied.
            if transition.new_state.is_terminal()
                || matches!(req.event, RunEvent::Retest | RunEvent::Rejected)
            {
                machine.clear_keys_for_run(&run.id);
            }
            transition
        };

        if transition.no_op {
            return Ok(());
        }
        if let Some(entry) = transition.log_entry {
            run.apply_transition(transition.new_state, entry, transition.reason_code);
        }
        self.store.update(run).await
    }

    fn skip_steps_before(&self, run_id: &str, target: PipelineStep) {
        for step in PipelineStep::all() {
            if *step >= target {
                break;
            }
            self.events.publish(PipelineEvent::StepSkipped {
                run_id: run_id.to_string(),
                step: *step,
            });
        }
    }

    fn write_manifest(&self, run: &Run) -> Result<()> {
        let manifest =
            RunManifest::snapshot(run, &self.config.agent_version, &self.config.prompt_version)?;
        manifest.save(Path::new(&run.workspace_path))
    }
}

// ---------------------------------------------------------------------------
// Step boundary events
// ---------------------------------------------------------------------------

/// The machine event fired on entry to a step. Steps that share a state
/// with their predecessor, or that are entered through a human decision,
/// have none.
fn entry_event(step: PipelineStep) -> Option<RunEvent> {
    match step {
        PipelineStep::SourceIndexing => Some(RunEvent::StartParsing),
        PipelineStep::PrdParsing => Some(RunEvent::ParsingComplete),
        PipelineStep::CodexReview => Some(RunEvent::ExecutionComplete),
        PipelineStep::ReportGeneration => Some(RunEvent::ReviewComplete),
        PipelineStep::Initialize
        | PipelineStep::TestExecution
        | PipelineStep::CrossValidation
        | PipelineStep::QualityGate => None,
    }
}

// ---------------------------------------------------------------------------
// Derived data
// ---------------------------------------------------------------------------

/// Collapse assertion verdicts into one outcome per test case: any error
/// makes the case an error, otherwise any failure fails it.
fn case_samples(run_id: &str, assertions: &[Assertion]) -> Vec<ExecutionSample> {
    let mut by_case: std::collections::BTreeMap<&str, Verdict> = std::collections::BTreeMap::new();
    for a in assertions {
        let slot = by_case.entry(a.case_id.as_str()).or_insert(Verdict::Pass);
        match (a.final_verdict, *slot) {
            (Verdict::Error, _) => *slot = Verdict::Error,
            (Verdict::Fail, Verdict::Pass) => *slot = Verdict::Fail,
            _ => {}
        }
    }
    by_case
        .into_iter()
        .map(|(case_id, verdict)| ExecutionSample {
            run_id: run_id.to_string(),
            case_id: case_id.to_string(),
            verdict,
        })
        .collect()
}

fn render_report(run: &Run, workspace: &Path) -> Result<String> {
    let results = load_execution_results(workspace)?;
    let review = load_review_results(workspace)?;

    let (mut passed, mut failed, mut errored) = (0usize, 0usize, 0usize);
    for a in &results.assertions {
        match a.final_verdict {
            Verdict::Pass => passed += 1,
            Verdict::Fail => failed += 1,
            Verdict::Error => errored += 1,
        }
    }
    let with_evidence = results
        .assertions
        .iter()
        .filter(|a| a.evidence_path.is_some())
        .count();

    let mut report = String::new();
    report.push_str(&format!("# Test Report — {}\n\n", run.id));
    report.push_str(&format!("Project: {}\n", run.project_id));
    report.push_str(&format!("PRD: {}\n", run.prd_path));
    report.push_str(&format!(
        "Routes tested: {}\n\n",
        if run.tested_routes.is_empty() {
            "none".to_string()
        } else {
            run.tested_routes.join(", ")
        }
    ));
    report.push_str("## Assertions\n\n");
    report.push_str(&format!(
        "| pass | fail | error | with evidence |\n|---|---|---|---|\n| {passed} | {failed} | {errored} | {with_evidence} |\n\n",
    ));
    report.push_str(&format!(
        "## Review\n\n{} verdicts, {} conflicts\n",
        review.verdicts.len(),
        review.conflicts.len()
    ));
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
