use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::Instant;

use crate::agent_engine::history::{ArtifactStore, Manifest};
use crate::agent_engine::loop_control::{ActionKey, GuardState};
use crate::agent_engine::proposal::ProposedAction;
use crate::agent_engine::state::{Phase, RunOutcome, RunReport, RunState, StepRecord, StuckReason};
use crate::config::{AppConfig, RunConfig};
use crate::errors::{MarksmanError, MarksmanResult};
use crate::executor::actuator::Actuator;
use crate::executor::dispatcher::ActionDispatcher;
use crate::executor::resolver::ActionResolver;
use crate::llm::oracle::{DecisionRequest, Oracle};
use crate::perception::overlay_filter::OverlayFilter;
use crate::perception::pipeline;

/// Drives one task: observe, decide, act, until a terminal state.
///
/// The orchestrator owns the actuator for the whole run and is the only
/// writer of [`RunState`]. Steps run strictly one after another.
pub struct Orchestrator {
    actuator: Box<dyn Actuator>,
    oracle: Arc<dyn Oracle>,
    filter: OverlayFilter,
    dispatcher: ActionDispatcher,
    run: RunConfig,
    stop_flag: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(actuator: Box<dyn Actuator>, oracle: Arc<dyn Oracle>, config: &AppConfig) -> Self {
        Self {
            actuator,
            oracle,
            filter: OverlayFilter::new(config.overlay.clone()),
            dispatcher: ActionDispatcher::new(
                ActionResolver::new(config.resolver.clone()),
                Duration::from_millis(config.run.audit_delay_ms),
                config.browser.scroll_amount,
            ),
            run: config.run.clone(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag ends the run at the next step boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Run `task` to completion. Always writes the manifest and stops the
    /// actuator, whatever the outcome.
    pub async fn run(&mut self, task: &str, start_url: Option<&str>) -> RunReport {
        let mut state = RunState::new(task, self.run.stall_threshold);
        tracing::info!(run_id = %state.run_id, task = %task, "run started");

        let store = match ArtifactStore::create(&self.run.output_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::error!(dir = %self.run.output_dir.display(), error = %e, "cannot create output directory");
                None
            }
        };

        let outcome = match &store {
            Some(store) => {
                let deadline = (self.run.deadline_secs > 0)
                    .then(|| Instant::now() + Duration::from_secs(self.run.deadline_secs));
                let drive = self.drive(&mut state, store, start_url, deadline);
                match AssertUnwindSafe(drive).catch_unwind().await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => RunOutcome::Aborted { error: e.to_string() },
                    Err(_) => RunOutcome::Aborted {
                        error: "step loop panicked".into(),
                    },
                }
            }
            None => RunOutcome::Aborted {
                error: format!("output directory {} unavailable", self.run.output_dir.display()),
            },
        };

        if let Err(e) = self.actuator.stop().await {
            tracing::warn!(error = %e, "actuator stop failed");
        }

        let manifest_path = store.as_ref().and_then(|store| {
            let manifest = Manifest {
                task: state.task.clone(),
                run_id: state.run_id.clone(),
                outcome: outcome.clone(),
                states: state.records.clone(),
            };
            store
                .write_manifest(&manifest)
                .map_err(|e| tracing::error!(error = %e, "manifest write failed"))
                .ok()
        });

        tracing::info!(run_id = %state.run_id, steps = state.step, outcome = %outcome, "run ended");
        RunReport {
            run_id: state.run_id,
            outcome,
            steps: state.step,
            manifest_path,
        }
    }

    async fn drive(
        &mut self,
        state: &mut RunState,
        store: &ArtifactStore,
        start_url: Option<&str>,
        deadline: Option<Instant>,
    ) -> MarksmanResult<RunOutcome> {
        self.actuator.start().await?;
        if let Some(url) = start_url {
            self.actuator.navigate(url).await?;
        }

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                tracing::info!(step = state.step, "stop requested");
                return Ok(RunOutcome::Aborted {
                    error: MarksmanError::Cancelled.to_string(),
                });
            }
            if state.step >= self.run.max_steps {
                tracing::warn!(max_steps = self.run.max_steps, "step ceiling reached");
                return Ok(RunOutcome::Stuck {
                    reason: StuckReason::StepCeiling,
                });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(step = state.step, "run deadline passed");
                return Ok(RunOutcome::Stuck {
                    reason: StuckReason::Deadline,
                });
            }

            state.step += 1;
            if let Some(outcome) = self.step(state, store, deadline).await? {
                return Ok(outcome);
            }
        }
    }

    /// One observe/decide/act cycle. `Some` ends the run.
    async fn step(
        &mut self,
        state: &mut RunState,
        store: &ArtifactStore,
        deadline: Option<Instant>,
    ) -> MarksmanResult<Option<RunOutcome>> {
        let n = state.step;

        // ── Observing ──────────────────────────────────────────────────────
        state.phase = Phase::Observing;
        tokio::time::sleep(Duration::from_millis(self.run.observe_delay_ms)).await;
        let obs = pipeline::observe(self.actuator.as_mut(), &self.filter).await?;
        let screenshot_ref = ArtifactStore::screenshot_name(n, None);
        store.save_png(&screenshot_ref, &obs.annotated_png)?;
        let url = self.actuator.current_url().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "current url unavailable");
            String::new()
        });
        tracing::info!(step = n, labelled = obs.elements.len(), raw = obs.raw_count, url = %url, "observed");

        // ── Deciding ───────────────────────────────────────────────────────
        state.phase = Phase::Deciding;
        let request = DecisionRequest {
            task: state.task.clone(),
            screenshot_png: obs.annotated_png,
            history: state.history.clone(),
            elements: obs.elements.clone(),
        };
        let decision = self.oracle.decide(&request);
        let proposal = match deadline {
            Some(d) => match tokio::time::timeout_at(d, decision).await {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!(step = n, "run deadline passed while waiting for the oracle");
                    return Ok(Some(RunOutcome::Stuck {
                        reason: StuckReason::Deadline,
                    }));
                }
            },
            None => decision.await,
        };
        let action = &proposal.action;
        tracing::info!(step = n, action = action.kind(), thought = %proposal.thought, "oracle decided");

        let guard = state.guard.observe(ActionKey::new(
            action.kind(),
            action.text_param(),
            action.index_param(),
        ));

        let mut record = StepRecord {
            step: n,
            timestamp: chrono::Utc::now(),
            screenshot_ref,
            url,
            thought: proposal.thought.clone(),
            action: action.kind().to_string(),
            params: action.params_json(),
            error: None,
            artifacts: Vec::new(),
        };

        match action {
            ProposedAction::Finish(p) => {
                state.push_record(record);
                let summary = p.summary.clone().unwrap_or_else(|| proposal.thought.clone());
                return Ok(Some(RunOutcome::Finished { summary }));
            }
            ProposedAction::Fail(p) => {
                state.push_record(record);
                return Ok(Some(RunOutcome::Failed {
                    reason: p.reason.clone(),
                }));
            }
            _ => {}
        }
        if guard == GuardState::Stalled {
            state.push_record(record);
            return Ok(Some(RunOutcome::Stuck {
                reason: StuckReason::LoopStall,
            }));
        }

        // ── Acting ─────────────────────────────────────────────────────────
        state.phase = Phase::Acting;
        let out = self
            .dispatcher
            .execute(self.actuator.as_mut(), action, &obs.elements, n, store)
            .await;
        record.error = out.error;
        record.artifacts = out.artifacts;
        state.history.push(out.summary);
        state.push_record(record);

        tokio::time::sleep(Duration::from_millis(self.run.settle_delay_ms)).await;
        Ok(None)
    }
}
