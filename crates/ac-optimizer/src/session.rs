//! Negotiated session and the one-evaluation-in-flight discipline.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use ac_types::{
    AcResult, EvaluatePrepareRequest, EvaluationError, EvaluationResult, SearchSpace,
};

use crate::config::ClientConfig;
use crate::resolver::{Assignment, Evaluation};

/// The user's objective function.
pub trait Application: Send + Sync {
    /// Compute objectives and constraints, reading variables through
    /// `evaluation`.
    fn evaluate(&self, evaluation: &Evaluation) -> AcResult<EvaluationResult>;
}

impl<F> Application for F
where
    F: Fn(&Evaluation) -> AcResult<EvaluationResult> + Send + Sync,
{
    fn evaluate(&self, evaluation: &Evaluation) -> AcResult<EvaluationResult> {
        self(evaluation)
    }
}

/// Lifecycle of the evaluation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    /// No assignment received yet.
    Idle,
    /// An assignment is installed and no run is in progress.
    Prepared,
    /// The objective function is running.
    Running,
}

enum Slot {
    Idle,
    Prepared(Arc<Evaluation>),
    Running(Arc<Evaluation>),
}

/// A negotiated search space ready to serve evaluations.
///
/// Holds at most one evaluation. `prepare_evaluation` installs a new one
/// (dropping the previous assignment and its resolved values) unless a run
/// is in progress; `run_evaluation` requires a prepared evaluation and keeps
/// it, cache included, until the next prepare.
pub struct Session {
    config: ClientConfig,
    space: Arc<SearchSpace>,
    application: Arc<dyn Application>,
    slot: Mutex<Slot>,
}

impl Session {
    pub(crate) fn new(
        config: ClientConfig,
        space: SearchSpace,
        application: Arc<dyn Application>,
    ) -> Self {
        Self {
            config,
            space: Arc::new(space),
            application,
            slot: Mutex::new(Slot::Idle),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn search_space(&self) -> &Arc<SearchSpace> {
        &self.space
    }

    pub fn state(&self) -> EvaluationState {
        match &*self.slot.lock() {
            Slot::Idle => EvaluationState::Idle,
            Slot::Prepared(_) => EvaluationState::Prepared,
            Slot::Running(_) => EvaluationState::Running,
        }
    }

    /// The installed evaluation, if any.
    pub fn current_evaluation(&self) -> Option<Arc<Evaluation>> {
        match &*self.slot.lock() {
            Slot::Idle => None,
            Slot::Prepared(evaluation) | Slot::Running(evaluation) => Some(evaluation.clone()),
        }
    }

    /// Handle evaluate-prepare: decode the assignment and install it.
    pub fn prepare_evaluation(&self, request: &EvaluatePrepareRequest) -> AcResult<Uuid> {
        let assignment = Assignment::from_wire(request)?;
        self.install(assignment)
    }

    /// Replace the assignment with `assignment` and reset resolved values.
    pub fn install(&self, assignment: Assignment) -> AcResult<Uuid> {
        let mut slot = self.slot.lock();
        if let Slot::Running(current) = &*slot {
            return Err(EvaluationError::InFlight {
                evaluation_id: current.id().to_string(),
            }
            .into());
        }

        let values = assignment.len();
        let evaluation = Arc::new(Evaluation::new(self.space.clone(), assignment));
        let id = evaluation.id();
        *slot = Slot::Prepared(evaluation);

        info!(evaluation = %id, values, "evaluation prepared");
        Ok(id)
    }

    /// Handle evaluate-run: invoke the objective against the prepared
    /// evaluation.
    pub fn run_evaluation(&self) -> AcResult<EvaluationResult> {
        let evaluation = self.begin_run()?;
        let _guard = RunGuard {
            slot: &self.slot,
            evaluation: evaluation.clone(),
        };

        let started = Utc::now();
        let result = self.application.evaluate(&evaluation);
        let elapsed_ms = (Utc::now() - started).num_milliseconds();
        let prepared_ms = (started - evaluation.prepared_at()).num_milliseconds();

        match &result {
            Ok(output) => info!(
                evaluation = %evaluation.id(),
                objectives = output.objectives.len(),
                resolved = evaluation.resolved_count(),
                prepared_ms,
                elapsed_ms,
                "evaluation completed"
            ),
            Err(error) => warn!(
                evaluation = %evaluation.id(),
                elapsed_ms,
                error = %error,
                "evaluation failed"
            ),
        }
        result
    }

    fn begin_run(&self) -> AcResult<Arc<Evaluation>> {
        let mut slot = self.slot.lock();
        let evaluation = match &*slot {
            Slot::Idle => return Err(EvaluationError::NotPrepared.into()),
            Slot::Running(current) => {
                return Err(EvaluationError::InFlight {
                    evaluation_id: current.id().to_string(),
                }
                .into())
            }
            Slot::Prepared(evaluation) => evaluation.clone(),
        };
        *slot = Slot::Running(evaluation.clone());
        Ok(evaluation)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("variables", &self.space.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Returns the slot to `Prepared` when a run ends, including by panic.
struct RunGuard<'a> {
    slot: &'a Mutex<Slot>,
    evaluation: Arc<Evaluation>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if let Slot::Running(current) = &*slot {
            if current.id() == self.evaluation.id() {
                *slot = Slot::Prepared(self.evaluation.clone());
            }
        }
    }
}
