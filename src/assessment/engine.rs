//! Turn engine.
//!
//! Every operation loads the session, applies one update and persists the
//! result. Nothing is cached between turns.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::core::AssessmentCore;
use super::grading::EvaluationRequest;
use super::interview::{build_queue, is_complete, InterviewQuestionView, InterviewResponse};
use super::report::{ProfileUpdate, ScreenerReport};
use super::serialize_for_log;
use super::session::{AssessmentSession, Phase, SessionType};
use crate::cat::prior::starting_theta;
use crate::cat::{
    detect, detect_pattern, estimate, evaluate, item_information, select_next_preferring,
    unbounded, Frontier, Observation, PerformancePattern, Prior, Progress, Selection,
};
use crate::config::{AssessmentConfig, ConvergenceThresholds};
use crate::error::{AppResult, AssessmentError};
use crate::item_bank::{Item, ItemView};
use crate::storage::Invocation;

/// Input for `assessment_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartParams {
    pub learner_id: String,
    #[serde(default = "default_session_type")]
    pub session_type: SessionType,
    /// Free-text grade, e.g. "7th grade".
    #[serde(default)]
    pub grade: Option<String>,
    /// Free-text math course, e.g. "Algebra 1".
    #[serde(default)]
    pub math_course: Option<String>,
    /// Ability from the learner's last assessment. Required for growth checks.
    #[serde(default)]
    pub previous_theta: Option<f64>,
    /// Skill ids the learner has worked on since the last assessment.
    /// Growth checks serve these first; starting points ignore them.
    #[serde(default)]
    pub covered_skills: Vec<String>,
}

fn default_session_type() -> SessionType {
    SessionType::StartingPoint
}

/// A learner's answer to a screener item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Answer {
    /// The answer given. Booleans are taken as already scored.
    pub value: serde_json::Value,
    pub response_time_ms: u64,
}

/// Input for `assessment_submit_answer`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerParams {
    pub session_id: String,
    pub learner_id: String,
    pub item_id: String,
    pub answer: Answer,
}

/// Input for `assessment_interview_respond`.
#[derive(Debug, Clone, Deserialize)]
pub struct InterviewResponseParams {
    pub session_id: String,
    pub learner_id: String,
    pub question_id: String,
    pub response: String,
}

/// Input for `assessment_retry_evaluation`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryEvaluationParams {
    pub session_id: String,
    pub learner_id: String,
    /// Regrade just this question; otherwise every pending one.
    #[serde(default)]
    pub question_id: Option<String>,
}

/// Input for read-only session tools.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionParams {
    pub session_id: String,
    pub learner_id: String,
}

/// Output of every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub session_id: String,
    pub session_type: SessionType,
    pub phase: Phase,
    /// Screener status: active, plateaued, converged, max-questions or insufficient-items.
    pub status: String,
    pub next_item: Option<ItemView>,
    pub theta: f64,
    #[serde(with = "unbounded")]
    pub standard_error: f64,
    pub confidence: f64,
    pub converged: bool,
    pub low_confidence: bool,
    pub question_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontier: Option<Frontier>,
    /// Early-mastery or foundational-needs run in the latest responses.
    /// Informational only; it never ends the screener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PerformancePattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_question: Option<InterviewQuestionView>,
    pub pending_evaluations: usize,
    pub progress: Progress,
    pub expires_at: DateTime<Utc>,
}

/// Drives sessions through screener, interview and completion.
#[derive(Clone)]
pub struct AssessmentEngine {
    core: AssessmentCore,
    config: AssessmentConfig,
}

impl AssessmentEngine {
    pub fn new(core: AssessmentCore, config: AssessmentConfig) -> Self {
        Self { core, config }
    }

    pub fn core(&self) -> &AssessmentCore {
        &self.core
    }

    pub fn config(&self) -> &AssessmentConfig {
        &self.config
    }

    /// Start a session, or resume the learner's active one of the same type.
    pub async fn start(&self, params: StartParams) -> AppResult<TurnResult> {
        require_non_empty("learner_id", &params.learner_id)?;

        let previous_theta = match (params.session_type, params.previous_theta) {
            (_, Some(theta)) if !theta.is_finite() => {
                return Err(validation("previous_theta", "must be a finite number").into())
            }
            (SessionType::GrowthCheck, None) => {
                return Err(validation(
                    "previous_theta",
                    "required for a growth check",
                )
                .into())
            }
            (_, theta) => theta,
        };

        let now = Utc::now();
        if let Some(existing) = self
            .core
            .storage()
            .get_active_session(&params.learner_id, params.session_type, now)
            .await?
        {
            info!(
                session_id = %existing.id,
                learner_id = %existing.learner_id,
                question_count = existing.question_count(),
                "Resuming active session"
            );
            return Ok(self.turn_result(&existing));
        }

        let bound = self.config.estimator.theta_bound;
        let prior_mean = match (params.session_type, previous_theta) {
            (SessionType::GrowthCheck, Some(theta)) => theta,
            _ => starting_theta(params.grade.as_deref(), params.math_course.as_deref()),
        }
        .clamp(-bound, bound);

        let mut session = AssessmentSession::new(
            params.learner_id,
            params.session_type,
            Prior::new(prior_mean, self.config.estimator.prior_sd),
            self.thresholds_for(params.session_type),
            Duration::hours(self.config.session_ttl_hours),
        );
        if let Some(theta) = previous_theta {
            session = session.with_previous_theta(theta);
        }
        if params.session_type == SessionType::GrowthCheck {
            session = session.with_covered_skills(params.covered_skills);
        } else if !params.covered_skills.is_empty() {
            debug!(
                learner_id = %session.learner_id,
                "Ignoring covered skills for a starting-point session"
            );
        }

        self.serve_next(&mut session)?;
        self.core.storage().create_session(&session).await?;

        info!(
            session_id = %session.id,
            learner_id = %session.learner_id,
            session_type = %session.session_type,
            theta = session.theta,
            "Assessment session started"
        );

        Ok(self.turn_result(&session))
    }

    /// Score one screener answer and serve the next item.
    ///
    /// An answer for an item already in the history returns the current
    /// state unchanged.
    pub async fn submit_answer(&self, params: AnswerParams) -> AppResult<TurnResult> {
        require_non_empty("session_id", &params.session_id)?;
        require_non_empty("learner_id", &params.learner_id)?;
        require_non_empty("item_id", &params.item_id)?;
        if params.answer.value.is_null() {
            return Err(validation("answer.value", "is required").into());
        }

        let now = Utc::now();
        let mut session = self
            .load_live(&params.session_id, &params.learner_id, now)
            .await?;

        if session.has_answered(&params.item_id) {
            debug!(
                session_id = %session.id,
                item_id = %params.item_id,
                "Answer already recorded; returning current state"
            );
            return Ok(self.turn_result(&session));
        }

        require_phase(&session, Phase::Screener)?;
        match session.pending_item_id.as_deref() {
            Some(pending) if pending == params.item_id => {}
            pending => {
                return Err(AssessmentError::UnexpectedItem {
                    expected: pending.unwrap_or("none").to_string(),
                    received: params.item_id,
                }
                .into())
            }
        }

        let item = self
            .core
            .item_bank()
            .get(&params.item_id)
            .ok_or_else(|| AssessmentError::UnknownItem {
                item_id: params.item_id.clone(),
            })?;
        let correct = score_answer(item, &params.answer.value)?;

        let information_gained =
            item_information(session.theta, item.difficulty, item.discrimination);
        let mut observations = session.observations();
        observations.push(Observation {
            difficulty: item.difficulty,
            discrimination: item.discrimination,
            correct,
        });
        let ability = estimate(&observations, session.prior, &self.config.estimator);
        if ability.clamped {
            warn!(
                session_id = %session.id,
                theta = ability.theta,
                iterations = ability.iterations,
                converged = ability.converged,
                "Ability estimate clamped; flagging low confidence"
            );
        }

        session.record_response(
            item,
            correct,
            params.answer.response_time_ms,
            &ability,
            information_gained,
            self.config.estimator.se_max,
        );

        let verdict = evaluate(
            session.question_count(),
            session.standard_error,
            &session.information_gains(),
            &session.thresholds,
        );
        session.screener_state = session.screener_state.advance(verdict);

        debug!(
            session_id = %session.id,
            item_id = %item.id,
            correct,
            theta = session.theta,
            standard_error = session.standard_error,
            verdict = ?verdict,
            "Answer scored"
        );

        self.serve_next(&mut session)?;
        self.core.storage().update_session(&session).await?;

        info!(
            session_id = %session.id,
            question_count = session.question_count(),
            theta = session.theta,
            status = session.screener_state.status(),
            phase = %session.phase,
            "Screener turn applied"
        );

        Ok(self.turn_result(&session))
    }

    /// Record an interview response, then grade it.
    ///
    /// The response is persisted before the grader is called, so a grading
    /// failure never loses it. Resubmitting the same text is a no-op.
    pub async fn respond_interview(&self, params: InterviewResponseParams) -> AppResult<TurnResult> {
        require_non_empty("session_id", &params.session_id)?;
        require_non_empty("learner_id", &params.learner_id)?;
        require_non_empty("question_id", &params.question_id)?;
        require_non_empty("response", &params.response)?;

        let now = Utc::now();
        let mut session = self
            .load_live(&params.session_id, &params.learner_id, now)
            .await?;

        let question = session
            .question(&params.question_id)
            .ok_or_else(|| question_not_found(&params.question_id))?;
        if let Some(existing) = &question.response {
            if existing.text == params.response {
                return Ok(self.turn_result(&session));
            }
            return Err(AssessmentError::AlreadyAnswered {
                question_id: params.question_id,
            }
            .into());
        }
        require_phase(&session, Phase::Interview)?;

        let question = session
            .question_mut(&params.question_id)
            .ok_or_else(|| question_not_found(&params.question_id))?;
        question.response = Some(InterviewResponse {
            text: params.response,
            submitted_at: now,
        });
        session.updated_at = now;
        self.core.storage().update_session(&session).await?;

        self.grade_question(&mut session, &params.question_id, "assessment_interview_respond")
            .await?;
        self.complete_if_ready(&mut session)?;
        self.core.storage().update_session(&session).await?;

        Ok(self.turn_result(&session))
    }

    /// Re-run grading for answered but ungraded questions.
    pub async fn retry_evaluation(&self, params: RetryEvaluationParams) -> AppResult<TurnResult> {
        require_non_empty("session_id", &params.session_id)?;
        require_non_empty("learner_id", &params.learner_id)?;

        let now = Utc::now();
        let mut session = self
            .load_live(&params.session_id, &params.learner_id, now)
            .await?;
        if session.phase == Phase::Screener {
            require_phase(&session, Phase::Interview)?;
        }

        let targets: Vec<String> = match &params.question_id {
            Some(question_id) => {
                let question = session
                    .question(question_id)
                    .ok_or_else(|| question_not_found(question_id))?;
                if question.response.is_none() {
                    return Err(validation("question_id", "question has not been answered").into());
                }
                if question.evaluation.is_some() {
                    Vec::new()
                } else {
                    vec![question_id.clone()]
                }
            }
            None => session
                .interview_questions
                .iter()
                .filter(|q| q.response.is_some() && q.evaluation.is_none())
                .map(|q| q.question_id.clone())
                .collect(),
        };

        if targets.is_empty() {
            return Ok(self.turn_result(&session));
        }

        for question_id in &targets {
            self.grade_question(&mut session, question_id, "assessment_retry_evaluation")
                .await?;
        }
        self.complete_if_ready(&mut session)?;
        self.core.storage().update_session(&session).await?;

        info!(
            session_id = %session.id,
            regraded = targets.len(),
            pending = session.pending_evaluations(),
            "Evaluation retry finished"
        );

        Ok(self.turn_result(&session))
    }

    /// Current state without applying a turn.
    pub async fn get_session(&self, params: SessionParams) -> AppResult<TurnResult> {
        let session = self.load_owned(&params.session_id, &params.learner_id).await?;
        Ok(self.turn_result(&session))
    }

    pub async fn report(&self, params: SessionParams) -> AppResult<ScreenerReport> {
        let session = self.load_owned(&params.session_id, &params.learner_id).await?;
        Ok(ScreenerReport::from_session(&session))
    }

    /// Payload for the downstream profile updater. Only complete sessions have one.
    pub async fn profile(&self, params: SessionParams) -> AppResult<ProfileUpdate> {
        let session = self.load_owned(&params.session_id, &params.learner_id).await?;
        if session.phase != Phase::Complete {
            return Err(AssessmentError::NotComplete {
                session_id: session.id,
            }
            .into());
        }
        Ok(ProfileUpdate::from_session(&session))
    }

    /// Delete every expired session.
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let removed = self
            .core
            .storage()
            .purge_expired_sessions(Utc::now())
            .await?;
        info!(removed, "Expired sessions purged");
        Ok(removed)
    }

    fn thresholds_for(&self, session_type: SessionType) -> ConvergenceThresholds {
        match session_type {
            SessionType::StartingPoint => self.config.starting_point,
            SessionType::GrowthCheck => self.config.growth_check,
        }
    }

    async fn load_owned(&self, session_id: &str, learner_id: &str) -> AppResult<AssessmentSession> {
        require_non_empty("session_id", session_id)?;
        require_non_empty("learner_id", learner_id)?;

        match self.core.storage().get_session(session_id).await? {
            Some(session) if session.learner_id == learner_id => Ok(session),
            Some(_) => {
                warn!(session_id, learner_id, "Session requested by a different learner");
                Err(session_not_found(session_id).into())
            }
            None => Err(session_not_found(session_id).into()),
        }
    }

    async fn load_live(
        &self,
        session_id: &str,
        learner_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AssessmentSession> {
        let session = self.load_owned(session_id, learner_id).await?;
        if session.is_expired(now) {
            return Err(AssessmentError::SessionExpired {
                session_id: session.id,
            }
            .into());
        }
        Ok(session)
    }

    /// Serve the next screener item, or close the screener when it has
    /// terminated or the bank is exhausted.
    fn serve_next(&self, session: &mut AssessmentSession) -> AppResult<()> {
        if session.phase != Phase::Screener {
            return Ok(());
        }
        if session.screener_state.is_terminated() {
            return self.finish_screener(session);
        }

        let selection = select_next_preferring(
            session.theta,
            &session.asked_ids(),
            &session.coverage,
            self.core.item_bank(),
            &self.config.selector,
            &session.covered_skill_ids(),
        );

        match selection {
            Selection::Item(item) => {
                session.pending_item_id = Some(item.id.clone());
                Ok(())
            }
            Selection::Exhausted => {
                warn!(
                    session_id = %session.id,
                    question_count = session.question_count(),
                    "Item bank exhausted before convergence"
                );
                session.screener_state = session.screener_state.exhaust();
                self.finish_screener(session)
            }
        }
    }

    /// Run frontier detection once and hand over to the interview.
    fn finish_screener(&self, session: &mut AssessmentSession) -> AppResult<()> {
        let analysis = detect(&session.responses, session.theta, &self.config.frontier);

        if session.standard_error > session.thresholds.se_threshold_fallback {
            session.low_confidence = true;
        }

        let questions = build_queue(
            &analysis.candidates,
            session.theta,
            self.core.item_bank(),
            &session.asked_ids(),
        );

        session.pending_item_id = None;
        session.frontier = analysis.frontier;
        session.interview_skills = analysis.candidates;
        session.interview_questions = questions;
        session.advance_phase(Phase::Interview)?;

        info!(
            session_id = %session.id,
            status = session.screener_state.status(),
            question_count = session.question_count(),
            theta = session.theta,
            interview_questions = session.interview_questions.len(),
            "Screener finished"
        );

        if session.interview_questions.is_empty() {
            session.advance_phase(Phase::Complete)?;
            info!(session_id = %session.id, "No interview needed; session complete");
        }
        Ok(())
    }

    /// Grade one answered question and record the outcome on the session.
    ///
    /// Grading failures are recorded on the question rather than returned.
    async fn grade_question(
        &self,
        session: &mut AssessmentSession,
        question_id: &str,
        tool_name: &str,
    ) -> AppResult<()> {
        let question = session
            .question(question_id)
            .ok_or_else(|| question_not_found(question_id))?;
        let Some(response) = &question.response else {
            return Ok(());
        };

        let request = EvaluationRequest {
            question_id: question.question_id.clone(),
            question_type: question.question_type,
            skill_id: question.skill_id.clone(),
            question: question.prompt.clone(),
            rubric: question.rubric.clone(),
            response: response.text.clone(),
        };

        let grader = self.core.grader();
        let start = Instant::now();
        let result = grader.evaluate(&request).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        let mut invocation = Invocation::new(tool_name, serialize_for_log(&request, tool_name))
            .with_session(&session.id);
        if let Some(pipe) = grader.pipe_name() {
            invocation = invocation.with_pipe(pipe);
        }
        let invocation = match &result {
            Ok(evaluation) => invocation.success(serialize_for_log(evaluation, tool_name), latency_ms),
            Err(e) => invocation.failure(e.to_string(), latency_ms),
        };
        if let Err(e) = self.core.storage().log_invocation(&invocation).await {
            warn!(error = %e, session_id = %session.id, "Failed to log grading invocation");
        }

        let question = session
            .question_mut(question_id)
            .ok_or_else(|| question_not_found(question_id))?;
        match result {
            Ok(evaluation) => {
                info!(
                    question_id,
                    rating = %evaluation.rating,
                    latency_ms,
                    "Interview response graded"
                );
                question.record_evaluation(evaluation);
            }
            Err(e) => {
                warn!(
                    question_id,
                    error = %e,
                    attempts = question.evaluation_attempts + 1,
                    latency_ms,
                    "Grading failed; question left pending"
                );
                question.record_evaluation_failure(e.to_string());
            }
        }
        session.updated_at = Utc::now();
        Ok(())
    }

    fn complete_if_ready(&self, session: &mut AssessmentSession) -> AppResult<()> {
        if session.phase != Phase::Interview {
            return Ok(());
        }
        if is_complete(
            &session.interview_questions,
            session.screener_completed_at,
            Utc::now(),
            &self.config.interview,
        ) {
            session.advance_phase(Phase::Complete)?;
            info!(
                session_id = %session.id,
                pending_evaluations = session.pending_evaluations(),
                "Assessment complete"
            );
        }
        Ok(())
    }

    fn turn_result(&self, session: &AssessmentSession) -> TurnResult {
        let next_item = session
            .pending_item_id
            .as_deref()
            .and_then(|id| self.core.item_bank().get(id))
            .map(Item::view);

        TurnResult {
            session_id: session.id.clone(),
            session_type: session.session_type,
            phase: session.phase,
            status: session.screener_state.status().to_string(),
            next_item,
            theta: session.theta,
            standard_error: session.standard_error,
            confidence: session.confidence,
            converged: session.screener_state.is_converged(),
            low_confidence: session.low_confidence,
            question_count: session.question_count(),
            frontier: session.frontier.clone(),
            pattern: detect_pattern(&session.responses, session.theta),
            interview_question: session.next_interview_question().map(|q| q.view()),
            pending_evaluations: session.pending_evaluations(),
            progress: Progress::compute(
                session.question_count(),
                session.standard_error,
                &session.thresholds,
            ),
            expires_at: session.expires_at,
        }
    }
}

/// Score an answer against the item's key.
fn score_answer(item: &Item, value: &serde_json::Value) -> Result<bool, AssessmentError> {
    match value {
        serde_json::Value::Bool(correct) => Ok(*correct),
        serde_json::Value::String(s) if s.trim().is_empty() => {
            Err(validation("answer.value", "must not be empty"))
        }
        serde_json::Value::String(s) => Ok(item.is_correct(s)),
        serde_json::Value::Number(n) => Ok(item.is_correct(&n.to_string())),
        _ => Err(validation(
            "answer.value",
            "must be a string, number or boolean",
        )),
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), AssessmentError> {
    if value.trim().is_empty() {
        return Err(validation(field, "must not be empty"));
    }
    Ok(())
}

fn require_phase(session: &AssessmentSession, expected: Phase) -> Result<(), AssessmentError> {
    if session.phase != expected {
        return Err(AssessmentError::WrongPhase {
            session_id: session.id.clone(),
            expected: expected.to_string(),
            actual: session.phase.to_string(),
        });
    }
    Ok(())
}

fn validation(field: &str, reason: &str) -> AssessmentError {
    AssessmentError::Validation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn session_not_found(session_id: &str) -> AssessmentError {
    AssessmentError::SessionNotFound {
        session_id: session_id.to_string(),
    }
}

fn question_not_found(question_id: &str) -> AssessmentError {
    AssessmentError::QuestionNotFound {
        question_id: question_id.to_string(),
    }
}
