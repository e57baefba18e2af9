//! The analysis session state machine.
//!
//! Drives one classification attempt from intake through question/answer
//! rounds to a terminal state, against the injected
//! [`ClassificationProvider`], and hands completed results to the
//! [`ResultCache`].
//!
//! Per-session exchanges are strictly ordered: every session carries a gate
//! mutex held across the collaborator await, so a second `submit_answer` or
//! `poll` for the same session waits for the first to resolve. `cancel`
//! bypasses the gate — it flips state synchronously and bumps the session
//! epoch, and any response that arrives for a stale epoch or a terminal
//! session is discarded unapplied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::domain::{AnalysisResult, AnalysisSession, SessionStatus};
use crate::infra::provider::{
    AnalysisOptions, AnswerResponse, ClassificationProvider, PollResponse, RemoteStatus,
};
use crate::infra::result_cache::{CacheError, ResultCache};
use crate::util::{new_id, now_unix};

#[derive(Debug, Error)]
pub enum SessionError {
    /// Intake collaborator unreachable or returned malformed data. The
    /// session is still recorded (in `Error` state) under `session_id`.
    #[error("session intake failed: {message}")]
    Intake { session_id: String, message: String },
    #[error("question {question_id} was never issued to this session")]
    InvalidQuestion { question_id: String },
    #[error("session {0} is not awaiting answers")]
    NotAwaitingAnswers(String),
    #[error("session {0} is not processing")]
    NotProcessing(String),
    #[error("session {session_id} already reached terminal state {status:?}")]
    SessionTerminal {
        session_id: String,
        status: SessionStatus,
    },
    #[error("unknown session {0}")]
    NotFound(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Engine knobs; defaults suit an interactive client.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Per-call deadline for collaborator exchanges.
    pub request_timeout: Duration,
    /// Pause between rounds of `poll_until_complete`.
    pub poll_interval: Duration,
    /// Overall deadline for `poll_until_complete`.
    pub poll_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            poll_deadline: Duration::from_secs(180),
        }
    }
}

impl EngineConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_deadline(mut self, deadline: Duration) -> Self {
        self.poll_deadline = deadline;
        self
    }
}

struct SessionSlot {
    session: AnalysisSession,
    options: AnalysisOptions,
    /// Bumped on cancel; in-flight responses carrying a stale epoch are
    /// dropped.
    epoch: u64,
    /// Serializes collaborator exchanges for this session.
    gate: Arc<Mutex<()>>,
}

impl SessionSlot {
    fn new(session: AnalysisSession, options: AnalysisOptions) -> Self {
        Self {
            session,
            options,
            epoch: 0,
            gate: Arc::new(Mutex::new(())),
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "session", id = %self.session.id, %message, "session failed");
        self.session.status = SessionStatus::Error;
        self.session.error = Some(message);
    }
}

pub struct AnalysisEngine {
    provider: Arc<dyn ClassificationProvider>,
    results: Arc<ResultCache>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    config: EngineConfig,
}

impl AnalysisEngine {
    pub fn new(provider: Arc<dyn ClassificationProvider>, results: Arc<ResultCache>) -> Self {
        Self {
            provider,
            results,
            sessions: Mutex::new(HashMap::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Create a session and run intake. `needs_questions` routes the session
    /// to `AwaitingQuestions` with the returned question list; otherwise it
    /// goes straight to `Processing`. On collaborator failure the session is
    /// recorded in `Error` state and the failure is returned.
    pub async fn start(
        &self,
        query: impl Into<String>,
        options: AnalysisOptions,
    ) -> Result<AnalysisSession, SessionError> {
        let query = query.into();
        let local_id = new_id();
        let session = AnalysisSession::new(local_id.clone(), query.clone());
        self.sessions
            .lock()
            .await
            .insert(local_id.clone(), SessionSlot::new(session, options.clone()));

        debug!(target: "session", id = %local_id, %query, "starting session");
        let outcome = timeout(
            self.config.request_timeout,
            self.provider.start_session(&query, &options),
        )
        .await;

        let mut sessions = self.sessions.lock().await;
        let mut slot = sessions
            .remove(&local_id)
            .ok_or_else(|| SessionError::NotFound(local_id.clone()))?;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                let message = err.to_string();
                slot.fail(&message);
                let session_id = slot.session.id.clone();
                sessions.insert(session_id.clone(), slot);
                return Err(SessionError::Intake {
                    session_id,
                    message,
                });
            }
            Err(_elapsed) => {
                let message = format!(
                    "intake timed out after {}s",
                    self.config.request_timeout.as_secs()
                );
                slot.fail(&message);
                let session_id = slot.session.id.clone();
                sessions.insert(session_id.clone(), slot);
                return Err(SessionError::Intake {
                    session_id,
                    message,
                });
            }
        };

        if slot.session.status.is_terminal() {
            // Cancelled while intake was in flight; keep the terminal state
            // under the id the caller knows.
            let session = slot.session.clone();
            sessions.insert(session.id.clone(), slot);
            return Ok(session);
        }

        // The service owns session identity from here on; adopt its id.
        if !response.session_id.is_empty() {
            slot.session.id = response.session_id.clone();
        }

        if response.needs_questions {
            slot.session.status = SessionStatus::AwaitingQuestions;
            slot.session.append_questions(response.questions);
        } else {
            slot.session.status = SessionStatus::Processing;
        }

        let session = slot.session.clone();
        debug!(
            target: "session",
            id = %session.id,
            status = session.status.label(),
            questions = session.questions.len(),
            "session started"
        );
        sessions.insert(session.id.clone(), slot);
        Ok(session)
    }

    /// Record an answer and forward it to the collaborator. Valid only while
    /// the session is awaiting answers; an unknown question id is rejected
    /// with the session untouched. Collaborator failures during the exchange
    /// are recorded on the session, not returned.
    pub async fn submit_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: impl Into<String>,
    ) -> Result<AnalysisSession, SessionError> {
        let answer = answer.into();
        let gate = self.answer_gate(session_id, question_id).await?;
        let _exchange = gate.lock().await;

        // Re-validate after the gate: a prior exchange may have advanced or
        // a cancel may have landed while we waited.
        let epoch = {
            let mut sessions = self.sessions.lock().await;
            let slot = require_slot(&mut sessions, session_id)?;
            ensure_awaiting(slot)?;
            if !slot.session.has_question(question_id) {
                return Err(SessionError::InvalidQuestion {
                    question_id: question_id.to_string(),
                });
            }
            slot.session
                .answers
                .insert(question_id.to_string(), answer.clone());
            slot.epoch
        };

        let outcome = timeout(
            self.config.request_timeout,
            self.provider.submit_answer(session_id, question_id, &answer),
        )
        .await;

        let mut sessions = self.sessions.lock().await;
        let slot = require_slot(&mut sessions, session_id)?;
        if slot.epoch != epoch || slot.session.status.is_terminal() {
            // Late response for a cancelled or failed session: discard.
            debug!(target: "session", id = %session_id, "discarding stale answer response");
            return Ok(slot.session.clone());
        }

        match outcome {
            Ok(Ok(response)) => {
                let completion = apply_answer_response(slot, response);
                if let Some(result) = completion {
                    self.complete(slot, result).await?;
                }
            }
            Ok(Err(err)) => slot.fail(err.to_string()),
            Err(_elapsed) => slot.fail(format!(
                "answer exchange timed out after {}s",
                self.config.request_timeout.as_secs()
            )),
        }
        Ok(slot.session.clone())
    }

    /// One status round-trip for a processing session. Completion stores the
    /// result through the cache; failure moves the session to `Error`;
    /// follow-up questions revert it to `AwaitingQuestions`.
    pub async fn poll(&self, session_id: &str) -> Result<AnalysisSession, SessionError> {
        let gate = self.poll_gate(session_id).await?;
        let _exchange = gate.lock().await;

        let epoch = {
            let mut sessions = self.sessions.lock().await;
            let slot = require_slot(&mut sessions, session_id)?;
            ensure_processing(slot)?;
            slot.epoch
        };

        let outcome = timeout(
            self.config.request_timeout,
            self.provider.poll_session(session_id),
        )
        .await;

        let mut sessions = self.sessions.lock().await;
        let slot = require_slot(&mut sessions, session_id)?;
        if slot.epoch != epoch || slot.session.status.is_terminal() {
            debug!(target: "session", id = %session_id, "discarding stale poll response");
            return Ok(slot.session.clone());
        }

        match outcome {
            Ok(Ok(response)) => {
                let completion = apply_poll_response(slot, response);
                if let Some(result) = completion {
                    self.complete(slot, result).await?;
                }
            }
            Ok(Err(err)) => slot.fail(err.to_string()),
            Err(_elapsed) => slot.fail(format!(
                "poll timed out after {}s",
                self.config.request_timeout.as_secs()
            )),
        }
        Ok(slot.session.clone())
    }

    /// Poll at a bounded interval until the session leaves `Processing` or
    /// the deadline elapses. Deadline exhaustion is a first-class outcome:
    /// the session moves to `Error`. Cancellation is observed between
    /// rounds.
    pub async fn poll_until_complete(
        &self,
        session_id: &str,
    ) -> Result<AnalysisSession, SessionError> {
        let deadline = tokio::time::Instant::now() + self.config.poll_deadline;
        loop {
            let session = self
                .session(session_id)
                .await
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            if session.status != SessionStatus::Processing {
                return Ok(session);
            }

            if tokio::time::Instant::now() >= deadline {
                let mut sessions = self.sessions.lock().await;
                let slot = require_slot(&mut sessions, session_id)?;
                if slot.session.status == SessionStatus::Processing {
                    slot.fail(format!(
                        "no result within {}s polling deadline",
                        self.config.poll_deadline.as_secs()
                    ));
                }
                return Ok(slot.session.clone());
            }

            let session = self.poll(session_id).await?;
            if session.status != SessionStatus::Processing {
                return Ok(session);
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Cancel a non-terminal session. Takes effect synchronously; any
    /// in-flight exchange for this session is discarded when it returns.
    pub async fn cancel(&self, session_id: &str) -> Result<AnalysisSession, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let slot = require_slot(&mut sessions, session_id)?;
        if slot.session.status.is_terminal() {
            return Err(SessionError::SessionTerminal {
                session_id: session_id.to_string(),
                status: slot.session.status,
            });
        }
        slot.session.status = SessionStatus::Cancelled;
        slot.epoch += 1;
        debug!(target: "session", id = %session_id, "session cancelled");
        Ok(slot.session.clone())
    }

    /// Start a fresh attempt from a terminal session's query and options.
    pub async fn restart(&self, session_id: &str) -> Result<AnalysisSession, SessionError> {
        let (query, options) = {
            let mut sessions = self.sessions.lock().await;
            let slot = require_slot(&mut sessions, session_id)?;
            if !slot.session.status.is_terminal() {
                return Err(SessionError::SessionTerminal {
                    session_id: session_id.to_string(),
                    status: slot.session.status,
                });
            }
            (slot.session.query.clone(), slot.options.clone())
        };
        self.start(query, options).await
    }

    /// Snapshot of one session.
    pub async fn session(&self, session_id: &str) -> Option<AnalysisSession> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|slot| slot.session.clone())
    }

    /// Snapshots of every known session, newest first.
    pub async fn sessions(&self) -> Vec<AnalysisSession> {
        let sessions = self.sessions.lock().await;
        let mut all: Vec<AnalysisSession> =
            sessions.values().map(|slot| slot.session.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Record that the user opened this session.
    pub async fn mark_viewed(&self, session_id: &str) -> Result<AnalysisSession, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let slot = require_slot(&mut sessions, session_id)?;
        slot.session.last_viewed_at = Some(now_unix());
        Ok(slot.session.clone())
    }

    async fn complete(
        &self,
        slot: &mut SessionSlot,
        result: AnalysisResult,
    ) -> Result<(), SessionError> {
        let result_id = result.id.clone();
        self.results.save(result).await?;
        slot.session.status = SessionStatus::Completed;
        slot.session.result_id = Some(result_id);
        slot.session.progress = 100;
        slot.session.completed_at = Some(now_unix());
        slot.session.error = None;
        debug!(target: "session", id = %slot.session.id, "session completed");
        Ok(())
    }

    async fn answer_gate(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> Result<Arc<Mutex<()>>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let slot = require_slot(&mut sessions, session_id)?;
        ensure_awaiting(slot)?;
        if !slot.session.has_question(question_id) {
            return Err(SessionError::InvalidQuestion {
                question_id: question_id.to_string(),
            });
        }
        Ok(slot.gate.clone())
    }

    async fn poll_gate(&self, session_id: &str) -> Result<Arc<Mutex<()>>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let slot = require_slot(&mut sessions, session_id)?;
        ensure_processing(slot)?;
        Ok(slot.gate.clone())
    }
}

fn require_slot<'a>(
    sessions: &'a mut HashMap<String, SessionSlot>,
    session_id: &str,
) -> Result<&'a mut SessionSlot, SessionError> {
    sessions
        .get_mut(session_id)
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
}

fn ensure_awaiting(slot: &SessionSlot) -> Result<(), SessionError> {
    match slot.session.status {
        SessionStatus::AwaitingQuestions => Ok(()),
        status if status.is_terminal() => Err(SessionError::SessionTerminal {
            session_id: slot.session.id.clone(),
            status,
        }),
        _ => Err(SessionError::NotAwaitingAnswers(slot.session.id.clone())),
    }
}

fn ensure_processing(slot: &SessionSlot) -> Result<(), SessionError> {
    match slot.session.status {
        SessionStatus::Processing => Ok(()),
        status if status.is_terminal() => Err(SessionError::SessionTerminal {
            session_id: slot.session.id.clone(),
            status,
        }),
        _ => Err(SessionError::NotProcessing(slot.session.id.clone())),
    }
}

/// Fold an answer response into the session. Returns a result to store when
/// the session may complete now.
fn apply_answer_response(slot: &mut SessionSlot, response: AnswerResponse) -> Option<AnalysisResult> {
    if let Some(progress) = response.progress {
        slot.session.advance_progress(progress);
    }

    if !response.additional_questions.is_empty() {
        slot.session.append_questions(response.additional_questions);
        return None;
    }

    // Never advance past the answer phase while required questions are
    // open, even if the service already claims completion.
    if !slot.session.required_answered() {
        return None;
    }

    if let Some(result) = response.result {
        return Some(result);
    }
    if response.completed {
        slot.session.status = SessionStatus::Processing;
    }
    None
}

/// Fold a poll response into the session. Returns a result to store when the
/// session completed.
fn apply_poll_response(slot: &mut SessionSlot, response: PollResponse) -> Option<AnalysisResult> {
    if let Some(progress) = response.progress {
        slot.session.advance_progress(progress);
    }

    // Follow-up questions during processing put the session back into the
    // answer phase.
    if !response.additional_questions.is_empty() {
        slot.session.status = SessionStatus::AwaitingQuestions;
        slot.session.append_questions(response.additional_questions);
        return None;
    }

    match response.status {
        RemoteStatus::Completed => match response.result {
            Some(result) => Some(result),
            None => {
                slot.fail("service reported completion without a result");
                None
            }
        },
        RemoteStatus::Failed => {
            slot.fail(
                response
                    .error
                    .unwrap_or_else(|| "classification failed".to_string()),
            );
            None
        }
        RemoteStatus::Processing => None,
    }
}
