//! Collaborator contract for the external classification service.
//!
//! The core never talks to a transport directly; hosts implement this trait
//! over whatever wire they use (HTTP, WebSocket, in-process model). Mock
//! implementations drive the engine in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AnalysisQuestion, AnalysisResult};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("classification service unreachable: {0}")]
    Unreachable(String),
    #[error("malformed response from classification service: {0}")]
    Malformed(String),
    #[error("classification service rejected the request: {0}")]
    Rejected(String),
}

/// Options accompanying a new classification request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// ISO country the classification targets, when known.
    pub destination_country: Option<String>,
    /// Ask the service to attach trade statistics to the result.
    #[serde(default)]
    pub include_trade_statistics: bool,
}

/// Intake outcome for a new session.
#[derive(Clone, Debug, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub needs_questions: bool,
    #[serde(default)]
    pub questions: Vec<AnalysisQuestion>,
}

/// Outcome of forwarding one answer.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AnswerResponse {
    /// The service considers the question phase finished.
    pub completed: bool,
    /// Present when the service short-circuits straight to a final result.
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub additional_questions: Vec<AnalysisQuestion>,
    pub progress: Option<u8>,
}

/// Remote view of a processing session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PollResponse {
    pub status: RemoteStatus,
    pub result: Option<AnalysisResult>,
    /// The service may come back with follow-up questions even after
    /// processing started; the engine reverts to the answer phase.
    #[serde(default)]
    pub additional_questions: Vec<AnalysisQuestion>,
    pub progress: Option<u8>,
    pub error: Option<String>,
}

/// External classification service the engine drives sessions against.
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    async fn start_session(
        &self,
        query: &str,
        options: &AnalysisOptions,
    ) -> Result<StartSessionResponse, ProviderError>;

    async fn submit_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerResponse, ProviderError>;

    async fn poll_session(&self, session_id: &str) -> Result<PollResponse, ProviderError>;
}
