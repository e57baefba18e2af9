use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::util::{new_id, now_unix};

/// Input widget a clarifying question expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Text,
    MultipleChoice,
    Number,
    Boolean,
}

/// A clarifying question issued by the classification service.
/// Immutable once issued to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisQuestion {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    /// Choices for `MultipleChoice`; empty otherwise. Order is preserved.
    #[serde(default)]
    pub options: Vec<String>,
    pub required: bool,
    pub explanation: Option<String>,
}

/// Lifecycle state of a classification session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    AwaitingQuestions,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl SessionStatus {
    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::AwaitingQuestions => "Awaiting answers",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// One end-to-end attempt to classify a product description.
///
/// Owned exclusively by the engine while active; read-only once terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: String,
    /// The user's product description.
    pub query: String,
    pub status: SessionStatus,
    /// 0..=100, monotone while the session is active.
    pub progress: u8,
    pub questions: Vec<AnalysisQuestion>,
    /// question id → answer text.
    pub answers: HashMap<String, String>,
    /// Set iff `status == Completed`.
    pub result_id: Option<String>,
    pub error: Option<String>,
    pub created_at: u64,
    pub completed_at: Option<u64>,
    pub last_viewed_at: Option<u64>,
}

impl AnalysisSession {
    pub fn new(id: String, query: String) -> Self {
        Self {
            id,
            query,
            status: SessionStatus::Initializing,
            progress: 0,
            questions: Vec::new(),
            answers: HashMap::new(),
            result_id: None,
            error: None,
            created_at: now_unix(),
            completed_at: None,
            last_viewed_at: None,
        }
    }

    /// True once every `required` question has an answer recorded.
    pub fn required_answered(&self) -> bool {
        self.questions
            .iter()
            .filter(|q| q.required)
            .all(|q| self.answers.contains_key(&q.id))
    }

    pub fn has_question(&self, question_id: &str) -> bool {
        self.questions.iter().any(|q| q.id == question_id)
    }

    /// Append questions, dropping any whose id the session already carries.
    pub fn append_questions(&mut self, incoming: Vec<AnalysisQuestion>) {
        for question in incoming {
            if !self.has_question(&question.id) {
                self.questions.push(question);
            }
        }
    }

    /// Progress decreases are a data-integrity violation; clamp to the
    /// previous maximum.
    pub fn advance_progress(&mut self, reported: u8) {
        self.progress = self.progress.max(reported.min(100));
    }
}

/// Alternative classification candidate attached to a result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlternativeCode {
    pub code: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Trade-volume statistics for the recommended code, when the service has
/// them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub year: i32,
    pub import_value_usd: f64,
    pub export_value_usd: f64,
    #[serde(default)]
    pub top_partners: Vec<String>,
}

/// Final classification output of a completed session.
///
/// Immutable after creation. `is_bookmarked` is a cache-local overlay, never
/// a mutation of the stored record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub session_id: String,
    pub recommended_code: String,
    /// 0.0..=1.0
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub alternatives: Vec<AlternativeCode>,
    #[serde(default)]
    pub import_requirements: Vec<String>,
    #[serde(default)]
    pub export_requirements: Vec<String>,
    #[serde(default)]
    pub related_regulations: Vec<String>,
    pub trade_statistics: Option<TradeStatistics>,
    pub created_at: u64,
    #[serde(default)]
    pub is_bookmarked: bool,
}

impl AnalysisResult {
    pub fn age_secs(&self) -> u64 {
        now_unix().saturating_sub(self.created_at)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    System,
    Analysis,
    Monitoring,
    Trade,
}

/// User-facing alert kept by the notification ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub priority: NotificationPriority,
    pub category: NotificationCategory,
    /// Opaque producer payload (e.g. the result id a monitoring alert refers
    /// to).
    pub data: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: u64,
    /// Unix seconds past which the ledger drops the entry. The ledger fills
    /// in a default when the producer leaves it unset.
    pub expires_at: Option<u64>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        category: NotificationCategory,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            message: message.into(),
            kind,
            priority: NotificationPriority::default(),
            category,
            data: None,
            read: false,
            created_at: now_unix(),
            expires_at: None,
        }
    }

    pub fn info(category: NotificationCategory, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, category, title, message)
    }

    pub fn success(category: NotificationCategory, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, category, title, message)
    }

    pub fn warning(category: NotificationCategory, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, category, title, message)
    }

    pub fn error(category: NotificationCategory, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, category, title, message)
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, required: bool) -> AnalysisQuestion {
        AnalysisQuestion {
            id: id.to_string(),
            text: format!("question {id}"),
            kind: QuestionKind::Text,
            options: Vec::new(),
            required,
            explanation: None,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Processing.is_terminal());
        assert!(!SessionStatus::AwaitingQuestions.is_terminal());
    }

    #[test]
    fn progress_never_decreases() {
        let mut session = AnalysisSession::new("s1".into(), "query".into());
        session.advance_progress(40);
        session.advance_progress(20);
        assert_eq!(session.progress, 40);
        session.advance_progress(120);
        assert_eq!(session.progress, 100);
    }

    #[test]
    fn append_questions_drops_duplicate_ids() {
        let mut session = AnalysisSession::new("s1".into(), "query".into());
        session.append_questions(vec![question("q1", true), question("q2", false)]);
        session.append_questions(vec![question("q2", false), question("q3", true)]);
        let ids: Vec<_> = session.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn required_answered_ignores_optional_questions() {
        let mut session = AnalysisSession::new("s1".into(), "query".into());
        session.append_questions(vec![question("q1", true), question("q2", false)]);
        assert!(!session.required_answered());
        session.answers.insert("q1".into(), "yes".into());
        assert!(session.required_answered());
    }

    #[test]
    fn result_age_counts_from_creation() {
        let result = AnalysisResult {
            id: "r1".into(),
            session_id: "s1".into(),
            recommended_code: "8517.13".into(),
            confidence: 0.9,
            reasoning: "test".into(),
            alternatives: Vec::new(),
            import_requirements: Vec::new(),
            export_requirements: Vec::new(),
            related_regulations: Vec::new(),
            trade_statistics: None,
            created_at: now_unix().saturating_sub(120),
            is_bookmarked: false,
        };
        let age = result.age_secs();
        assert!(age >= 120);
        assert_eq!(crate::util::age_string(age), "2m");
    }

    #[test]
    fn notification_expiry_checks_against_now() {
        let note = Notification::info(NotificationCategory::System, "t", "m").with_expiry(100);
        assert!(!note.is_expired(99));
        assert!(note.is_expired(100));
        assert!(note.is_expired(101));
    }
}
