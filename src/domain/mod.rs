//! Domain model for the classification workflow lives here.

pub mod aggregate;
pub mod entities;

#[allow(unused_imports)]
pub use aggregate::{AggregatedQuery, QuerySource, SourceStatus};
#[allow(unused_imports)]
pub use entities::{
    AlternativeCode, AnalysisQuestion, AnalysisResult, AnalysisSession, Notification,
    NotificationCategory, NotificationKind, NotificationPriority, QuestionKind, SessionStatus,
    TradeStatistics,
};
