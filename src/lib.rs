//! Core workflow for an AI-assisted trade-code classification client.
//!
//! A product description becomes an [`engine::AnalysisEngine`] session that
//! exchanges clarifying questions with an external classification service
//! until it produces an [`domain::AnalysisResult`]; completed results land in
//! the [`infra::ResultCache`], alongside a [`infra::NotificationLedger`] of
//! user-facing alerts. Transport and persistence are collaborator traits the
//! host injects ([`infra::provider::ClassificationProvider`],
//! [`util::persistence::StateStore`]).

pub mod domain;
pub mod engine;
pub mod infra;
pub mod util;

#[allow(unused_imports)]
pub use domain::{
    AggregatedQuery, AnalysisQuestion, AnalysisResult, AnalysisSession, Notification,
    NotificationCategory, NotificationKind, NotificationPriority, QuerySource, QuestionKind,
    SessionStatus, SourceStatus,
};
#[allow(unused_imports)]
pub use engine::{AnalysisEngine, EngineConfig, SessionError};
#[allow(unused_imports)]
pub use infra::{
    AnalysisOptions, CacheError, ClassificationProvider, LedgerError, NotificationLedger,
    ProviderError, ResultCache,
};
#[allow(unused_imports)]
pub use util::persistence::{JsonFileStore, MemoryStore, PersistError, StateStore};
