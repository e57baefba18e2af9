//! Collaborator contracts and the process-wide stores.

pub mod notifications;
pub mod provider;
pub mod result_cache;

#[allow(unused_imports)]
pub use notifications::{LedgerError, NotificationLedger, DEFAULT_EXPIRY_SECS, LEDGER_LIMIT};
#[allow(unused_imports)]
pub use provider::{
    AnalysisOptions, AnswerResponse, ClassificationProvider, PollResponse, ProviderError,
    RemoteStatus, StartSessionResponse,
};
#[allow(unused_imports)]
pub use result_cache::{CacheError, ResultCache, RECENT_LIMIT};
