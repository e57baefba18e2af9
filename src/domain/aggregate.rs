//! Combines independently-fetched data sources into one composite
//! loading/error/success view for a screen.

use crate::util::now_unix;

/// Fetch state of a single data source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceStatus {
    /// Never fetched (or swept after its gc lifetime).
    #[default]
    Pending,
    Loading,
    Success,
    Error,
}

/// One independently-fetched source participating in a composite view,
/// with its own cache lifetimes and enablement.
#[derive(Clone, Debug)]
pub struct QuerySource {
    pub name: String,
    pub status: SourceStatus,
    pub error: Option<String>,
    /// Unix seconds of the last settle (success or error).
    pub settled_at: Option<u64>,
    /// Seconds after settling before the data counts as stale.
    pub stale_after: Option<u64>,
    /// Seconds after settling before the source is swept back to `Pending`.
    pub gc_after: Option<u64>,
    /// Disabled sources (e.g. requiring a signed-in user) are excluded from
    /// aggregation entirely.
    pub enabled: bool,
}

impl QuerySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: SourceStatus::Pending,
            error: None,
            settled_at: None,
            stale_after: None,
            gc_after: None,
            enabled: true,
        }
    }

    pub fn with_stale_after(mut self, secs: u64) -> Self {
        self.stale_after = Some(secs);
        self
    }

    pub fn with_gc_after(mut self, secs: u64) -> Self {
        self.gc_after = Some(secs);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn start_loading(&mut self) {
        self.status = SourceStatus::Loading;
        self.error = None;
    }

    pub fn succeed_at(&mut self, now: u64) {
        self.status = SourceStatus::Success;
        self.error = None;
        self.settled_at = Some(now);
    }

    pub fn succeed(&mut self) {
        self.succeed_at(now_unix());
    }

    pub fn fail_at(&mut self, message: impl Into<String>, now: u64) {
        self.status = SourceStatus::Error;
        self.error = Some(message.into());
        self.settled_at = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.fail_at(message, now_unix());
    }

    /// Settled means success or error; loading and pending are unsettled.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, SourceStatus::Success | SourceStatus::Error)
    }

    pub fn is_stale(&self, now: u64) -> bool {
        match (self.settled_at, self.stale_after) {
            (Some(at), Some(ttl)) => now.saturating_sub(at) > ttl,
            // Never settled counts as stale; no lifetime means never stale.
            (None, _) => true,
            (_, None) => false,
        }
    }

    fn should_sweep(&self, now: u64) -> bool {
        match (self.settled_at, self.gc_after) {
            (Some(at), Some(ttl)) => now.saturating_sub(at) > ttl,
            _ => false,
        }
    }
}

/// Composite view over N sources: loading if any enabled source loads,
/// errored if any enabled source errored, success once every enabled source
/// has settled.
#[derive(Clone, Debug, Default)]
pub struct AggregatedQuery {
    sources: Vec<QuerySource>,
}

impl AggregatedQuery {
    pub fn new(sources: Vec<QuerySource>) -> Self {
        Self { sources }
    }

    pub fn push(&mut self, source: QuerySource) {
        self.sources.push(source);
    }

    pub fn source(&self, name: &str) -> Option<&QuerySource> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn source_mut(&mut self, name: &str) -> Option<&mut QuerySource> {
        self.sources.iter_mut().find(|s| s.name == name)
    }

    fn enabled(&self) -> impl Iterator<Item = &QuerySource> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn is_loading(&self) -> bool {
        self.enabled().any(|s| s.status == SourceStatus::Loading)
    }

    pub fn is_error(&self) -> bool {
        self.enabled().any(|s| s.status == SourceStatus::Error)
    }

    pub fn is_success(&self) -> bool {
        self.enabled().all(|s| s.is_settled())
    }

    pub fn errors(&self) -> Vec<&str> {
        self.enabled()
            .filter_map(|s| s.error.as_deref())
            .collect()
    }

    /// Sources whose gc lifetime has elapsed revert to `Pending` so the next
    /// render refetches them.
    pub fn sweep_at(&mut self, now: u64) {
        for source in &mut self.sources {
            if source.should_sweep(now) {
                source.status = SourceStatus::Pending;
                source.error = None;
                source.settled_at = None;
            }
        }
    }

    pub fn sweep(&mut self) {
        self.sweep_at(now_unix());
    }
}
