//! Append-only ledger of user-facing alerts with read state and time-based
//! expiry.
//!
//! The list and its unread counter persist across restarts; the open/closed
//! state of the notification panel does not. Expiry is an explicit schedule
//! keyed by notification id, so tests drive it with virtual time instead of
//! wall-clock delays.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{Notification, NotificationCategory};
use crate::util::{new_id, now_unix, persistence::PersistError, persistence::StateStore};

const STORE_KEY: &str = "notifications";

/// Ledger never grows past this; oldest entries are pruned first.
pub const LEDGER_LIMIT: usize = 100;

/// Entries without an explicit expiry are dropped this long after creation.
pub const DEFAULT_EXPIRY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no notification with id {0}")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] PersistError),
}

/// Cancellable deferred removal, keyed by notification id.
#[derive(Debug, Default)]
struct ExpirySchedule {
    due: HashMap<String, u64>,
}

impl ExpirySchedule {
    fn schedule(&mut self, id: &str, at: u64) {
        self.due.insert(id.to_string(), at);
    }

    fn cancel(&mut self, id: &str) {
        self.due.remove(id);
    }

    /// Ids whose deadline has passed as of `now`, removed from the schedule.
    fn drain_due(&mut self, now: u64) -> Vec<String> {
        let due: Vec<String> = self
            .due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &due {
            self.due.remove(id);
        }
        due
    }

    fn clear(&mut self) {
        self.due.clear();
    }
}

/// Durable projection — the only part that reaches the store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PersistedNotifications {
    /// Newest first.
    notifications: Vec<Notification>,
    unread_count: usize,
}

struct LedgerState {
    durable: PersistedNotifications,
    schedule: ExpirySchedule,
    panel_open: bool,
}

pub struct NotificationLedger {
    state: Mutex<LedgerState>,
    store: Arc<dyn StateStore>,
}

impl NotificationLedger {
    /// Build the ledger, restoring the durable projection and rebuilding the
    /// expiry schedule from persisted deadlines.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, LedgerError> {
        let durable = match store.get(STORE_KEY).await? {
            Some(raw) => match serde_json::from_str::<PersistedNotifications>(&raw) {
                Ok(persisted) => persisted,
                Err(err) => {
                    warn!(target: "ledger", %err, "failed to parse persisted notifications; starting empty");
                    PersistedNotifications::default()
                }
            },
            None => PersistedNotifications::default(),
        };

        let mut schedule = ExpirySchedule::default();
        for note in &durable.notifications {
            if let Some(at) = note.expires_at {
                schedule.schedule(&note.id, at);
            }
        }

        Ok(Self {
            state: Mutex::new(LedgerState {
                durable,
                schedule,
                panel_open: false,
            }),
            store,
        })
    }

    async fn persist(&self, durable: &PersistedNotifications) -> Result<(), LedgerError> {
        let json = serde_json::to_string(durable).map_err(PersistError::from)?;
        self.store.set(STORE_KEY, json).await?;
        Ok(())
    }

    /// Append an alert: assigns a fresh id and creation timestamp, schedules
    /// removal (24 h default when the producer set no expiry), prepends, and
    /// prunes the oldest entries past the 100-entry cap.
    pub async fn add(&self, notification: Notification) -> Result<Notification, LedgerError> {
        self.add_at(notification, now_unix()).await
    }

    /// `add` against an explicit clock, for deterministic tests.
    pub async fn add_at(
        &self,
        mut notification: Notification,
        now: u64,
    ) -> Result<Notification, LedgerError> {
        notification.id = new_id();
        notification.created_at = now;
        notification.read = false;
        let expires_at = notification.expires_at.unwrap_or(now + DEFAULT_EXPIRY_SECS);
        notification.expires_at = Some(expires_at);

        let mut state = self.state.lock().await;
        state.schedule.schedule(&notification.id, expires_at);
        state.durable.notifications.insert(0, notification.clone());
        state.durable.unread_count += 1;

        while state.durable.notifications.len() > LEDGER_LIMIT {
            if let Some(dropped) = state.durable.notifications.pop() {
                state.schedule.cancel(&dropped.id);
                if !dropped.read {
                    state.durable.unread_count = state.durable.unread_count.saturating_sub(1);
                }
            }
        }

        debug!(target: "ledger", id = %notification.id, category = ?notification.category, "notification added");
        self.persist(&state.durable).await?;
        Ok(notification)
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let note = state
            .durable
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        if !note.read {
            note.read = true;
            state.durable.unread_count = state.durable.unread_count.saturating_sub(1);
        }
        self.persist(&state.durable).await
    }

    pub async fn mark_all_read(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        for note in &mut state.durable.notifications {
            note.read = true;
        }
        state.durable.unread_count = 0;
        self.persist(&state.durable).await
    }

    /// Remove an entry; the unread counter only moves if it was unread.
    pub async fn remove(&self, id: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let index = state
            .durable
            .notifications
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        let removed = state.durable.notifications.remove(index);
        state.schedule.cancel(&removed.id);
        if !removed.read {
            state.durable.unread_count = state.durable.unread_count.saturating_sub(1);
        }
        self.persist(&state.durable).await
    }

    /// Drop every entry whose expiry has passed; returns how many were
    /// removed.
    pub async fn clear_expired(&self) -> Result<usize, LedgerError> {
        self.clear_expired_at(now_unix()).await
    }

    /// `clear_expired` against an explicit clock, for deterministic tests.
    pub async fn clear_expired_at(&self, now: u64) -> Result<usize, LedgerError> {
        let mut state = self.state.lock().await;
        let due = state.schedule.drain_due(now);
        if due.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for id in due {
            if let Some(index) = state.durable.notifications.iter().position(|n| n.id == id) {
                let note = state.durable.notifications.remove(index);
                if !note.read {
                    state.durable.unread_count = state.durable.unread_count.saturating_sub(1);
                }
                removed += 1;
            }
        }

        debug!(target: "ledger", removed, "expired notifications cleared");
        self.persist(&state.durable).await?;
        Ok(removed)
    }

    pub async fn by_category(&self, category: NotificationCategory) -> Vec<Notification> {
        self.state
            .lock()
            .await
            .durable
            .notifications
            .iter()
            .filter(|n| n.category == category)
            .cloned()
            .collect()
    }

    pub async fn unread(&self) -> Vec<Notification> {
        self.state
            .lock()
            .await
            .durable
            .notifications
            .iter()
            .filter(|n| !n.read)
            .cloned()
            .collect()
    }

    pub async fn unread_count(&self) -> usize {
        self.state.lock().await.durable.unread_count
    }

    /// Full list, newest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.durable.notifications.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.durable.notifications.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Transient panel visibility; never persisted.
    pub async fn set_panel_open(&self, open: bool) {
        self.state.lock().await.panel_open = open;
    }

    pub async fn panel_open(&self) -> bool {
        self.state.lock().await.panel_open
    }

    /// Clear everything, including the persisted projection. Used on user
    /// sign-out.
    pub async fn reset(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.durable = PersistedNotifications::default();
        state.schedule.clear();
        state.panel_open = false;
        self.store.delete(STORE_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NotificationKind;
    use crate::util::persistence::MemoryStore;

    fn note(category: NotificationCategory) -> Notification {
        Notification::new(NotificationKind::Info, category, "title", "message")
    }

    async fn ledger() -> NotificationLedger {
        NotificationLedger::load(Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    async fn assert_unread_invariant(ledger: &NotificationLedger) {
        let expected = ledger
            .notifications()
            .await
            .iter()
            .filter(|n| !n.read)
            .count();
        assert_eq!(ledger.unread_count().await, expected);
    }

    #[tokio::test]
    async fn unread_count_tracks_read_state_through_every_operation() {
        let ledger = ledger().await;
        let a = ledger.add(note(NotificationCategory::System)).await.unwrap();
        let b = ledger.add(note(NotificationCategory::Analysis)).await.unwrap();
        let _c = ledger.add(note(NotificationCategory::Trade)).await.unwrap();
        assert_eq!(ledger.unread_count().await, 3);

        ledger.mark_read(&a.id).await.unwrap();
        assert_unread_invariant(&ledger).await;

        // Marking twice does not double-decrement.
        ledger.mark_read(&a.id).await.unwrap();
        assert_eq!(ledger.unread_count().await, 2);

        ledger.remove(&b.id).await.unwrap();
        assert_unread_invariant(&ledger).await;

        // Removing an already-read entry leaves the counter alone.
        ledger.remove(&a.id).await.unwrap();
        assert_eq!(ledger.unread_count().await, 1);

        ledger.mark_all_read().await.unwrap();
        assert_eq!(ledger.unread_count().await, 0);
        assert_unread_invariant(&ledger).await;
    }

    #[tokio::test]
    async fn ledger_caps_at_one_hundred_oldest_dropped() {
        let ledger = ledger().await;
        let mut first_id = None;
        for i in 0..(LEDGER_LIMIT + 5) {
            let added = ledger
                .add_at(note(NotificationCategory::System), i as u64)
                .await
                .unwrap();
            if i == 0 {
                first_id = Some(added.id);
            }
        }

        assert_eq!(ledger.len().await, LEDGER_LIMIT);
        assert_eq!(ledger.unread_count().await, LEDGER_LIMIT);
        let notifications = ledger.notifications().await;
        assert!(notifications.iter().all(|n| n.id != first_id.clone().unwrap()));
        assert_unread_invariant(&ledger).await;
    }

    #[tokio::test]
    async fn default_expiry_is_twenty_four_hours() {
        let ledger = ledger().await;
        let added = ledger
            .add_at(note(NotificationCategory::System), 1_000)
            .await
            .unwrap();
        assert_eq!(added.expires_at, Some(1_000 + DEFAULT_EXPIRY_SECS));
    }

    #[tokio::test]
    async fn clear_expired_respects_virtual_time() {
        let ledger = ledger().await;
        let now = 10_000;
        ledger
            .add_at(
                note(NotificationCategory::Monitoring).with_expiry(now + 3600),
                now,
            )
            .await
            .unwrap();

        // Before expiry: nothing happens.
        assert_eq!(ledger.clear_expired_at(now + 3599).await.unwrap(), 0);
        assert_eq!(ledger.len().await, 1);

        // Past expiry: removed, unread counter decremented.
        assert_eq!(ledger.clear_expired_at(now + 3600).await.unwrap(), 1);
        assert!(ledger.is_empty().await);
        assert_eq!(ledger.unread_count().await, 0);
    }

    #[tokio::test]
    async fn clear_expired_leaves_read_counter_alone_for_read_entries() {
        let ledger = ledger().await;
        let now = 5_000;
        let read_one = ledger
            .add_at(note(NotificationCategory::System).with_expiry(now + 10), now)
            .await
            .unwrap();
        ledger
            .add_at(note(NotificationCategory::System).with_expiry(now + 10), now)
            .await
            .unwrap();
        ledger.mark_read(&read_one.id).await.unwrap();
        assert_eq!(ledger.unread_count().await, 1);

        assert_eq!(ledger.clear_expired_at(now + 11).await.unwrap(), 2);
        assert_eq!(ledger.unread_count().await, 0);
    }

    #[tokio::test]
    async fn removed_entries_no_longer_expire() {
        let ledger = ledger().await;
        let now = 100;
        let added = ledger
            .add_at(note(NotificationCategory::System).with_expiry(now + 50), now)
            .await
            .unwrap();
        ledger.remove(&added.id).await.unwrap();
        assert_eq!(ledger.clear_expired_at(now + 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn category_and_unread_views_filter() {
        let ledger = ledger().await;
        ledger.add(note(NotificationCategory::Monitoring)).await.unwrap();
        let sys = ledger.add(note(NotificationCategory::System)).await.unwrap();
        ledger.add(note(NotificationCategory::Monitoring)).await.unwrap();
        ledger.mark_read(&sys.id).await.unwrap();

        assert_eq!(
            ledger.by_category(NotificationCategory::Monitoring).await.len(),
            2
        );
        assert_eq!(ledger.by_category(NotificationCategory::Trade).await.len(), 0);
        assert_eq!(ledger.unread().await.len(), 2);
    }

    #[tokio::test]
    async fn list_persists_across_restart_but_panel_state_does_not() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());

        let ledger = NotificationLedger::load(store.clone()).await.unwrap();
        ledger.add(note(NotificationCategory::Trade)).await.unwrap();
        ledger.set_panel_open(true).await;
        drop(ledger);

        let reloaded = NotificationLedger::load(store).await.unwrap();
        assert_eq!(reloaded.len().await, 1);
        assert_eq!(reloaded.unread_count().await, 1);
        assert!(!reloaded.panel_open().await);
    }

    #[tokio::test]
    async fn corrupt_persisted_payload_starts_empty() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        store
            .set("notifications", "not json".to_string())
            .await
            .unwrap();

        let ledger = NotificationLedger::load(store).await.unwrap();
        assert!(ledger.is_empty().await);
        assert_eq!(ledger.unread_count().await, 0);

        // Still usable after discarding the corrupt payload.
        ledger.add(note(NotificationCategory::System)).await.unwrap();
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn expiry_schedule_survives_restart() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let now = 42;

        let ledger = NotificationLedger::load(store.clone()).await.unwrap();
        ledger
            .add_at(note(NotificationCategory::System).with_expiry(now + 5), now)
            .await
            .unwrap();
        drop(ledger);

        let reloaded = NotificationLedger::load(store).await.unwrap();
        assert_eq!(reloaded.clear_expired_at(now + 6).await.unwrap(), 1);
    }
}
