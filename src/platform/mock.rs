use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::db::{Appeal, Ban, BanHistoryRecord};

use super::{ChatPlatform, MessageInfo, Notifier, PlatformError, ThreadEdit, ThreadInfo};

/// In-memory chat platform for tests. State is behind a shared mutex
/// so tests can mutate it while a service holds the same handle.
#[derive(Clone, Default)]
pub struct MockPlatform {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    threads: HashMap<i64, ThreadInfo>,
    messages: HashMap<i64, Vec<MessageInfo>>,
    reactions: HashMap<(i64, String), Vec<i64>>,
    deleted_messages: HashSet<i64>,
    edits: Vec<(i64, ThreadEdit)>,
    edit_failures: HashSet<i64>,
    throttles_remaining: u32,
}

impl MockState {
    fn take_throttle(&mut self) -> bool {
        if self.throttles_remaining > 0 {
            self.throttles_remaining -= 1;
            true
        } else {
            false
        }
    }
}

/// Forum id the mock files threads under unless told otherwise.
pub const MOCK_FORUM_ID: i64 = 123;

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thread(&self, id: i64, name: &str, archived: bool) {
        self.add_thread_in(id, MOCK_FORUM_ID, name, archived);
    }

    pub fn add_thread_in(&self, id: i64, parent_id: i64, name: &str, archived: bool) {
        self.inner.lock().threads.insert(
            id,
            ThreadInfo {
                id,
                parent_id,
                name: name.to_string(),
                archived,
                locked: false,
                last_activity: None,
            },
        );
    }

    pub fn set_last_activity(&self, id: i64, at: chrono::DateTime<chrono::Utc>) {
        if let Some(t) = self.inner.lock().threads.get_mut(&id) {
            t.last_activity = Some(at);
        }
    }

    pub fn set_locked(&self, id: i64, locked: bool) {
        if let Some(t) = self.inner.lock().threads.get_mut(&id) {
            t.locked = locked;
        }
    }

    pub fn thread_state(&self, id: i64) -> Option<(bool, bool)> {
        self.inner
            .lock()
            .threads
            .get(&id)
            .map(|t| (t.archived, t.locked))
    }

    pub fn add_message(&self, thread_id: i64, message_id: i64, author_id: i64, is_bot: bool) {
        self.inner
            .lock()
            .messages
            .entry(thread_id)
            .or_default()
            .push(MessageInfo {
                id: message_id,
                thread_id,
                author_id,
                author_is_bot: is_bot,
            });
    }

    pub fn set_reactions(&self, message_id: i64, emoji: &str, users: Vec<i64>) {
        self.inner
            .lock()
            .reactions
            .insert((message_id, emoji.to_string()), users);
    }

    /// Makes later reaction fetches for the message return `NotFound`.
    pub fn delete_message(&self, thread_id: i64, message_id: i64) {
        let mut state = self.inner.lock();
        state.deleted_messages.insert(message_id);
        if let Some(msgs) = state.messages.get_mut(&thread_id) {
            msgs.retain(|m| m.id != message_id);
        }
    }

    pub fn thread_name(&self, thread_id: i64) -> Option<String> {
        self.inner.lock().threads.get(&thread_id).map(|t| t.name.clone())
    }

    pub fn edits(&self) -> Vec<(i64, ThreadEdit)> {
        self.inner.lock().edits.clone()
    }

    /// Makes `edit_thread` fail for the given thread with `Forbidden`.
    pub fn fail_edits_for(&self, thread_id: i64) {
        self.inner.lock().edit_failures.insert(thread_id);
    }

    /// Makes the next `n` reaction fetches fail with `RateLimited`.
    pub fn throttle_next(&self, n: u32) {
        self.inner.lock().throttles_remaining = n;
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn forum_threads(
        &self,
        include_archived: bool,
    ) -> Result<Vec<ThreadInfo>, PlatformError> {
        let mut threads: Vec<ThreadInfo> = self
            .inner
            .lock()
            .threads
            .values()
            .filter(|t| t.parent_id == MOCK_FORUM_ID)
            .filter(|t| include_archived || !t.archived)
            .cloned()
            .collect();
        threads.sort_by_key(|t| t.id);
        Ok(threads)
    }

    async fn thread(&self, thread_id: i64) -> Result<Option<ThreadInfo>, PlatformError> {
        Ok(self.inner.lock().threads.get(&thread_id).cloned())
    }

    async fn thread_messages(&self, thread_id: i64) -> Result<Vec<MessageInfo>, PlatformError> {
        let state = self.inner.lock();
        if !state.threads.contains_key(&thread_id) {
            return Err(PlatformError::NotFound);
        }
        Ok(state.messages.get(&thread_id).cloned().unwrap_or_default())
    }

    async fn message(
        &self,
        thread_id: i64,
        message_id: i64,
    ) -> Result<Option<MessageInfo>, PlatformError> {
        Ok(self
            .inner
            .lock()
            .messages
            .get(&thread_id)
            .and_then(|msgs| msgs.iter().find(|m| m.id == message_id))
            .cloned())
    }

    async fn reaction_users(
        &self,
        _thread_id: i64,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<i64>, PlatformError> {
        let mut state = self.inner.lock();
        if state.take_throttle() {
            return Err(PlatformError::RateLimited { retry_after: None });
        }
        if state.deleted_messages.contains(&message_id) {
            return Err(PlatformError::NotFound);
        }
        Ok(state
            .reactions
            .get(&(message_id, emoji.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn edit_thread(&self, thread_id: i64, edit: &ThreadEdit) -> Result<(), PlatformError> {
        let mut state = self.inner.lock();
        if state.edit_failures.contains(&thread_id) {
            return Err(PlatformError::Forbidden("edits disabled".to_string()));
        }
        let thread = state
            .threads
            .get_mut(&thread_id)
            .ok_or(PlatformError::NotFound)?;
        if let Some(name) = &edit.name {
            thread.name = name.clone();
        }
        if let Some(archived) = edit.archived {
            thread.archived = archived;
        }
        if let Some(locked) = edit.locked {
            thread.locked = locked;
        }
        state.edits.push((thread_id, edit.clone()));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockNotifier {
    inner: Arc<Mutex<NotifierState>>,
}

#[derive(Default)]
struct NotifierState {
    appeal_decisions: Vec<Appeal>,
    expired_bans: Vec<(Ban, Option<BanHistoryRecord>)>,
    case_edits: Vec<(i64, Appeal)>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appeal_decisions(&self) -> Vec<Appeal> {
        self.inner.lock().appeal_decisions.clone()
    }

    pub fn expired_bans(&self) -> Vec<Ban> {
        self.inner
            .lock()
            .expired_bans
            .iter()
            .map(|(ban, _)| ban.clone())
            .collect()
    }

    /// Expiry notices with the history context each one carried.
    pub fn expired_contexts(&self) -> Vec<(Ban, Option<BanHistoryRecord>)> {
        self.inner.lock().expired_bans.clone()
    }

    pub fn case_edits(&self) -> Vec<(i64, Appeal)> {
        self.inner.lock().case_edits.clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn appeal_decided(&self, appeal: &Appeal) -> Result<(), PlatformError> {
        self.inner.lock().appeal_decisions.push(appeal.clone());
        Ok(())
    }

    async fn ban_expired(
        &self,
        ban: &Ban,
        history: Option<&BanHistoryRecord>,
    ) -> Result<(), PlatformError> {
        self.inner
            .lock()
            .expired_bans
            .push((ban.clone(), history.cloned()));
        Ok(())
    }

    async fn edit_case_announcement(
        &self,
        message_id: i64,
        appeal: &Appeal,
    ) -> Result<(), PlatformError> {
        self.inner.lock().case_edits.push((message_id, appeal.clone()));
        Ok(())
    }
}
