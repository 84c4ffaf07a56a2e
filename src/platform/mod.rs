use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::db::{Appeal, Ban, BanHistoryRecord};

#[cfg(test)]
pub mod mock;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,

    /// Throttled by the remote side. `retry_after` is the server hint,
    /// when one was given.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Timeouts are treated like throttling by the retry policy.
    #[error("request timed out")]
    Timeout,

    #[error("platform error: {0}")]
    Other(String),
}

impl PlatformError {
    pub fn is_throttle(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited { .. } | PlatformError::Timeout
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: i64,
    /// Forum channel the thread lives under.
    pub parent_id: i64,
    pub name: String,
    pub archived: bool,
    pub locked: bool,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub id: i64,
    pub thread_id: i64,
    pub author_id: i64,
    pub author_is_bot: bool,
}

/// Partial thread edit. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ThreadEdit {
    pub name: Option<String>,
    pub archived: Option<bool>,
    pub locked: Option<bool>,
}

/// Read and edit surface of the chat platform the engine reconciles
/// against. Implementations own their timeouts and report them as
/// `PlatformError::Timeout`.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// All threads of the configured forum, archived included when
    /// asked for.
    async fn forum_threads(
        &self,
        include_archived: bool,
    ) -> Result<Vec<ThreadInfo>, PlatformError>;

    async fn thread(&self, thread_id: i64) -> Result<Option<ThreadInfo>, PlatformError>;

    async fn thread_messages(&self, thread_id: i64) -> Result<Vec<MessageInfo>, PlatformError>;

    async fn message(
        &self,
        thread_id: i64,
        message_id: i64,
    ) -> Result<Option<MessageInfo>, PlatformError>;

    /// User ids currently reacting with `emoji` on the message. A
    /// deleted message surfaces as `NotFound`, which is a repair
    /// signal, not a failure.
    async fn reaction_users(
        &self,
        thread_id: i64,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<i64>, PlatformError>;

    async fn edit_thread(&self, thread_id: i64, edit: &ThreadEdit) -> Result<(), PlatformError>;
}

/// Outbound notifications. Failures here are logged by callers and
/// never escalate past a warning.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn appeal_decided(&self, appeal: &Appeal) -> Result<(), PlatformError>;

    async fn ban_expired(
        &self,
        ban: &Ban,
        history: Option<&BanHistoryRecord>,
    ) -> Result<(), PlatformError>;

    /// Edit the stored case announcement in place to reflect a
    /// terminal appeal decision.
    async fn edit_case_announcement(
        &self,
        message_id: i64,
        appeal: &Appeal,
    ) -> Result<(), PlatformError>;
}

/// Notifier that only logs. Used when no delivery channel is wired up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn appeal_decided(&self, appeal: &Appeal) -> Result<(), PlatformError> {
        info!(
            appeal_id = appeal.id,
            user_id = appeal.user_id,
            status = %appeal.status,
            "appeal decision recorded"
        );
        Ok(())
    }

    async fn ban_expired(
        &self,
        ban: &Ban,
        _history: Option<&BanHistoryRecord>,
    ) -> Result<(), PlatformError> {
        info!(user_id = ban.user_id, thread_id = ?ban.thread_id, "ban expired");
        Ok(())
    }

    async fn edit_case_announcement(
        &self,
        message_id: i64,
        appeal: &Appeal,
    ) -> Result<(), PlatformError> {
        info!(message_id, appeal_id = appeal.id, "case announcement update recorded");
        Ok(())
    }
}
