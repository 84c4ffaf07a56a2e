use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::{ForumConfig, RetryConfig};
use crate::db::{
    DatabaseError, KarmaStore, PurgeSummary, UserKarma, VoteKind, VoteOutcome,
};
use crate::util::BackoffPolicy;

/// Vote ledger service: maps reaction emojis to signed votes and keeps
/// the per-author aggregates consistent through the store. Lock
/// contention is retried here so callers see it at most as latency.
pub struct KarmaLedger {
    store: Arc<dyn KarmaStore>,
    retry: BackoffPolicy,
    upvote_emoji: String,
    downvote_emoji: String,
}

impl KarmaLedger {
    pub fn new(store: Arc<dyn KarmaStore>, forum: &ForumConfig, retry: &RetryConfig) -> Self {
        Self {
            store,
            retry: BackoffPolicy::new(
                retry.max_attempts,
                std::time::Duration::from_millis(retry.base_delay_ms),
                std::time::Duration::from_millis(retry.max_delay_ms),
            ),
            upvote_emoji: forum.upvote_emoji.clone(),
            downvote_emoji: forum.downvote_emoji.clone(),
        }
    }

    /// `None` for any emoji that is not one of the two vote emojis.
    pub fn vote_kind_for_emoji(&self, emoji: &str) -> Option<VoteKind> {
        if emoji == self.upvote_emoji {
            Some(VoteKind::Up)
        } else if emoji == self.downvote_emoji {
            Some(VoteKind::Down)
        } else {
            None
        }
    }

    pub fn emoji_for_vote_kind(&self, kind: VoteKind) -> &str {
        match kind {
            VoteKind::Up => &self.upvote_emoji,
            VoteKind::Down => &self.downvote_emoji,
        }
    }

    pub async fn add_vote(
        &self,
        voter_id: i64,
        message_id: i64,
        author_id: i64,
        vote: VoteKind,
    ) -> Result<VoteOutcome, DatabaseError> {
        let mut attempt = 0;
        loop {
            match self.store.add_vote(voter_id, message_id, author_id, vote).await {
                // A unique-constraint race means another writer already
                // recorded this vote. Duplicate delivery, not an error.
                Err(DatabaseError::Conflict(_)) => return Ok(VoteOutcome::Unchanged),
                Err(e) if e.is_retryable() && !self.retry.attempts_exhausted(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(voter_id, message_id, attempt, "vote write hit a locked database, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn remove_vote(
        &self,
        voter_id: i64,
        message_id: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        let mut attempt = 0;
        loop {
            match self.store.remove_vote(voter_id, message_id).await {
                Err(e) if e.is_retryable() && !self.retry.attempts_exhausted(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(voter_id, message_id, attempt, "vote removal hit a locked database, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Message gone at the source: drop every recorded vote for it.
    pub async fn delete_message_votes(&self, message_id: i64) -> Result<u64, DatabaseError> {
        self.store.delete_message_votes(message_id).await
    }

    pub async fn message_votes(
        &self,
        message_id: i64,
    ) -> Result<HashMap<i64, VoteKind>, DatabaseError> {
        self.store.message_votes(message_id).await
    }

    pub async fn recorded_message_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        self.store.recorded_message_ids().await
    }

    pub async fn user_karma(&self, user_id: i64) -> Result<UserKarma, DatabaseError> {
        self.store.user_karma(user_id).await
    }

    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<UserKarma>, DatabaseError> {
        self.store.leaderboard(limit).await
    }

    pub async fn user_rank(&self, user_id: i64) -> Result<i64, DatabaseError> {
        self.store.user_rank(user_id).await
    }

    pub async fn monthly_leaderboard(
        &self,
        year: i32,
        month: u32,
        limit: i64,
    ) -> Result<Vec<UserKarma>, DatabaseError> {
        self.store.monthly_leaderboard(year, month, limit).await
    }

    /// Member-leave purge.
    pub async fn purge_user(&self, user_id: i64) -> Result<PurgeSummary, DatabaseError> {
        self.store.delete_user_data(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::KarmaLedger;
    use crate::config::{Config, DatabaseConfig};
    use crate::db::{DatabaseManager, VoteKind, VoteOutcome};

    fn test_config() -> Config {
        serde_yaml::from_str(
            r#"
forum:
  forum_id: 123
  bot_user_id: 999
"#,
        )
        .expect("config")
    }

    async fn test_ledger() -> (KarmaLedger, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_config = DatabaseConfig {
            path: file.path().to_string_lossy().to_string(),
        };
        let manager = DatabaseManager::new(&db_config).await.expect("db manager");
        manager.migrate().await.expect("migrate");

        let config = test_config();
        let ledger = KarmaLedger::new(
            manager.karma_store(),
            &config.forum,
            &config.retry,
        );
        (ledger, file)
    }

    #[test]
    fn emoji_mapping_covers_both_directions() {
        let config = test_config();
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_config = DatabaseConfig {
            path: file.path().to_string_lossy().to_string(),
        };
        let manager = tokio_test::block_on(DatabaseManager::new(&db_config)).expect("db manager");
        let ledger = KarmaLedger::new(manager.karma_store(), &config.forum, &config.retry);

        assert_eq!(
            ledger.vote_kind_for_emoji("\u{2b06}\u{fe0f}"),
            Some(VoteKind::Up)
        );
        assert_eq!(
            ledger.vote_kind_for_emoji("\u{2b07}\u{fe0f}"),
            Some(VoteKind::Down)
        );
        assert_eq!(ledger.vote_kind_for_emoji("\u{1f389}"), None);
    }

    #[tokio::test]
    async fn scenario_upvote_flip_remove() {
        let (ledger, _file) = test_ledger().await;

        // A upvotes B's message.
        let outcome = ledger.add_vote(1, 100, 2, VoteKind::Up).await.expect("add");
        assert_eq!(outcome, VoteOutcome::Added);
        let state = ledger.user_karma(2).await.expect("karma");
        assert_eq!((state.total_karma, state.upvotes_received), (1, 1));

        // A flips to a downvote.
        let outcome = ledger.add_vote(1, 100, 2, VoteKind::Down).await.expect("flip");
        assert_eq!(outcome, VoteOutcome::Changed);
        let state = ledger.user_karma(2).await.expect("karma");
        assert_eq!(state.total_karma, -1);
        assert_eq!(state.upvotes_received, 0);
        assert_eq!(state.downvotes_received, 1);

        // A removes the reaction.
        assert_eq!(ledger.remove_vote(1, 100).await.expect("remove"), Some(2));
        assert_eq!(ledger.user_karma(2).await.expect("karma").total_karma, 0);
    }

    #[tokio::test]
    async fn duplicate_add_is_reported_as_a_no_op() {
        let (ledger, _file) = test_ledger().await;

        ledger.add_vote(1, 100, 2, VoteKind::Up).await.expect("add");
        let outcome = ledger.add_vote(1, 100, 2, VoteKind::Up).await.expect("again");
        assert_eq!(outcome, VoteOutcome::Unchanged);
        assert_eq!(ledger.user_karma(2).await.expect("karma").total_karma, 1);
    }

    #[tokio::test]
    async fn unknown_user_defaults_to_zeroed_karma() {
        let (ledger, _file) = test_ledger().await;

        let state = ledger.user_karma(42).await.expect("karma");
        assert_eq!(state.user_id, 42);
        assert_eq!(state.total_karma, 0);
        assert_eq!(state.upvotes_received, 0);
    }
}
