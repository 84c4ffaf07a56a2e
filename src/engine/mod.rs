use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::appeals::{AppealService, ReversalOutcome};
use crate::bans::BanService;
use crate::config::ForumConfig;
use crate::db::{
    Appeal, BanHistoryRecord, DatabaseError, NewAppeal, NewBan, PurgeSummary, ThreadStore,
    UserKarma, VoteKind, VoteOutcome,
};
use crate::events::PlatformEvent;
use crate::karma::KarmaLedger;
use crate::numbering::NumberingAuthority;
use crate::platform::{ChatPlatform, PlatformError, ThreadEdit};

/// Front door for everything the bot's commands and event handlers
/// need. Commands call the query and mutation methods; the platform
/// event stream goes through `handle_event`.
pub struct ModerationEngine {
    ledger: Arc<KarmaLedger>,
    bans: Arc<BanService>,
    appeals: Arc<AppealService>,
    numbering: Arc<NumberingAuthority>,
    threads: Arc<dyn ThreadStore>,
    platform: Arc<dyn ChatPlatform>,
    bot_user_id: i64,
    retired_prefix: String,
}

impl ModerationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<KarmaLedger>,
        bans: Arc<BanService>,
        appeals: Arc<AppealService>,
        numbering: Arc<NumberingAuthority>,
        threads: Arc<dyn ThreadStore>,
        platform: Arc<dyn ChatPlatform>,
        forum: &ForumConfig,
    ) -> Self {
        Self {
            ledger,
            bans,
            appeals,
            numbering,
            threads,
            platform,
            bot_user_id: forum.bot_user_id,
            retired_prefix: forum.retired_prefix.clone(),
        }
    }

    // Karma queries.

    pub async fn user_karma(&self, user_id: i64) -> Result<UserKarma, DatabaseError> {
        self.ledger.user_karma(user_id).await
    }

    pub async fn user_rank(&self, user_id: i64) -> Result<i64, DatabaseError> {
        self.ledger.user_rank(user_id).await
    }

    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<UserKarma>, DatabaseError> {
        self.ledger.leaderboard(limit).await
    }

    pub async fn monthly_leaderboard(
        &self,
        year: i32,
        month: u32,
        limit: i64,
    ) -> Result<Vec<UserKarma>, DatabaseError> {
        self.ledger.monthly_leaderboard(year, month, limit).await
    }

    /// Direct vote entry, for callers that already resolved the
    /// message author (the reconciler, command handlers).
    pub async fn add_vote(
        &self,
        voter_id: i64,
        message_id: i64,
        author_id: i64,
        vote: VoteKind,
    ) -> Result<VoteOutcome, DatabaseError> {
        self.ledger.add_vote(voter_id, message_id, author_id, vote).await
    }

    pub async fn remove_vote(
        &self,
        voter_id: i64,
        message_id: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        self.ledger.remove_vote(voter_id, message_id).await
    }

    /// Member-leave purge across votes, karma and bans.
    pub async fn purge_user(&self, user_id: i64) -> Result<PurgeSummary, DatabaseError> {
        let summary = self.ledger.purge_user(user_id).await?;
        info!(
            user_id,
            votes_cast = summary.votes_cast,
            votes_received = summary.votes_received,
            bans = summary.bans,
            "purged departed user"
        );
        Ok(summary)
    }

    // Bans.

    pub async fn add_ban(&self, ban: &NewBan) -> Result<bool, DatabaseError> {
        self.bans.add_ban(ban).await
    }

    pub async fn remove_ban(
        &self,
        user_id: i64,
        thread_id: Option<i64>,
        removed_by: i64,
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        self.bans
            .remove_ban(user_id, thread_id, Some(removed_by), reason)
            .await
    }

    pub async fn is_user_banned(&self, user_id: i64, thread_id: i64) -> Result<bool, DatabaseError> {
        self.bans.is_banned(user_id, thread_id).await
    }

    pub async fn user_ban_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<BanHistoryRecord>, DatabaseError> {
        self.bans.ban_history(user_id, limit).await
    }

    pub async fn banned_users(&self) -> Result<Vec<i64>, DatabaseError> {
        self.bans.banned_users().await
    }

    // Appeals.

    pub async fn create_appeal(&self, appeal: &NewAppeal) -> Result<Option<i64>, DatabaseError> {
        self.appeals.submit(appeal).await
    }

    pub async fn approve_appeal(
        &self,
        appeal_id: i64,
        reviewer: i64,
    ) -> Result<Option<ReversalOutcome>, DatabaseError> {
        self.appeals.approve(appeal_id, reviewer).await
    }

    pub async fn deny_appeal(
        &self,
        appeal_id: i64,
        reviewer: i64,
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        self.appeals.deny(appeal_id, reviewer, reason).await
    }

    pub async fn pending_appeals(&self, limit: i64) -> Result<Vec<Appeal>, DatabaseError> {
        self.appeals.pending_appeals(limit).await
    }

    pub async fn user_appeals(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Appeal>, DatabaseError> {
        self.appeals.user_appeals(user_id, limit).await
    }

    // Debate threads.

    pub async fn next_debate_number(&self) -> Result<i64, DatabaseError> {
        self.numbering.next_number().await
    }

    pub async fn set_analytics_message(
        &self,
        thread_id: i64,
        message_id: i64,
    ) -> Result<(), DatabaseError> {
        self.threads.set_analytics_message(thread_id, message_id).await
    }

    pub async fn analytics_message(&self, thread_id: i64) -> Result<Option<i64>, DatabaseError> {
        self.threads.analytics_message(thread_id).await
    }

    pub async fn increment_participation(
        &self,
        thread_id: i64,
        user_id: i64,
    ) -> Result<(), DatabaseError> {
        self.threads.increment_participation(thread_id, user_id).await
    }

    pub async fn participation_count(
        &self,
        thread_id: i64,
        user_id: i64,
    ) -> Result<i64, DatabaseError> {
        self.threads.participation_count(thread_id, user_id).await
    }

    /// Applies one platform event to the ledger and thread records.
    pub async fn handle_event(&self, event: PlatformEvent) -> anyhow::Result<()> {
        match event {
            PlatformEvent::ReactionAdded {
                thread_id,
                message_id,
                voter_id,
                emoji,
            } => {
                self.handle_reaction_added(thread_id, message_id, voter_id, &emoji)
                    .await?;
            }
            PlatformEvent::ReactionRemoved {
                thread_id: _,
                message_id,
                voter_id,
                emoji,
            } => {
                if voter_id == self.bot_user_id {
                    return Ok(());
                }
                if self.ledger.vote_kind_for_emoji(&emoji).is_none() {
                    return Ok(());
                }
                if let Some(delta) = self.ledger.remove_vote(voter_id, message_id).await? {
                    debug!(voter_id, message_id, delta, "vote withdrawn");
                }
            }
            PlatformEvent::MessageDeleted {
                thread_id,
                message_id,
            } => {
                let dropped = self.ledger.delete_message_votes(message_id).await?;
                if dropped > 0 {
                    debug!(message_id, dropped, "dropped votes for deleted message");
                }
                if self.threads.analytics_message(thread_id).await? == Some(message_id) {
                    self.threads.clear_analytics_message(thread_id).await?;
                    debug!(thread_id, "analytics message deleted, reference cleared");
                }
            }
            PlatformEvent::ThreadCreated { thread_id, name } => {
                self.adopt_thread(thread_id, &name).await?;
            }
            PlatformEvent::ThreadDeleted { thread_id } => {
                self.threads.delete_thread_data(thread_id).await?;
                info!(thread_id, "cleared records for deleted thread");
            }
        }
        Ok(())
    }

    async fn handle_reaction_added(
        &self,
        thread_id: i64,
        message_id: i64,
        voter_id: i64,
        emoji: &str,
    ) -> anyhow::Result<()> {
        if voter_id == self.bot_user_id {
            return Ok(());
        }
        let Some(kind) = self.ledger.vote_kind_for_emoji(emoji) else {
            return Ok(());
        };
        let message = match self.platform.message(thread_id, message_id).await {
            Ok(Some(message)) => message,
            Ok(None) | Err(PlatformError::NotFound) => {
                debug!(thread_id, message_id, "reaction on unknown message, ignored");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if message.author_is_bot || message.author_id == voter_id {
            return Ok(());
        }

        let outcome = self
            .ledger
            .add_vote(voter_id, message_id, message.author_id, kind)
            .await?;
        if outcome != VoteOutcome::Unchanged {
            self.threads
                .increment_participation(thread_id, voter_id)
                .await?;
        }
        Ok(())
    }

    /// Claims a freshly created debate thread: assigns it the next
    /// number, prefixes the title and records it. Threads that already
    /// carry a number (a restart replaying the event) keep theirs.
    async fn adopt_thread(&self, thread_id: i64, name: &str) -> anyhow::Result<()> {
        if name.starts_with(&self.retired_prefix) {
            return Ok(());
        }
        self.threads.record_thread(thread_id).await?;
        if NumberingAuthority::parse_numbered_title(name).is_some() {
            return Ok(());
        }

        let number = self.numbering.next_number().await?;
        let titled = self.numbering.format_title(number, name);
        let edit = ThreadEdit {
            name: Some(titled.clone()),
            ..ThreadEdit::default()
        };
        if let Err(e) = self.platform.edit_thread(thread_id, &edit).await {
            warn!(thread_id, number, error = %e, "could not apply numbered title");
            return Ok(());
        }
        info!(thread_id, title = %titled, "numbered new debate thread");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::ModerationEngine;
    use crate::appeals::AppealService;
    use crate::bans::BanService;
    use crate::config::{Config, DatabaseConfig};
    use crate::db::DatabaseManager;
    use crate::events::PlatformEvent;
    use crate::karma::KarmaLedger;
    use crate::numbering::NumberingAuthority;
    use crate::platform::mock::{MockNotifier, MockPlatform, MOCK_FORUM_ID};

    const UP: &str = "\u{2b06}\u{fe0f}";
    const DOWN: &str = "\u{2b07}\u{fe0f}";
    const BOT: i64 = 999;

    struct Fixture {
        engine: ModerationEngine,
        platform: MockPlatform,
        _file: NamedTempFile,
    }

    async fn fixture() -> Fixture {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_config = DatabaseConfig {
            path: file.path().to_string_lossy().to_string(),
        };
        let manager = DatabaseManager::new(&db_config).await.expect("db manager");
        manager.migrate().await.expect("migrate");

        let config: Config = serde_yaml::from_str(
            r#"
forum:
  forum_id: 123
  bot_user_id: 999
retry:
  fetch_delay_ms: 0
"#,
        )
        .expect("config");

        let platform = MockPlatform::new();
        let notifier = MockNotifier::new();
        let ledger = Arc::new(KarmaLedger::new(
            manager.karma_store(),
            &config.forum,
            &config.retry,
        ));
        let bans = Arc::new(BanService::new(
            manager.ban_store(),
            manager.case_log_store(),
            Arc::new(notifier.clone()),
        ));
        let numbering = Arc::new(NumberingAuthority::new(
            manager.thread_store(),
            &config.forum,
            &config.retry,
        ));
        let appeals = Arc::new(AppealService::new(
            manager.appeal_store(),
            manager.thread_store(),
            bans.clone(),
            numbering.clone(),
            Arc::new(platform.clone()),
            Arc::new(notifier.clone()),
            MOCK_FORUM_ID,
        ));
        let engine = ModerationEngine::new(
            ledger,
            bans,
            appeals,
            numbering,
            manager.thread_store(),
            Arc::new(platform.clone()),
            &config.forum,
        );

        Fixture {
            engine,
            platform,
            _file: file,
        }
    }

    fn reaction(message_id: i64, voter_id: i64, emoji: &str) -> PlatformEvent {
        PlatformEvent::ReactionAdded {
            thread_id: 500,
            message_id,
            voter_id,
            emoji: emoji.to_string(),
        }
    }

    #[tokio::test]
    async fn reaction_events_drive_the_vote_lifecycle() {
        let fx = fixture().await;
        fx.platform.add_thread(500, "1 | Topic", false);
        fx.platform.add_message(500, 100, 2, false);

        fx.engine.handle_event(reaction(100, 1, UP)).await.expect("add");
        assert_eq!(fx.engine.user_karma(2).await.expect("karma").total_karma, 1);

        fx.engine.handle_event(reaction(100, 1, DOWN)).await.expect("flip");
        assert_eq!(fx.engine.user_karma(2).await.expect("karma").total_karma, -1);

        fx.engine
            .handle_event(PlatformEvent::ReactionRemoved {
                thread_id: 500,
                message_id: 100,
                voter_id: 1,
                emoji: DOWN.to_string(),
            })
            .await
            .expect("remove");
        assert_eq!(fx.engine.user_karma(2).await.expect("karma").total_karma, 0);
    }

    #[tokio::test]
    async fn bot_self_and_foreign_reactions_are_ignored() {
        let fx = fixture().await;
        fx.platform.add_thread(500, "1 | Topic", false);
        fx.platform.add_message(500, 100, 2, false);

        // The bot's own reaction.
        fx.engine.handle_event(reaction(100, BOT, UP)).await.expect("bot");
        // The author voting for themselves.
        fx.engine.handle_event(reaction(100, 2, UP)).await.expect("self");
        // A non-vote emoji.
        fx.engine
            .handle_event(reaction(100, 1, "\u{1f389}"))
            .await
            .expect("party");

        assert_eq!(fx.engine.user_karma(2).await.expect("karma").total_karma, 0);
    }

    #[tokio::test]
    async fn deleting_a_message_drops_its_votes() {
        let fx = fixture().await;
        fx.platform.add_thread(500, "1 | Topic", false);
        fx.platform.add_message(500, 100, 2, false);

        fx.engine.handle_event(reaction(100, 1, UP)).await.expect("add");
        fx.engine.handle_event(reaction(100, 3, UP)).await.expect("add");
        assert_eq!(fx.engine.user_karma(2).await.expect("karma").total_karma, 2);
        fx.engine.set_analytics_message(500, 100).await.expect("set");

        fx.engine
            .handle_event(PlatformEvent::MessageDeleted {
                thread_id: 500,
                message_id: 100,
            })
            .await
            .expect("delete");
        assert_eq!(fx.engine.user_karma(2).await.expect("karma").total_karma, 0);
        // The dangling analytics reference goes with it.
        assert_eq!(fx.engine.analytics_message(500).await.expect("get"), None);
    }

    #[tokio::test]
    async fn new_threads_get_the_next_number() {
        let fx = fixture().await;
        fx.platform.add_thread(500, "Tabs vs Spaces", false);

        fx.engine
            .handle_event(PlatformEvent::ThreadCreated {
                thread_id: 500,
                name: "Tabs vs Spaces".to_string(),
            })
            .await
            .expect("created");

        assert_eq!(
            fx.platform.thread_name(500).as_deref(),
            Some("1 | Tabs vs Spaces")
        );

        // Replaying the event for an already numbered thread keeps the
        // title and does not burn a number.
        fx.engine
            .handle_event(PlatformEvent::ThreadCreated {
                thread_id: 500,
                name: "1 | Tabs vs Spaces".to_string(),
            })
            .await
            .expect("replay");
        assert_eq!(fx.engine.numbering.counter().await.expect("counter"), 1);
    }

    #[tokio::test]
    async fn participation_counts_only_effective_votes() {
        let fx = fixture().await;
        fx.platform.add_thread(500, "1 | Topic", false);
        fx.platform.add_message(500, 100, 2, false);

        fx.engine.handle_event(reaction(100, 1, UP)).await.expect("add");
        // Duplicate delivery of the same reaction.
        fx.engine.handle_event(reaction(100, 1, UP)).await.expect("dup");

        assert_eq!(fx.engine.user_karma(2).await.expect("karma").total_karma, 1);
        assert_eq!(
            fx.engine.participation_count(500, 1).await.expect("count"),
            1
        );
    }
}
