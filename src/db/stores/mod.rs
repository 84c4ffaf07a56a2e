use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::DatabaseError;
use super::models::{
    Appeal, AppealStatus, Ban, BanHistoryRecord, CaseLog, ClosureRecord, NewAppeal, NewBan,
    PurgeSummary, SchedulerState, UserKarma, VoteKind, VoteOutcome,
};

/// Vote ledger plus the derived per-user karma aggregate. Every write
/// keeps `total_karma == Σ vote_type` for the affected author within
/// one exclusive transaction.
#[async_trait]
pub trait KarmaStore: Send + Sync {
    async fn add_vote(
        &self,
        voter_id: i64,
        message_id: i64,
        author_id: i64,
        vote: VoteKind,
    ) -> Result<VoteOutcome, DatabaseError>;

    /// Deletes the vote and reverses its contribution. Returns the
    /// author id, or `None` when no vote existed.
    async fn remove_vote(
        &self,
        voter_id: i64,
        message_id: i64,
    ) -> Result<Option<i64>, DatabaseError>;

    /// Drops every recorded vote for a message that no longer exists
    /// at the source, reversing each contribution.
    async fn delete_message_votes(&self, message_id: i64) -> Result<u64, DatabaseError>;

    async fn message_votes(&self, message_id: i64)
        -> Result<HashMap<i64, VoteKind>, DatabaseError>;

    /// All message ids with at least one recorded vote.
    async fn recorded_message_ids(&self) -> Result<Vec<i64>, DatabaseError>;

    async fn user_karma(&self, user_id: i64) -> Result<UserKarma, DatabaseError>;

    async fn leaderboard(&self, limit: i64) -> Result<Vec<UserKarma>, DatabaseError>;

    /// 1-indexed leaderboard rank.
    async fn user_rank(&self, user_id: i64) -> Result<i64, DatabaseError>;

    async fn monthly_leaderboard(
        &self,
        year: i32,
        month: u32,
        limit: i64,
    ) -> Result<Vec<UserKarma>, DatabaseError>;

    /// Member-leave purge: reverses votes the user cast, then removes
    /// their votes, aggregate row, and bans in one transaction.
    async fn delete_user_data(&self, user_id: i64) -> Result<PurgeSummary, DatabaseError>;
}

#[async_trait]
pub trait BanStore: Send + Sync {
    /// Upserts the ban and appends a history record. Returns `false`
    /// without mutation when an identical unexpired ban already exists.
    async fn upsert_ban(&self, ban: &NewBan) -> Result<bool, DatabaseError>;

    /// Global scope (`thread_id = None`) clears every ban for the user.
    async fn remove_ban(&self, user_id: i64, thread_id: Option<i64>)
        -> Result<bool, DatabaseError>;

    async fn is_banned(&self, user_id: i64, thread_id: i64) -> Result<bool, DatabaseError>;

    async fn active_bans(&self, user_id: i64) -> Result<Vec<Ban>, DatabaseError>;

    async fn banned_users(&self) -> Result<Vec<i64>, DatabaseError>;

    /// Deletes bans with `expires_at <= now` and annotates the matching
    /// history rows, returning the deleted bans for notification.
    async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        removal_reason: &str,
    ) -> Result<Vec<Ban>, DatabaseError>;

    /// Annotates the user's unremoved history records in the given scope.
    /// `Some(thread_id)` touches that thread only; `None` touches every
    /// thread, matching a server-wide removal.
    async fn annotate_removal(
        &self,
        user_id: i64,
        thread_id: Option<i64>,
        removed_by: Option<i64>,
        removal_reason: &str,
    ) -> Result<bool, DatabaseError>;

    async fn ban_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<BanHistoryRecord>, DatabaseError>;

    /// Always counted from history, never cached.
    async fn ban_count(&self, user_id: i64) -> Result<i64, DatabaseError>;
}

#[async_trait]
pub trait AppealStore: Send + Sync {
    async fn has_pending(
        &self,
        user_id: i64,
        action: crate::db::ActionKind,
        action_id: i64,
    ) -> Result<bool, DatabaseError>;

    /// Returns the new appeal id, or `None` when a pending appeal for
    /// the same (user, action, action_id) already exists.
    async fn create(&self, appeal: &NewAppeal) -> Result<Option<i64>, DatabaseError>;

    async fn get(&self, appeal_id: i64) -> Result<Option<Appeal>, DatabaseError>;

    async fn set_status(
        &self,
        appeal_id: i64,
        status: AppealStatus,
        reviewed_by: i64,
        denial_reason: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    async fn set_case_message(&self, appeal_id: i64, message_id: i64)
        -> Result<bool, DatabaseError>;

    async fn pending(&self, limit: i64) -> Result<Vec<Appeal>, DatabaseError>;

    async fn for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Appeal>, DatabaseError>;
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Read-increment-write over the single counter row inside one
    /// exclusive transaction.
    async fn next_debate_number(&self) -> Result<i64, DatabaseError>;

    async fn counter(&self) -> Result<i64, DatabaseError>;

    /// Administrative recovery, and the gap-repair counter sync.
    async fn set_counter(&self, value: i64) -> Result<(), DatabaseError>;

    async fn record_thread(&self, thread_id: i64) -> Result<(), DatabaseError>;

    async fn set_analytics_message(
        &self,
        thread_id: i64,
        message_id: i64,
    ) -> Result<(), DatabaseError>;

    async fn analytics_message(&self, thread_id: i64) -> Result<Option<i64>, DatabaseError>;

    async fn clear_analytics_message(&self, thread_id: i64) -> Result<(), DatabaseError>;

    async fn increment_participation(
        &self,
        thread_id: i64,
        user_id: i64,
    ) -> Result<(), DatabaseError>;

    /// Messages counted for the user in the thread; 0 when absent.
    async fn participation_count(
        &self,
        thread_id: i64,
        user_id: i64,
    ) -> Result<i64, DatabaseError>;

    /// Removes all rows referencing a thread deleted at the source.
    async fn delete_thread_data(&self, thread_id: i64) -> Result<(), DatabaseError>;

    async fn add_closure(
        &self,
        thread_id: i64,
        thread_name: &str,
        closed_by: i64,
        reason: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn closure_for_thread(
        &self,
        thread_id: i64,
    ) -> Result<Option<ClosureRecord>, DatabaseError>;

    async fn mark_reopened(&self, thread_id: i64, reopened_by: i64)
        -> Result<bool, DatabaseError>;
}

/// Persistent moderation-record locations, owned by the case-log
/// collaborator but referenced by the appeal engine and ban sweep.
#[async_trait]
pub trait CaseLogStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<CaseLog>, DatabaseError>;

    async fn create(&self, user_id: i64, case_id: i64, thread_id: i64)
        -> Result<(), DatabaseError>;

    async fn next_case_id(&self) -> Result<i64, DatabaseError>;

    async fn touch_unban(&self, user_id: i64) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait SchedulerStateStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<SchedulerState>, DatabaseError>;

    async fn set(&self, name: &str, is_running: bool) -> Result<(), DatabaseError>;
}
