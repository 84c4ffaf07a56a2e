use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signed vote applied to a single (voter, message) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    Up,
    Down,
}

impl VoteKind {
    pub fn value(self) -> i64 {
        match self {
            VoteKind::Up => 1,
            VoteKind::Down => -1,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(VoteKind::Up),
            -1 => Some(VoteKind::Down),
            _ => None,
        }
    }
}

/// What a ledger write actually did, so repeated delivery of the same
/// external event is observable as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Added,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKarma {
    pub user_id: i64,
    pub total_karma: i64,
    pub upvotes_received: i64,
    pub downvotes_received: i64,
}

impl UserKarma {
    pub fn zero(user_id: i64) -> Self {
        Self {
            user_id,
            total_karma: 0,
            upvotes_received: 0,
            downvotes_received: 0,
        }
    }
}

/// Counts of rows removed by a member-leave purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub karma_rows: u64,
    pub votes_cast: u64,
    pub votes_received: u64,
    pub bans: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub id: i64,
    pub user_id: i64,
    /// `None` means a global ban covering every thread.
    pub thread_id: Option<i64>,
    pub banned_by: i64,
    pub reason: Option<String>,
    /// `None` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBan {
    pub user_id: i64,
    pub thread_id: Option<i64>,
    pub banned_by: i64,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanHistoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub thread_id: Option<i64>,
    pub banned_by: i64,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    pub removed_by: Option<i64>,
    pub removal_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRecord {
    pub id: i64,
    pub thread_id: i64,
    pub thread_name: String,
    pub closed_by: i64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reopened_at: Option<DateTime<Utc>>,
    pub reopened_by: Option<i64>,
}

/// Moderation action an appeal can ask to reverse. Closed set: string
/// branching in the store layer parses back into this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// A participation ban.
    Disallow,
    /// A thread closure.
    Close,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Disallow => "disallow",
            ActionKind::Close => "close",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disallow" => Ok(ActionKind::Disallow),
            "close" => Ok(ActionKind::Close),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppealStatus {
    Pending,
    Approved,
    Denied,
}

impl AppealStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppealStatus::Pending => "pending",
            AppealStatus::Approved => "approved",
            AppealStatus::Denied => "denied",
        }
    }
}

impl fmt::Display for AppealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppealStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AppealStatus::Pending),
            "approved" => Ok(AppealStatus::Approved),
            "denied" => Ok(AppealStatus::Denied),
            other => Err(format!("unknown appeal status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appeal {
    pub id: i64,
    pub user_id: i64,
    pub action: ActionKind,
    /// Ban row id for `Disallow`, thread id for `Close`.
    pub action_id: i64,
    pub reason: String,
    pub additional_context: Option<String>,
    pub status: AppealStatus,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub denial_reason: Option<String>,
    /// Message id of the appeal announcement, edited in place on a
    /// terminal decision.
    pub case_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAppeal {
    pub user_id: i64,
    pub action: ActionKind,
    pub action_id: i64,
    pub reason: String,
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseLog {
    pub user_id: i64,
    pub case_id: i64,
    pub thread_id: i64,
    pub last_unban_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub name: String,
    pub is_running: bool,
    pub updated_at: DateTime<Utc>,
}
