use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::SqliteConnection;

use crate::db::schema::{
    appeals, ban_history, case_logs, closure_history, debate_bans, scheduler_state, votes,
};
use crate::util::{format_ts, now_ts, parse_ts};

use super::{
    DatabaseError,
    models::{
        ActionKind, Appeal, AppealStatus, Ban, BanHistoryRecord, CaseLog, ClosureRecord, NewAppeal,
        NewBan, PurgeSummary, SchedulerState, UserKarma, VoteKind, VoteOutcome,
    },
};

/// Opens a connection with the pragmas every caller relies on. WAL and
/// the busy timeout keep short write bursts from surfacing as hard
/// lock errors.
fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    let mut conn =
        SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))?;
    conn.batch_execute(
        "PRAGMA busy_timeout = 5000; \
         PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON;",
    )
    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    Ok(conn)
}

#[derive(QueryableByName)]
struct RowId {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

fn last_insert_rowid(conn: &mut SqliteConnection) -> Result<i64, DatabaseError> {
    diesel::sql_query("SELECT last_insert_rowid() AS id")
        .get_result::<RowId>(conn)
        .map(|r| r.id)
        .map_err(Into::into)
}

/// Applies a karma delta to the author's aggregate row, creating it on
/// first sight. The total mirrors the signed ledger sum exactly and
/// may go negative; the direction counters floor at zero.
fn apply_karma_delta(
    conn: &mut SqliteConnection,
    author_id: i64,
    karma_delta: i64,
    up_delta: i64,
    down_delta: i64,
) -> Result<(), DatabaseError> {
    diesel::sql_query(
        "INSERT INTO users (user_id, total_karma, upvotes_received, downvotes_received) \
         VALUES (?, ?, MAX(0, ?), MAX(0, ?)) \
         ON CONFLICT(user_id) DO UPDATE SET \
         total_karma = total_karma + ?, \
         upvotes_received = MAX(0, upvotes_received + ?), \
         downvotes_received = MAX(0, downvotes_received + ?)",
    )
    .bind::<BigInt, _>(author_id)
    .bind::<BigInt, _>(karma_delta)
    .bind::<BigInt, _>(up_delta)
    .bind::<BigInt, _>(down_delta)
    .bind::<BigInt, _>(karma_delta)
    .bind::<BigInt, _>(up_delta)
    .bind::<BigInt, _>(down_delta)
    .execute(conn)?;
    Ok(())
}

fn count_deltas(vote: VoteKind) -> (i64, i64) {
    match vote {
        VoteKind::Up => (1, 0),
        VoteKind::Down => (0, 1),
    }
}

#[derive(Insertable)]
#[diesel(table_name = votes)]
struct NewVoteRow {
    voter_id: i64,
    message_id: i64,
    author_id: i64,
    vote_type: i64,
    created_at: String,
}

pub struct SqliteKarmaStore {
    db_path: Arc<String>,
}

impl SqliteKarmaStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::KarmaStore for SqliteKarmaStore {
    async fn add_vote(
        &self,
        voter_id_param: i64,
        message_id_param: i64,
        author_id_param: i64,
        vote: VoteKind,
    ) -> Result<VoteOutcome, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::votes::dsl::*;
                let existing: Option<(i64, i64)> = votes
                    .filter(voter_id.eq(voter_id_param).and(message_id.eq(message_id_param)))
                    .select((vote_type, author_id))
                    .first::<(i64, i64)>(conn)
                    .optional()?;

                match existing {
                    Some((old, _)) if old == vote.value() => Ok(VoteOutcome::Unchanged),
                    Some((old, stored_author)) => {
                        diesel::update(votes.filter(
                            voter_id.eq(voter_id_param).and(message_id.eq(message_id_param)),
                        ))
                        .set((vote_type.eq(vote.value()), created_at.eq(now_ts())))
                        .execute(conn)?;

                        // Flip delta is new minus old, so the ledger and
                        // the aggregate stay in lockstep.
                        let (up_new, down_new) = count_deltas(vote);
                        let old_kind = VoteKind::from_value(old).ok_or_else(|| {
                            DatabaseError::Query(format!("corrupt vote_type {old} in ledger"))
                        })?;
                        let (up_old, down_old) = count_deltas(old_kind);
                        apply_karma_delta(
                            conn,
                            stored_author,
                            vote.value() - old,
                            up_new - up_old,
                            down_new - down_old,
                        )?;
                        Ok(VoteOutcome::Changed)
                    }
                    None => {
                        diesel::insert_into(votes)
                            .values(&NewVoteRow {
                                voter_id: voter_id_param,
                                message_id: message_id_param,
                                author_id: author_id_param,
                                vote_type: vote.value(),
                                created_at: now_ts(),
                            })
                            .execute(conn)?;

                        let (up, down) = count_deltas(vote);
                        apply_karma_delta(conn, author_id_param, vote.value(), up, down)?;
                        Ok(VoteOutcome::Added)
                    }
                }
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn remove_vote(
        &self,
        voter_id_param: i64,
        message_id_param: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::votes::dsl::*;
                let existing: Option<(i64, i64)> = votes
                    .filter(voter_id.eq(voter_id_param).and(message_id.eq(message_id_param)))
                    .select((vote_type, author_id))
                    .first::<(i64, i64)>(conn)
                    .optional()?;

                let Some((value, stored_author)) = existing else {
                    return Ok(None);
                };

                diesel::delete(votes.filter(
                    voter_id.eq(voter_id_param).and(message_id.eq(message_id_param)),
                ))
                .execute(conn)?;

                let kind = VoteKind::from_value(value).ok_or_else(|| {
                    DatabaseError::Query(format!("corrupt vote_type {value} in ledger"))
                })?;
                let (up, down) = count_deltas(kind);
                apply_karma_delta(conn, stored_author, -value, -up, -down)?;
                Ok(Some(stored_author))
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_message_votes(&self, message_id_param: i64) -> Result<u64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::votes::dsl::*;
                let rows: Vec<(i64, i64)> = votes
                    .filter(message_id.eq(message_id_param))
                    .select((vote_type, author_id))
                    .load::<(i64, i64)>(conn)?;

                for (value, stored_author) in &rows {
                    let kind = VoteKind::from_value(*value).ok_or_else(|| {
                        DatabaseError::Query(format!("corrupt vote_type {value} in ledger"))
                    })?;
                    let (up, down) = count_deltas(kind);
                    apply_karma_delta(conn, *stored_author, -value, -up, -down)?;
                }

                diesel::delete(votes.filter(message_id.eq(message_id_param))).execute(conn)?;
                Ok(rows.len() as u64)
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn message_votes(
        &self,
        message_id_param: i64,
    ) -> Result<HashMap<i64, VoteKind>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::votes::dsl::*;
            let rows: Vec<(i64, i64)> = votes
                .filter(message_id.eq(message_id_param))
                .select((voter_id, vote_type))
                .load::<(i64, i64)>(&mut conn)?;
            Ok(rows
                .into_iter()
                .filter_map(|(voter, value)| VoteKind::from_value(value).map(|k| (voter, k)))
                .collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn recorded_message_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::votes::dsl::*;
            votes
                .select(message_id)
                .distinct()
                .load::<i64>(&mut conn)
                .map_err(Into::into)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn user_karma(&self, user_id_param: i64) -> Result<UserKarma, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::users::dsl::*;
            let row: Option<(i64, i64, i64, i64)> = users
                .filter(user_id.eq(user_id_param))
                .select((user_id, total_karma, upvotes_received, downvotes_received))
                .first::<(i64, i64, i64, i64)>(&mut conn)
                .optional()?;
            Ok(row
                .map(|(uid, total, up, down)| UserKarma {
                    user_id: uid,
                    total_karma: total,
                    upvotes_received: up,
                    downvotes_received: down,
                })
                .unwrap_or_else(|| UserKarma::zero(user_id_param)))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn leaderboard(&self, limit_param: i64) -> Result<Vec<UserKarma>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::users::dsl::*;
            let rows: Vec<(i64, i64, i64, i64)> = users
                .order((total_karma.desc(), user_id.asc()))
                .limit(limit_param)
                .select((user_id, total_karma, upvotes_received, downvotes_received))
                .load::<(i64, i64, i64, i64)>(&mut conn)?;
            Ok(rows
                .into_iter()
                .map(|(uid, total, up, down)| UserKarma {
                    user_id: uid,
                    total_karma: total,
                    upvotes_received: up,
                    downvotes_received: down,
                })
                .collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn user_rank(&self, user_id_param: i64) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query(
                "SELECT COUNT(*) + 1 AS id FROM users \
                 WHERE total_karma > COALESCE(\
                     (SELECT total_karma FROM users WHERE user_id = ?), 0)",
            )
            .bind::<BigInt, _>(user_id_param)
            .get_result::<RowId>(&mut conn)
            .map(|r| r.id)
            .map_err(Into::into)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn monthly_leaderboard(
        &self,
        year: i32,
        month: u32,
        limit_param: i64,
    ) -> Result<Vec<UserKarma>, DatabaseError> {
        let start = month_start(year, month)?;
        let end = if month == 12 {
            month_start(year + 1, 1)?
        } else {
            month_start(year, month + 1)?
        };
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let rows = diesel::sql_query(
                "SELECT author_id, SUM(vote_type) AS karma, \
                 SUM(CASE WHEN vote_type > 0 THEN 1 ELSE 0 END) AS ups, \
                 SUM(CASE WHEN vote_type < 0 THEN 1 ELSE 0 END) AS downs \
                 FROM votes WHERE created_at >= ? AND created_at < ? \
                 GROUP BY author_id ORDER BY karma DESC, author_id ASC LIMIT ?",
            )
            .bind::<Text, _>(format_ts(start))
            .bind::<Text, _>(format_ts(end))
            .bind::<BigInt, _>(limit_param)
            .load::<MonthlyKarmaRow>(&mut conn)?;
            Ok(rows
                .into_iter()
                .map(|r| UserKarma {
                    user_id: r.author_id,
                    total_karma: r.karma,
                    upvotes_received: r.ups,
                    downvotes_received: r.downs,
                })
                .collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_user_data(&self, user_id_param: i64) -> Result<PurgeSummary, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::votes::dsl as v;

                // Reverse votes the leaver cast against other authors
                // before the rows go away.
                let cast: Vec<(i64, i64)> = v::votes
                    .filter(v::voter_id.eq(user_id_param).and(v::author_id.ne(user_id_param)))
                    .select((v::vote_type, v::author_id))
                    .load::<(i64, i64)>(conn)?;
                for (value, stored_author) in &cast {
                    let kind = VoteKind::from_value(*value).ok_or_else(|| {
                        DatabaseError::Query(format!("corrupt vote_type {value} in ledger"))
                    })?;
                    let (up, down) = count_deltas(kind);
                    apply_karma_delta(conn, *stored_author, -value, -up, -down)?;
                }

                let votes_cast =
                    diesel::delete(v::votes.filter(v::voter_id.eq(user_id_param)))
                        .execute(conn)? as u64;
                let votes_received =
                    diesel::delete(v::votes.filter(v::author_id.eq(user_id_param)))
                        .execute(conn)? as u64;

                use crate::db::schema::users::dsl as u;
                let karma_rows = diesel::delete(u::users.filter(u::user_id.eq(user_id_param)))
                    .execute(conn)? as u64;

                use crate::db::schema::debate_bans::dsl as b;
                let bans = diesel::delete(b::debate_bans.filter(b::user_id.eq(user_id_param)))
                    .execute(conn)? as u64;

                use crate::db::schema::debate_participation::dsl as p;
                diesel::delete(p::debate_participation.filter(p::user_id.eq(user_id_param)))
                    .execute(conn)?;

                Ok(PurgeSummary {
                    karma_rows,
                    votes_cast,
                    votes_received,
                    bans,
                })
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>, DatabaseError> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| DatabaseError::Query(format!("invalid month {year}-{month:02}")))
}

#[derive(QueryableByName)]
struct MonthlyKarmaRow {
    #[diesel(sql_type = BigInt)]
    author_id: i64,
    #[diesel(sql_type = BigInt)]
    karma: i64,
    #[diesel(sql_type = BigInt)]
    ups: i64,
    #[diesel(sql_type = BigInt)]
    downs: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = debate_bans)]
struct DbBan {
    id: i64,
    user_id: i64,
    thread_id: Option<i64>,
    banned_by: i64,
    reason: Option<String>,
    expires_at: Option<String>,
    created_at: String,
}

impl DbBan {
    fn to_ban(&self) -> Result<Ban, DatabaseError> {
        Ok(Ban {
            id: self.id,
            user_id: self.user_id,
            thread_id: self.thread_id,
            banned_by: self.banned_by,
            reason: self.reason.clone(),
            expires_at: self.expires_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = debate_bans)]
struct NewBanRow<'a> {
    user_id: i64,
    thread_id: Option<i64>,
    banned_by: i64,
    reason: Option<&'a str>,
    expires_at: Option<String>,
    created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = ban_history)]
struct NewBanHistoryRow<'a> {
    user_id: i64,
    thread_id: Option<i64>,
    banned_by: i64,
    reason: Option<&'a str>,
    expires_at: Option<String>,
    created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ban_history)]
struct DbBanHistory {
    id: i64,
    user_id: i64,
    thread_id: Option<i64>,
    banned_by: i64,
    reason: Option<String>,
    expires_at: Option<String>,
    created_at: String,
    removed_at: Option<String>,
    removed_by: Option<i64>,
    removal_reason: Option<String>,
}

impl DbBanHistory {
    fn to_record(&self) -> Result<BanHistoryRecord, DatabaseError> {
        Ok(BanHistoryRecord {
            id: self.id,
            user_id: self.user_id,
            thread_id: self.thread_id,
            banned_by: self.banned_by,
            reason: self.reason.clone(),
            expires_at: self.expires_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            removed_at: self.removed_at.as_deref().map(parse_ts).transpose()?,
            removed_by: self.removed_by,
            removal_reason: self.removal_reason.clone(),
        })
    }
}

pub struct SqliteBanStore {
    db_path: Arc<String>,
}

impl SqliteBanStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::BanStore for SqliteBanStore {
    async fn upsert_ban(&self, ban: &NewBan) -> Result<bool, DatabaseError> {
        let ban = ban.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = now_ts();
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::debate_bans::dsl::*;
                let existing: Option<DbBan> = match ban.thread_id {
                    None => debate_bans
                        .filter(user_id.eq(ban.user_id).and(thread_id.is_null()))
                        .select(DbBan::as_select())
                        .first::<DbBan>(conn)
                        .optional()?,
                    Some(tid) => debate_bans
                        .filter(user_id.eq(ban.user_id).and(thread_id.eq(tid)))
                        .select(DbBan::as_select())
                        .first::<DbBan>(conn)
                        .optional()?,
                };

                // An identical unexpired ban is a duplicate command, not
                // a new moderation action. No mutation, no history row.
                if let Some(row) = &existing {
                    let unexpired = row.expires_at.as_deref().map_or(true, |e| e > now.as_str());
                    let same_expiry =
                        row.expires_at == ban.expires_at.map(format_ts);
                    let same_reason = row.reason.as_deref() == ban.reason.as_deref();
                    if unexpired && same_expiry && same_reason {
                        return Ok(false);
                    }
                }

                match ban.thread_id {
                    None => diesel::delete(
                        debate_bans.filter(user_id.eq(ban.user_id).and(thread_id.is_null())),
                    )
                    .execute(conn)?,
                    Some(tid) => diesel::delete(
                        debate_bans.filter(user_id.eq(ban.user_id).and(thread_id.eq(tid))),
                    )
                    .execute(conn)?,
                };

                let expires = ban.expires_at.map(format_ts);
                diesel::insert_into(debate_bans)
                    .values(&NewBanRow {
                        user_id: ban.user_id,
                        thread_id: ban.thread_id,
                        banned_by: ban.banned_by,
                        reason: ban.reason.as_deref(),
                        expires_at: expires.clone(),
                        created_at: now.clone(),
                    })
                    .execute(conn)?;

                diesel::insert_into(ban_history::table)
                    .values(&NewBanHistoryRow {
                        user_id: ban.user_id,
                        thread_id: ban.thread_id,
                        banned_by: ban.banned_by,
                        reason: ban.reason.as_deref(),
                        expires_at: expires,
                        created_at: now,
                    })
                    .execute(conn)?;

                Ok(true)
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn remove_ban(
        &self,
        user_id_param: i64,
        thread_id_param: Option<i64>,
    ) -> Result<bool, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::debate_bans::dsl::*;
                let deleted = match thread_id_param {
                    // Global removal clears every scope the user is
                    // banned in.
                    None => diesel::delete(debate_bans.filter(user_id.eq(user_id_param)))
                        .execute(conn)?,
                    Some(tid) => diesel::delete(debate_bans.filter(
                        user_id.eq(user_id_param).and(thread_id.eq(tid)),
                    ))
                    .execute(conn)?,
                };
                Ok(deleted > 0)
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn is_banned(
        &self,
        user_id_param: i64,
        thread_id_param: i64,
    ) -> Result<bool, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = now_ts();
            use crate::db::schema::debate_bans::dsl::*;
            let count: i64 = debate_bans
                .filter(
                    user_id
                        .eq(user_id_param)
                        .and(thread_id.is_null().or(thread_id.eq(thread_id_param)))
                        .and(expires_at.is_null().or(expires_at.gt(now))),
                )
                .count()
                .get_result(&mut conn)?;
            Ok(count > 0)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn active_bans(&self, user_id_param: i64) -> Result<Vec<Ban>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = now_ts();
            use crate::db::schema::debate_bans::dsl::*;
            let rows: Vec<DbBan> = debate_bans
                .filter(
                    user_id
                        .eq(user_id_param)
                        .and(expires_at.is_null().or(expires_at.gt(now))),
                )
                .order(id.asc())
                .select(DbBan::as_select())
                .load::<DbBan>(&mut conn)?;
            rows.iter().map(|r| r.to_ban()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn banned_users(&self) -> Result<Vec<i64>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = now_ts();
            use crate::db::schema::debate_bans::dsl::*;
            debate_bans
                .filter(expires_at.is_null().or(expires_at.gt(now)))
                .select(user_id)
                .distinct()
                .load::<i64>(&mut conn)
                .map_err(Into::into)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        removal_reason_param: &str,
    ) -> Result<Vec<Ban>, DatabaseError> {
        let removal_reason_param = removal_reason_param.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now_s = format_ts(now);
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::debate_bans::dsl::*;
                let rows: Vec<DbBan> = debate_bans
                    .filter(expires_at.is_not_null().and(expires_at.le(now_s.clone())))
                    .order(id.asc())
                    .select(DbBan::as_select())
                    .load::<DbBan>(conn)?;

                if rows.is_empty() {
                    return Ok(Vec::new());
                }

                for row in &rows {
                    diesel::delete(debate_bans.filter(id.eq(row.id))).execute(conn)?;
                    // The history row keeps the ban; the annotation
                    // records how it ended.
                    diesel::sql_query(
                        "UPDATE ban_history \
                         SET removed_at = ?, removal_reason = ? \
                         WHERE id = (SELECT id FROM ban_history \
                                     WHERE user_id = ? AND thread_id IS ? \
                                       AND removed_at IS NULL \
                                     ORDER BY id DESC LIMIT 1)",
                    )
                    .bind::<Text, _>(&now_s)
                    .bind::<Text, _>(&removal_reason_param)
                    .bind::<BigInt, _>(row.user_id)
                    .bind::<Nullable<BigInt>, _>(row.thread_id)
                    .execute(conn)?;
                }

                rows.iter().map(|r| r.to_ban()).collect()
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn annotate_removal(
        &self,
        user_id_param: i64,
        thread_id_param: Option<i64>,
        removed_by_param: Option<i64>,
        removal_reason_param: &str,
    ) -> Result<bool, DatabaseError> {
        let removal_reason_param = removal_reason_param.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            // A scoped removal must not touch other threads' active
            // history rows.
            let updated = match thread_id_param {
                Some(tid) => diesel::sql_query(
                    "UPDATE ban_history \
                     SET removed_at = ?, removed_by = ?, removal_reason = ? \
                     WHERE user_id = ? AND thread_id = ? AND removed_at IS NULL",
                )
                .bind::<Text, _>(now_ts())
                .bind::<Nullable<BigInt>, _>(removed_by_param)
                .bind::<Text, _>(&removal_reason_param)
                .bind::<BigInt, _>(user_id_param)
                .bind::<BigInt, _>(tid)
                .execute(&mut conn)?,
                None => diesel::sql_query(
                    "UPDATE ban_history \
                     SET removed_at = ?, removed_by = ?, removal_reason = ? \
                     WHERE user_id = ? AND removed_at IS NULL",
                )
                .bind::<Text, _>(now_ts())
                .bind::<Nullable<BigInt>, _>(removed_by_param)
                .bind::<Text, _>(&removal_reason_param)
                .bind::<BigInt, _>(user_id_param)
                .execute(&mut conn)?,
            };
            Ok(updated > 0)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn ban_history(
        &self,
        user_id_param: i64,
        limit_param: i64,
    ) -> Result<Vec<BanHistoryRecord>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::ban_history::dsl::*;
            let rows: Vec<DbBanHistory> = ban_history
                .filter(user_id.eq(user_id_param))
                .order(id.desc())
                .limit(limit_param)
                .select(DbBanHistory::as_select())
                .load::<DbBanHistory>(&mut conn)?;
            rows.iter().map(|r| r.to_record()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn ban_count(&self, user_id_param: i64) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::ban_history::dsl::*;
            ban_history
                .filter(user_id.eq(user_id_param))
                .count()
                .get_result(&mut conn)
                .map_err(Into::into)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = appeals)]
struct DbAppeal {
    id: i64,
    user_id: i64,
    action_type: String,
    action_id: i64,
    reason: String,
    additional_context: Option<String>,
    status: String,
    reviewed_by: Option<i64>,
    reviewed_at: Option<String>,
    denial_reason: Option<String>,
    case_message_id: Option<i64>,
    created_at: String,
}

impl DbAppeal {
    fn to_appeal(&self) -> Result<Appeal, DatabaseError> {
        Ok(Appeal {
            id: self.id,
            user_id: self.user_id,
            action: ActionKind::from_str(&self.action_type).map_err(DatabaseError::Query)?,
            action_id: self.action_id,
            reason: self.reason.clone(),
            additional_context: self.additional_context.clone(),
            status: AppealStatus::from_str(&self.status).map_err(DatabaseError::Query)?,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at.as_deref().map(parse_ts).transpose()?,
            denial_reason: self.denial_reason.clone(),
            case_message_id: self.case_message_id,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = appeals)]
struct NewAppealRow<'a> {
    user_id: i64,
    action_type: &'a str,
    action_id: i64,
    reason: &'a str,
    additional_context: Option<&'a str>,
    status: &'a str,
    created_at: String,
}

pub struct SqliteAppealStore {
    db_path: Arc<String>,
}

impl SqliteAppealStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::AppealStore for SqliteAppealStore {
    async fn has_pending(
        &self,
        user_id_param: i64,
        action: ActionKind,
        action_id_param: i64,
    ) -> Result<bool, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::appeals::dsl::*;
            let count: i64 = appeals
                .filter(
                    user_id
                        .eq(user_id_param)
                        .and(action_type.eq(action.as_str()))
                        .and(action_id.eq(action_id_param))
                        .and(status.eq(AppealStatus::Pending.as_str())),
                )
                .count()
                .get_result(&mut conn)?;
            Ok(count > 0)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn create(&self, appeal: &NewAppeal) -> Result<Option<i64>, DatabaseError> {
        let appeal = appeal.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::appeals::dsl::*;
                let pending: i64 = appeals
                    .filter(
                        user_id
                            .eq(appeal.user_id)
                            .and(action_type.eq(appeal.action.as_str()))
                            .and(action_id.eq(appeal.action_id))
                            .and(status.eq(AppealStatus::Pending.as_str())),
                    )
                    .count()
                    .get_result(conn)?;
                if pending > 0 {
                    return Ok(None);
                }

                let inserted = diesel::insert_into(appeals)
                    .values(&NewAppealRow {
                        user_id: appeal.user_id,
                        action_type: appeal.action.as_str(),
                        action_id: appeal.action_id,
                        reason: &appeal.reason,
                        additional_context: appeal.additional_context.as_deref(),
                        status: AppealStatus::Pending.as_str(),
                        created_at: now_ts(),
                    })
                    .execute(conn);

                match inserted {
                    Ok(_) => last_insert_rowid(conn).map(Some),
                    // The partial unique index backstops the check
                    // above against a concurrent writer.
                    Err(diesel::result::Error::DatabaseError(
                        diesel::result::DatabaseErrorKind::UniqueViolation,
                        _,
                    )) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get(&self, appeal_id: i64) -> Result<Option<Appeal>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::appeals::dsl::*;
            appeals
                .filter(id.eq(appeal_id))
                .select(DbAppeal::as_select())
                .first::<DbAppeal>(&mut conn)
                .optional()?
                .map(|a| a.to_appeal())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_status(
        &self,
        appeal_id: i64,
        new_status: AppealStatus,
        reviewed_by_param: i64,
        denial_reason_param: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let denial_reason_param = denial_reason_param.map(str::to_string);
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::appeals::dsl::*;
                // Only a pending appeal can transition, so a second
                // reviewer racing on the same appeal loses cleanly.
                let updated = diesel::update(appeals.filter(
                    id.eq(appeal_id).and(status.eq(AppealStatus::Pending.as_str())),
                ))
                .set((
                    status.eq(new_status.as_str()),
                    reviewed_by.eq(Some(reviewed_by_param)),
                    reviewed_at.eq(Some(now_ts())),
                    denial_reason.eq(denial_reason_param.as_deref()),
                ))
                .execute(conn)?;
                Ok(updated > 0)
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_case_message(
        &self,
        appeal_id: i64,
        message_id: i64,
    ) -> Result<bool, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::appeals::dsl::*;
            let updated = diesel::update(appeals.filter(id.eq(appeal_id)))
                .set(case_message_id.eq(Some(message_id)))
                .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn pending(&self, limit_param: i64) -> Result<Vec<Appeal>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::appeals::dsl::*;
            let rows: Vec<DbAppeal> = appeals
                .filter(status.eq(AppealStatus::Pending.as_str()))
                .order(id.asc())
                .limit(limit_param)
                .select(DbAppeal::as_select())
                .load::<DbAppeal>(&mut conn)?;
            rows.iter().map(|a| a.to_appeal()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn for_user(
        &self,
        user_id_param: i64,
        limit_param: i64,
    ) -> Result<Vec<Appeal>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::appeals::dsl::*;
            let rows: Vec<DbAppeal> = appeals
                .filter(user_id.eq(user_id_param))
                .order(id.desc())
                .limit(limit_param)
                .select(DbAppeal::as_select())
                .load::<DbAppeal>(&mut conn)?;
            rows.iter().map(|a| a.to_appeal()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = closure_history)]
struct DbClosure {
    id: i64,
    thread_id: i64,
    thread_name: String,
    closed_by: i64,
    reason: Option<String>,
    created_at: String,
    reopened_at: Option<String>,
    reopened_by: Option<i64>,
}

impl DbClosure {
    fn to_record(&self) -> Result<ClosureRecord, DatabaseError> {
        Ok(ClosureRecord {
            id: self.id,
            thread_id: self.thread_id,
            thread_name: self.thread_name.clone(),
            closed_by: self.closed_by,
            reason: self.reason.clone(),
            created_at: parse_ts(&self.created_at)?,
            reopened_at: self.reopened_at.as_deref().map(parse_ts).transpose()?,
            reopened_by: self.reopened_by,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = closure_history)]
struct NewClosureRow<'a> {
    thread_id: i64,
    thread_name: &'a str,
    closed_by: i64,
    reason: Option<&'a str>,
    created_at: String,
}

pub struct SqliteThreadStore {
    db_path: Arc<String>,
}

impl SqliteThreadStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::ThreadStore for SqliteThreadStore {
    async fn next_debate_number(&self) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            // Read-increment-write under the exclusive write lock, so
            // concurrent callers each get a distinct number.
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::debate_counter::dsl::*;
                diesel::sql_query(
                    "INSERT OR IGNORE INTO debate_counter (id, counter) VALUES (1, 0)",
                )
                .execute(conn)?;
                diesel::update(debate_counter.filter(id.eq(1)))
                    .set(counter.eq(counter + 1))
                    .execute(conn)?;
                debate_counter
                    .filter(id.eq(1))
                    .select(counter)
                    .first::<i64>(conn)
                    .map_err(Into::into)
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn counter(&self) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::debate_counter::dsl::*;
            Ok(debate_counter
                .filter(id.eq(1))
                .select(counter)
                .first::<i64>(&mut conn)
                .optional()?
                .unwrap_or(0))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_counter(&self, value: i64) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                diesel::sql_query(
                    "INSERT INTO debate_counter (id, counter) VALUES (1, ?) \
                     ON CONFLICT(id) DO UPDATE SET counter = ?",
                )
                .bind::<BigInt, _>(value)
                .bind::<BigInt, _>(value)
                .execute(conn)?;
                Ok(())
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn record_thread(&self, thread_id_param: i64) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query(
                "INSERT OR IGNORE INTO debate_threads (thread_id, created_at) VALUES (?, ?)",
            )
            .bind::<BigInt, _>(thread_id_param)
            .bind::<Text, _>(now_ts())
            .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_analytics_message(
        &self,
        thread_id_param: i64,
        message_id_param: i64,
    ) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query(
                "INSERT INTO debate_threads (thread_id, analytics_message_id, created_at) \
                 VALUES (?, ?, ?) \
                 ON CONFLICT(thread_id) DO UPDATE SET analytics_message_id = ?",
            )
            .bind::<BigInt, _>(thread_id_param)
            .bind::<Nullable<BigInt>, _>(Some(message_id_param))
            .bind::<Text, _>(now_ts())
            .bind::<Nullable<BigInt>, _>(Some(message_id_param))
            .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn analytics_message(
        &self,
        thread_id_param: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::debate_threads::dsl::*;
            Ok(debate_threads
                .filter(thread_id.eq(thread_id_param))
                .select(analytics_message_id)
                .first::<Option<i64>>(&mut conn)
                .optional()?
                .flatten())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn clear_analytics_message(&self, thread_id_param: i64) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::debate_threads::dsl::*;
            diesel::update(debate_threads.filter(thread_id.eq(thread_id_param)))
                .set(analytics_message_id.eq(None::<i64>))
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn increment_participation(
        &self,
        thread_id_param: i64,
        user_id_param: i64,
    ) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query(
                "INSERT INTO debate_participation (thread_id, user_id, message_count, created_at) \
                 VALUES (?, ?, 1, ?) \
                 ON CONFLICT(thread_id, user_id) DO UPDATE SET \
                 message_count = message_count + 1",
            )
            .bind::<BigInt, _>(thread_id_param)
            .bind::<BigInt, _>(user_id_param)
            .bind::<Text, _>(now_ts())
            .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn participation_count(
        &self,
        thread_id_param: i64,
        user_id_param: i64,
    ) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::debate_participation::dsl::*;
            let count: Option<i64> = debate_participation
                .filter(thread_id.eq(thread_id_param).and(user_id.eq(user_id_param)))
                .select(message_count)
                .first(&mut conn)
                .optional()?;
            Ok(count.unwrap_or(0))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_thread_data(&self, thread_id_param: i64) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                use crate::db::schema::debate_threads::dsl as t;
                diesel::delete(t::debate_threads.filter(t::thread_id.eq(thread_id_param)))
                    .execute(conn)?;
                use crate::db::schema::debate_participation::dsl as p;
                diesel::delete(p::debate_participation.filter(p::thread_id.eq(thread_id_param)))
                    .execute(conn)?;
                use crate::db::schema::debate_bans::dsl as b;
                diesel::delete(b::debate_bans.filter(b::thread_id.eq(thread_id_param)))
                    .execute(conn)?;
                // Closure history stays. It is the immutable record and
                // the only source for title recovery on reopen.
                Ok(())
            })
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn add_closure(
        &self,
        thread_id_param: i64,
        thread_name_param: &str,
        closed_by_param: i64,
        reason_param: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let thread_name_param = thread_name_param.to_string();
        let reason_param = reason_param.map(str::to_string);
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::insert_into(closure_history::table)
                .values(&NewClosureRow {
                    thread_id: thread_id_param,
                    thread_name: &thread_name_param,
                    closed_by: closed_by_param,
                    reason: reason_param.as_deref(),
                    created_at: now_ts(),
                })
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn closure_for_thread(
        &self,
        thread_id_param: i64,
    ) -> Result<Option<ClosureRecord>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::closure_history::dsl::*;
            closure_history
                .filter(thread_id.eq(thread_id_param))
                .order(id.desc())
                .select(DbClosure::as_select())
                .first::<DbClosure>(&mut conn)
                .optional()?
                .map(|c| c.to_record())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn mark_reopened(
        &self,
        thread_id_param: i64,
        reopened_by_param: i64,
    ) -> Result<bool, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let updated = diesel::sql_query(
                "UPDATE closure_history \
                 SET reopened_at = ?, reopened_by = ? \
                 WHERE id = (SELECT id FROM closure_history \
                             WHERE thread_id = ? AND reopened_at IS NULL \
                             ORDER BY id DESC LIMIT 1)",
            )
            .bind::<Text, _>(now_ts())
            .bind::<BigInt, _>(reopened_by_param)
            .bind::<BigInt, _>(thread_id_param)
            .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = case_logs)]
struct DbCaseLog {
    user_id: i64,
    case_id: i64,
    thread_id: i64,
    last_unban_at: Option<String>,
    created_at: String,
}

impl DbCaseLog {
    fn to_case_log(&self) -> Result<CaseLog, DatabaseError> {
        Ok(CaseLog {
            user_id: self.user_id,
            case_id: self.case_id,
            thread_id: self.thread_id,
            last_unban_at: self.last_unban_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct SqliteCaseLogStore {
    db_path: Arc<String>,
}

impl SqliteCaseLogStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::CaseLogStore for SqliteCaseLogStore {
    async fn get(&self, user_id_param: i64) -> Result<Option<CaseLog>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::case_logs::dsl::*;
            case_logs
                .filter(user_id.eq(user_id_param))
                .select(DbCaseLog::as_select())
                .first::<DbCaseLog>(&mut conn)
                .optional()?
                .map(|c| c.to_case_log())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn create(
        &self,
        user_id_param: i64,
        case_id_param: i64,
        thread_id_param: i64,
    ) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query(
                "INSERT INTO case_logs (user_id, case_id, thread_id, created_at) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(user_id) DO UPDATE SET thread_id = ?",
            )
            .bind::<BigInt, _>(user_id_param)
            .bind::<BigInt, _>(case_id_param)
            .bind::<BigInt, _>(thread_id_param)
            .bind::<Text, _>(now_ts())
            .bind::<BigInt, _>(thread_id_param)
            .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn next_case_id(&self) -> Result<i64, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query("SELECT COALESCE(MAX(case_id), 0) + 1 AS id FROM case_logs")
                .get_result::<RowId>(&mut conn)
                .map(|r| r.id)
                .map_err(Into::into)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn touch_unban(&self, user_id_param: i64) -> Result<(), DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::case_logs::dsl::*;
            diesel::update(case_logs.filter(user_id.eq(user_id_param)))
                .set(last_unban_at.eq(Some(now_ts())))
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = scheduler_state)]
struct DbSchedulerState {
    name: String,
    is_running: bool,
    updated_at: String,
}

pub struct SqliteSchedulerStateStore {
    db_path: Arc<String>,
}

impl SqliteSchedulerStateStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::SchedulerStateStore for SqliteSchedulerStateStore {
    async fn get(&self, name_param: &str) -> Result<Option<SchedulerState>, DatabaseError> {
        let name_param = name_param.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::scheduler_state::dsl::*;
            let row: Option<DbSchedulerState> = scheduler_state
                .filter(name.eq(&name_param))
                .select(DbSchedulerState::as_select())
                .first::<DbSchedulerState>(&mut conn)
                .optional()?;
            row.map(|r| {
                Ok(SchedulerState {
                    name: r.name,
                    is_running: r.is_running,
                    updated_at: parse_ts(&r.updated_at)?,
                })
            })
            .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set(&self, name_param: &str, is_running_param: bool) -> Result<(), DatabaseError> {
        let name_param = name_param.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query(
                "INSERT INTO scheduler_state (name, is_running, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(name) DO UPDATE SET is_running = ?, updated_at = ?",
            )
            .bind::<Text, _>(&name_param)
            .bind::<diesel::sql_types::Bool, _>(is_running_param)
            .bind::<Text, _>(now_ts())
            .bind::<diesel::sql_types::Bool, _>(is_running_param)
            .bind::<Text, _>(now_ts())
            .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
