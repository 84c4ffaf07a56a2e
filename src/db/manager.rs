use std::sync::Arc;

use diesel::sqlite::SqliteConnection;
use diesel::{Connection, RunQueryDsl};

use crate::config::DatabaseConfig;
use crate::db::sqlite::{
    SqliteAppealStore, SqliteBanStore, SqliteCaseLogStore, SqliteKarmaStore,
    SqliteSchedulerStateStore, SqliteThreadStore,
};
use crate::db::{
    AppealStore, BanStore, CaseLogStore, DatabaseError, KarmaStore, SchedulerStateStore,
    ThreadStore,
};

const SCHEMA_VERSION: i64 = 1;

#[derive(Clone)]
pub struct DatabaseManager {
    db_path: String,
    karma_store: Arc<dyn KarmaStore>,
    ban_store: Arc<dyn BanStore>,
    appeal_store: Arc<dyn AppealStore>,
    thread_store: Arc<dyn ThreadStore>,
    case_log_store: Arc<dyn CaseLogStore>,
    scheduler_state_store: Arc<dyn SchedulerStateStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config.path.clone();
        let path_arc = Arc::new(path.clone());

        Ok(Self {
            db_path: path,
            karma_store: Arc::new(SqliteKarmaStore::new(path_arc.clone())),
            ban_store: Arc::new(SqliteBanStore::new(path_arc.clone())),
            appeal_store: Arc::new(SqliteAppealStore::new(path_arc.clone())),
            thread_store: Arc::new(SqliteThreadStore::new(path_arc.clone())),
            case_log_store: Arc::new(SqliteCaseLogStore::new(path_arc.clone())),
            scheduler_state_store: Arc::new(SqliteSchedulerStateStore::new(path_arc)),
        })
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id INTEGER PRIMARY KEY,
                    total_karma INTEGER NOT NULL DEFAULT 0,
                    upvotes_received INTEGER NOT NULL DEFAULT 0,
                    downvotes_received INTEGER NOT NULL DEFAULT 0
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS votes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    voter_id INTEGER NOT NULL,
                    message_id INTEGER NOT NULL,
                    author_id INTEGER NOT NULL,
                    vote_type INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(voter_id, message_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS debate_bans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    thread_id INTEGER,
                    banned_by INTEGER NOT NULL,
                    reason TEXT,
                    expires_at TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE(user_id, thread_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS ban_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    thread_id INTEGER,
                    banned_by INTEGER NOT NULL,
                    reason TEXT,
                    expires_at TEXT,
                    created_at TEXT NOT NULL,
                    removed_at TEXT,
                    removed_by INTEGER,
                    removal_reason TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS closure_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    thread_id INTEGER NOT NULL,
                    thread_name TEXT NOT NULL,
                    closed_by INTEGER NOT NULL,
                    reason TEXT,
                    created_at TEXT NOT NULL,
                    reopened_at TEXT,
                    reopened_by INTEGER
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS appeals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    action_type TEXT NOT NULL,
                    action_id INTEGER NOT NULL,
                    reason TEXT NOT NULL,
                    additional_context TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    reviewed_by INTEGER,
                    reviewed_at TEXT,
                    denial_reason TEXT,
                    case_message_id INTEGER,
                    created_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS debate_counter (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    counter INTEGER NOT NULL DEFAULT 0
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS debate_threads (
                    thread_id INTEGER PRIMARY KEY,
                    analytics_message_id INTEGER,
                    created_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS debate_participation (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    thread_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    message_count INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    UNIQUE(thread_id, user_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS case_logs (
                    user_id INTEGER PRIMARY KEY,
                    case_id INTEGER NOT NULL,
                    thread_id INTEGER NOT NULL,
                    last_unban_at TEXT,
                    created_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS scheduler_state (
                    name TEXT PRIMARY KEY,
                    is_running INTEGER NOT NULL DEFAULT 1,
                    updated_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS schema_version (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    version INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                // One pending appeal per (user, action, target), enforced
                // even against concurrent writers.
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_appeals_pending \
                 ON appeals(user_id, action_type, action_id) WHERE status = 'pending'",
                "CREATE INDEX IF NOT EXISTS idx_votes_message ON votes(message_id)",
                "CREATE INDEX IF NOT EXISTS idx_votes_author ON votes(author_id)",
                "CREATE INDEX IF NOT EXISTS idx_votes_created ON votes(created_at)",
                "CREATE INDEX IF NOT EXISTS idx_bans_user ON debate_bans(user_id)",
                "CREATE INDEX IF NOT EXISTS idx_bans_expires ON debate_bans(expires_at)",
                "CREATE INDEX IF NOT EXISTS idx_ban_history_user ON ban_history(user_id)",
                "CREATE INDEX IF NOT EXISTS idx_closures_thread ON closure_history(thread_id)",
                "CREATE INDEX IF NOT EXISTS idx_appeals_status ON appeals(status)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            diesel::sql_query(
                "INSERT OR IGNORE INTO schema_version (id, version, updated_at) \
                 VALUES (1, ?, datetime('now'))",
            )
            .bind::<diesel::sql_types::BigInt, _>(SCHEMA_VERSION)
            .execute(&mut conn)
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn karma_store(&self) -> Arc<dyn KarmaStore> {
        self.karma_store.clone()
    }

    pub fn ban_store(&self) -> Arc<dyn BanStore> {
        self.ban_store.clone()
    }

    pub fn appeal_store(&self) -> Arc<dyn AppealStore> {
        self.appeal_store.clone()
    }

    pub fn thread_store(&self) -> Arc<dyn ThreadStore> {
        self.thread_store.clone()
    }

    pub fn case_log_store(&self) -> Arc<dyn CaseLogStore> {
        self.case_log_store.clone()
    }

    pub fn scheduler_state_store(&self) -> Arc<dyn SchedulerStateStore> {
        self.scheduler_state_store.clone()
    }
}
