use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::db::{
    Ban, BanHistoryRecord, BanStore, CaseLogStore, DatabaseError, NewBan,
};
use crate::platform::Notifier;

/// Reason string written into ban history by the expiry sweep.
const EXPIRY_REASON: &str = "expired";

pub struct BanService {
    bans: Arc<dyn BanStore>,
    cases: Arc<dyn CaseLogStore>,
    notifier: Arc<dyn Notifier>,
}

impl BanService {
    pub fn new(
        bans: Arc<dyn BanStore>,
        cases: Arc<dyn CaseLogStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            bans,
            cases,
            notifier,
        }
    }

    /// Returns `false` when an identical active ban already exists.
    pub async fn add_ban(&self, ban: &NewBan) -> Result<bool, DatabaseError> {
        let applied = self.bans.upsert_ban(ban).await?;
        if applied {
            info!(
                user_id = ban.user_id,
                thread_id = ?ban.thread_id,
                banned_by = ban.banned_by,
                expires_at = ?ban.expires_at,
                "ban recorded"
            );
        }
        Ok(applied)
    }

    /// Lifts a ban and annotates the history record. Global scope
    /// (`thread_id = None`) clears every ban the user holds.
    pub async fn remove_ban(
        &self,
        user_id: i64,
        thread_id: Option<i64>,
        removed_by: Option<i64>,
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        let removed = self.bans.remove_ban(user_id, thread_id).await?;
        if removed {
            self.bans
                .annotate_removal(user_id, thread_id, removed_by, reason)
                .await?;
            self.cases.touch_unban(user_id).await?;
            info!(user_id, thread_id = ?thread_id, reason, "ban lifted");
        }
        Ok(removed)
    }

    pub async fn is_banned(&self, user_id: i64, thread_id: i64) -> Result<bool, DatabaseError> {
        self.bans.is_banned(user_id, thread_id).await
    }

    pub async fn active_bans(&self, user_id: i64) -> Result<Vec<Ban>, DatabaseError> {
        self.bans.active_bans(user_id).await
    }

    pub async fn banned_users(&self) -> Result<Vec<i64>, DatabaseError> {
        self.bans.banned_users().await
    }

    pub async fn ban_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<BanHistoryRecord>, DatabaseError> {
        self.bans.ban_history(user_id, limit).await
    }

    /// Lifetime count, always derived from history.
    pub async fn ban_count(&self, user_id: i64) -> Result<i64, DatabaseError> {
        self.bans.ban_count(user_id).await
    }

    /// Deletes bans past their deadline, annotates their history
    /// records, touches the case log, and notifies each user with the
    /// original ban context. Runs every minute from the scheduler.
    pub async fn sweep_expired(&self) -> Result<usize, DatabaseError> {
        let swept = self.bans.sweep_expired(Utc::now(), EXPIRY_REASON).await?;
        for ban in &swept {
            self.cases.touch_unban(ban.user_id).await?;

            let history = self.bans.ban_history(ban.user_id, 10).await?;
            let context = history.iter().find(|h| {
                h.thread_id == ban.thread_id
                    && h.removal_reason.as_deref() == Some(EXPIRY_REASON)
            });
            if let Err(e) = self.notifier.ban_expired(ban, context).await {
                warn!(user_id = ban.user_id, error = %e, "ban expiry notification failed");
            }
            info!(user_id = ban.user_id, thread_id = ?ban.thread_id, "ban expired and removed");
        }
        Ok(swept.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use tempfile::NamedTempFile;

    use super::BanService;
    use crate::config::DatabaseConfig;
    use crate::db::{DatabaseManager, NewBan};
    use crate::platform::mock::MockNotifier;

    async fn test_service() -> (BanService, MockNotifier, DatabaseManager, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            path: file.path().to_string_lossy().to_string(),
        };
        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");

        let notifier = MockNotifier::new();
        let service = BanService::new(
            manager.ban_store(),
            manager.case_log_store(),
            Arc::new(notifier.clone()),
        );
        (service, notifier, manager, file)
    }

    #[tokio::test]
    async fn expiry_sweep_removes_ban_and_annotates_history() {
        let (service, notifier, manager, _file) = test_service().await;

        manager.case_log_store().create(7, 1, 900).await.expect("case log");
        service
            .add_ban(&NewBan {
                user_id: 7,
                thread_id: None,
                banned_by: 50,
                reason: Some("spam".to_string()),
                expires_at: Some(Utc::now() - Duration::minutes(1)),
            })
            .await
            .expect("ban");

        let swept = service.sweep_expired().await.expect("sweep");
        assert_eq!(swept, 1);
        assert!(!service.is_banned(7, 500).await.expect("check"));

        let history = service.ban_history(7, 10).await.expect("history");
        assert_eq!(history[0].removal_reason.as_deref(), Some("expired"));
        assert!(history[0].removed_at.is_some());
        assert!(history[0].removed_by.is_none());

        // The user is told, with the original context.
        let notices = notifier.expired_bans();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].user_id, 7);
        assert_eq!(notices[0].reason.as_deref(), Some("spam"));

        // The case log remembers the unban.
        let log = manager.case_log_store().get(7).await.expect("get").expect("exists");
        assert!(log.last_unban_at.is_some());

        // Nothing left for a second pass.
        assert_eq!(service.sweep_expired().await.expect("sweep"), 0);
    }

    #[tokio::test]
    async fn manual_removal_annotates_history_with_moderator() {
        let (service, _notifier, _manager, _file) = test_service().await;

        service
            .add_ban(&NewBan {
                user_id: 7,
                thread_id: Some(500),
                banned_by: 50,
                reason: None,
                expires_at: None,
            })
            .await
            .expect("ban");

        let removed = service
            .remove_ban(7, Some(500), Some(51), "appeal approved")
            .await
            .expect("remove");
        assert!(removed);
        assert!(!service.is_banned(7, 500).await.expect("check"));

        let history = service.ban_history(7, 10).await.expect("history");
        assert_eq!(history[0].removed_by, Some(51));
        assert_eq!(history[0].removal_reason.as_deref(), Some("appeal approved"));

        // Removing again reports nothing to do.
        assert!(!service
            .remove_ban(7, Some(500), Some(51), "appeal approved")
            .await
            .expect("remove again"));
    }

    #[tokio::test]
    async fn scoped_removal_leaves_other_threads_history_untouched() {
        let (service, _notifier, _manager, _file) = test_service().await;

        for thread in [500, 501] {
            service
                .add_ban(&NewBan {
                    user_id: 7,
                    thread_id: Some(thread),
                    banned_by: 50,
                    reason: None,
                    expires_at: None,
                })
                .await
                .expect("ban");
        }

        assert!(service
            .remove_ban(7, Some(500), Some(51), "appeal approved")
            .await
            .expect("remove"));

        // The other thread's ban is still active, and its history
        // record still reads as open.
        assert!(!service.is_banned(7, 500).await.expect("check"));
        assert!(service.is_banned(7, 501).await.expect("check"));

        let history = service.ban_history(7, 10).await.expect("history");
        let for_thread = |tid: i64| {
            history
                .iter()
                .find(|h| h.thread_id == Some(tid))
                .expect("record")
        };
        assert!(for_thread(500).removed_at.is_some());
        assert_eq!(for_thread(500).removed_by, Some(51));
        assert!(for_thread(501).removed_at.is_none());
    }

    #[tokio::test]
    async fn expiry_notices_carry_their_own_threads_context() {
        let (service, notifier, _manager, _file) = test_service().await;

        let past = Utc::now() - Duration::minutes(1);
        for (thread, reason) in [(500, "spam"), (501, "trolling")] {
            service
                .add_ban(&NewBan {
                    user_id: 7,
                    thread_id: Some(thread),
                    banned_by: 50,
                    reason: Some(reason.to_string()),
                    expires_at: Some(past),
                })
                .await
                .expect("ban");
        }

        assert_eq!(service.sweep_expired().await.expect("sweep"), 2);

        let notices = notifier.expired_contexts();
        assert_eq!(notices.len(), 2);
        for (ban, context) in notices {
            let context = context.expect("context");
            assert_eq!(context.thread_id, ban.thread_id);
            assert_eq!(context.reason, ban.reason);
        }
    }

    #[tokio::test]
    async fn lifetime_count_survives_removal() {
        let (service, _notifier, _manager, _file) = test_service().await;

        for _ in 0..2 {
            service
                .add_ban(&NewBan {
                    user_id: 7,
                    thread_id: Some(500),
                    banned_by: 50,
                    reason: None,
                    expires_at: Some(Utc::now() + Duration::hours(1)),
                })
                .await
                .expect("ban");
            service
                .remove_ban(7, Some(500), Some(50), "second chance")
                .await
                .expect("remove");
        }

        assert_eq!(service.ban_count(7).await.expect("count"), 2);
        assert!(service.active_bans(7).await.expect("active").is_empty());
    }
}
