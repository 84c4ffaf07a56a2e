use std::sync::Arc;

use tracing::{info, warn};

use crate::bans::BanService;
use crate::db::{
    ActionKind, Appeal, AppealStatus, AppealStore, DatabaseError, NewAppeal, ThreadStore,
};
use crate::numbering::NumberingAuthority;
use crate::platform::{ChatPlatform, Notifier, ThreadEdit};

/// History annotation written when an approved appeal lifts a ban.
const APPEAL_REASON: &str = "appeal approved";

/// Uniform result of a reversal handler. `reversed: false` with an
/// approved appeal is the flagged optimistic-approval state: the
/// decision stands, the underlying action still needs manual followup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalOutcome {
    pub reversed: bool,
    pub detail: Option<String>,
}

impl ReversalOutcome {
    fn done() -> Self {
        Self {
            reversed: true,
            detail: None,
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            reversed: false,
            detail: Some(detail.into()),
        }
    }
}

pub struct AppealService {
    appeals: Arc<dyn AppealStore>,
    threads: Arc<dyn ThreadStore>,
    bans: Arc<BanService>,
    numbering: Arc<NumberingAuthority>,
    platform: Arc<dyn ChatPlatform>,
    notifier: Arc<dyn Notifier>,
    forum_id: i64,
}

impl AppealService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        appeals: Arc<dyn AppealStore>,
        threads: Arc<dyn ThreadStore>,
        bans: Arc<BanService>,
        numbering: Arc<NumberingAuthority>,
        platform: Arc<dyn ChatPlatform>,
        notifier: Arc<dyn Notifier>,
        forum_id: i64,
    ) -> Self {
        Self {
            appeals,
            threads,
            bans,
            numbering,
            platform,
            notifier,
            forum_id,
        }
    }

    /// Files an appeal. Returns `None` when the user already has a
    /// pending appeal for the same action, checked in the store and
    /// backstopped by the partial unique index.
    pub async fn submit(&self, appeal: &NewAppeal) -> Result<Option<i64>, DatabaseError> {
        let id = self.appeals.create(appeal).await?;
        match id {
            Some(id) => {
                info!(
                    appeal_id = id,
                    user_id = appeal.user_id,
                    action = %appeal.action,
                    action_id = appeal.action_id,
                    "appeal submitted"
                );
            }
            None => {
                info!(
                    user_id = appeal.user_id,
                    action = %appeal.action,
                    action_id = appeal.action_id,
                    "duplicate pending appeal rejected"
                );
            }
        }
        Ok(id)
    }

    /// Records the case announcement message so terminal decisions can
    /// edit it in place.
    pub async fn attach_case_message(
        &self,
        appeal_id: i64,
        message_id: i64,
    ) -> Result<bool, DatabaseError> {
        self.appeals.set_case_message(appeal_id, message_id).await
    }

    /// Approves a pending appeal and runs the reversal handler for its
    /// action kind. The approval is terminal even when the reversal
    /// fails; the failure is logged and reported in the outcome.
    /// Returns `None` when the appeal is missing or already decided.
    pub async fn approve(
        &self,
        appeal_id: i64,
        reviewer: i64,
    ) -> Result<Option<ReversalOutcome>, DatabaseError> {
        let transitioned = self
            .appeals
            .set_status(appeal_id, AppealStatus::Approved, reviewer, None)
            .await?;
        if !transitioned {
            return Ok(None);
        }

        let appeal = self
            .appeals
            .get(appeal_id)
            .await?
            .ok_or_else(|| DatabaseError::Query(format!("appeal {appeal_id} vanished")))?;

        let outcome = match appeal.action {
            ActionKind::Disallow => self.undo_disallow(&appeal, reviewer).await,
            ActionKind::Close => self.undo_close(&appeal, reviewer).await,
        };
        if !outcome.reversed {
            warn!(
                appeal_id,
                action = %appeal.action,
                detail = ?outcome.detail,
                "appeal approved but reversal did not complete"
            );
        }

        self.deliver_decision(&appeal).await;
        info!(appeal_id, reviewer, reversed = outcome.reversed, "appeal approved");
        Ok(Some(outcome))
    }

    /// Denies a pending appeal. Returns `false` when it is missing or
    /// already decided.
    pub async fn deny(
        &self,
        appeal_id: i64,
        reviewer: i64,
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        let transitioned = self
            .appeals
            .set_status(appeal_id, AppealStatus::Denied, reviewer, Some(reason))
            .await?;
        if !transitioned {
            return Ok(false);
        }

        if let Some(appeal) = self.appeals.get(appeal_id).await? {
            self.deliver_decision(&appeal).await;
        }
        info!(appeal_id, reviewer, "appeal denied");
        Ok(true)
    }

    pub async fn pending_appeals(&self, limit: i64) -> Result<Vec<Appeal>, DatabaseError> {
        self.appeals.pending(limit).await
    }

    pub async fn get_appeal(&self, appeal_id: i64) -> Result<Option<Appeal>, DatabaseError> {
        self.appeals.get(appeal_id).await
    }

    pub async fn user_appeals(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Appeal>, DatabaseError> {
        self.appeals.for_user(user_id, limit).await
    }

    /// Notify the user and refresh the stored case announcement.
    /// Failures here never affect the decision.
    async fn deliver_decision(&self, appeal: &Appeal) {
        if let Err(e) = self.notifier.appeal_decided(appeal).await {
            warn!(appeal_id = appeal.id, error = %e, "appeal decision notification failed");
        }
        if let Some(message_id) = appeal.case_message_id {
            if let Err(e) = self.notifier.edit_case_announcement(message_id, appeal).await {
                warn!(appeal_id = appeal.id, error = %e, "case announcement edit failed");
            }
        }
    }

    /// Lifts every ban the user holds and marks the history.
    async fn undo_disallow(&self, appeal: &Appeal, reviewer: i64) -> ReversalOutcome {
        match self
            .bans
            .remove_ban(appeal.user_id, None, Some(reviewer), APPEAL_REASON)
            .await
        {
            Ok(true) => ReversalOutcome::done(),
            Ok(false) => ReversalOutcome::failed("no active ban to lift"),
            Err(e) => ReversalOutcome::failed(format!("ban removal failed: {e}")),
        }
    }

    /// Reopens a closed thread: restores the numbered title recorded
    /// at closure (falling back to a fresh number), unarchives and
    /// unlocks it, and annotates the closure record.
    async fn undo_close(&self, appeal: &Appeal, reviewer: i64) -> ReversalOutcome {
        let thread_id = appeal.action_id;

        let thread = match self.platform.thread(thread_id).await {
            Ok(Some(thread)) => thread,
            Ok(None) => return ReversalOutcome::failed("thread no longer exists"),
            Err(e) => return ReversalOutcome::failed(format!("thread lookup failed: {e}")),
        };
        if thread.parent_id != self.forum_id {
            return ReversalOutcome::failed("thread is not in the debate forum");
        }

        let closure = match self.threads.closure_for_thread(thread_id).await {
            Ok(closure) => closure,
            Err(e) => return ReversalOutcome::failed(format!("closure lookup failed: {e}")),
        };

        let restored_name = match closure
            .as_ref()
            .and_then(|c| NumberingAuthority::parse_numbered_title(&c.thread_name))
        {
            Some((number, title)) => self.numbering.format_title(number, title),
            // No usable record of the old number. Assign the next one.
            None => match self.numbering.next_number().await {
                Ok(number) => self.numbering.format_title(number, &thread.name),
                Err(e) => return ReversalOutcome::failed(format!("numbering failed: {e}")),
            },
        };

        let edit = ThreadEdit {
            name: Some(restored_name),
            archived: Some(false),
            locked: Some(false),
        };
        if let Err(e) = self.platform.edit_thread(thread_id, &edit).await {
            return ReversalOutcome::failed(format!("thread edit failed: {e}"));
        }

        if let Err(e) = self.threads.mark_reopened(thread_id, reviewer).await {
            warn!(thread_id, error = %e, "failed to annotate closure record after reopen");
        }

        ReversalOutcome::done()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::{AppealService, ReversalOutcome};
    use crate::bans::BanService;
    use crate::config::{Config, DatabaseConfig};
    use crate::db::{ActionKind, AppealStatus, DatabaseManager, NewAppeal, NewBan};
    use crate::numbering::NumberingAuthority;
    use crate::platform::mock::{MockNotifier, MockPlatform, MOCK_FORUM_ID};

    struct Fixture {
        service: AppealService,
        bans: Arc<BanService>,
        platform: MockPlatform,
        notifier: MockNotifier,
        manager: DatabaseManager,
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
        let service = AppealService::new(
            manager.appeal_store(),
            manager.thread_store(),
            bans.clone(),
            numbering,
            Arc::new(platform.clone()),
            Arc::new(notifier.clone()),
            MOCK_FORUM_ID,
        );

        Fixture {
            service,
            bans,
            platform,
            notifier,
            manager,
            _file: file,
        }
    }

    fn ban_appeal(user_id: i64) -> NewAppeal {
        NewAppeal {
            user_id,
            action: ActionKind::Disallow,
            action_id: 1,
            reason: "it was satire".to_string(),
            additional_context: None,
        }
    }

    #[tokio::test]
    async fn approving_a_ban_appeal_lifts_the_ban() {
        let fx = fixture().await;

        fx.bans
            .add_ban(&NewBan {
                user_id: 7,
                thread_id: None,
                banned_by: 50,
                reason: Some("spam".to_string()),
                expires_at: None,
            })
            .await
            .expect("ban");

        let appeal_id = fx
            .service
            .submit(&ban_appeal(7))
            .await
            .expect("submit")
            .expect("id");

        let outcome = fx
            .service
            .approve(appeal_id, 51)
            .await
            .expect("approve")
            .expect("was pending");
        assert_eq!(outcome, ReversalOutcome::done());

        assert!(!fx.bans.is_banned(7, 500).await.expect("check"));
        let history = fx.bans.ban_history(7, 10).await.expect("history");
        assert_eq!(history[0].removal_reason.as_deref(), Some("appeal approved"));
        assert_eq!(history[0].removed_by, Some(51));

        let stored = fx.service.get_appeal(appeal_id).await.expect("get").expect("exists");
        assert_eq!(stored.status, AppealStatus::Approved);
        assert_eq!(fx.notifier.appeal_decisions().len(), 1);
    }

    #[tokio::test]
    async fn approving_a_closure_appeal_reopens_the_thread() {
        let fx = fixture().await;

        fx.platform.add_thread(500, "5 | Tabs vs Spaces", true);
        fx.platform.set_locked(500, true);
        fx.manager
            .thread_store()
            .add_closure(500, "5 | Tabs vs Spaces", 50, Some("off topic"))
            .await
            .expect("closure");

        let appeal_id = fx
            .service
            .submit(&NewAppeal {
                user_id: 7,
                action: ActionKind::Close,
                action_id: 500,
                reason: "please reopen".to_string(),
                additional_context: None,
            })
            .await
            .expect("submit")
            .expect("id");

        let outcome = fx
            .service
            .approve(appeal_id, 51)
            .await
            .expect("approve")
            .expect("was pending");
        assert!(outcome.reversed);

        assert_eq!(fx.platform.thread_state(500), Some((false, false)));
        assert_eq!(fx.platform.thread_name(500).as_deref(), Some("5 | Tabs vs Spaces"));

        let closure = fx
            .manager
            .thread_store()
            .closure_for_thread(500)
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(closure.reopened_by, Some(51));
        assert!(closure.reopened_at.is_some());
    }

    #[tokio::test]
    async fn approval_stands_when_the_reversal_fails() {
        let fx = fixture().await;

        // The thread is gone, so the reversal cannot succeed.
        let appeal_id = fx
            .service
            .submit(&NewAppeal {
                user_id: 7,
                action: ActionKind::Close,
                action_id: 404,
                reason: "reopen".to_string(),
                additional_context: None,
            })
            .await
            .expect("submit")
            .expect("id");

        let outcome = fx
            .service
            .approve(appeal_id, 51)
            .await
            .expect("approve")
            .expect("was pending");
        assert!(!outcome.reversed);
        assert!(outcome.detail.is_some());

        let stored = fx.service.get_appeal(appeal_id).await.expect("get").expect("exists");
        assert_eq!(stored.status, AppealStatus::Approved);
    }

    #[tokio::test]
    async fn closure_reversal_requires_the_debate_forum() {
        let fx = fixture().await;

        fx.platform.add_thread_in(600, 999, "somewhere else", false);
        let appeal_id = fx
            .service
            .submit(&NewAppeal {
                user_id: 7,
                action: ActionKind::Close,
                action_id: 600,
                reason: "reopen".to_string(),
                additional_context: None,
            })
            .await
            .expect("submit")
            .expect("id");

        let outcome = fx
            .service
            .approve(appeal_id, 51)
            .await
            .expect("approve")
            .expect("was pending");
        assert!(!outcome.reversed);
    }

    #[tokio::test]
    async fn deny_records_the_reason_and_notifies() {
        let fx = fixture().await;

        let appeal_id = fx
            .service
            .submit(&ban_appeal(7))
            .await
            .expect("submit")
            .expect("id");
        fx.service
            .attach_case_message(appeal_id, 8_000)
            .await
            .expect("attach");

        assert!(fx.service.deny(appeal_id, 51, "no grounds").await.expect("deny"));

        let stored = fx.service.get_appeal(appeal_id).await.expect("get").expect("exists");
        assert_eq!(stored.status, AppealStatus::Denied);
        assert_eq!(stored.denial_reason.as_deref(), Some("no grounds"));

        assert_eq!(fx.notifier.appeal_decisions().len(), 1);
        // The stored case announcement is edited in place.
        let edits = fx.notifier.case_edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, 8_000);

        // A decided appeal cannot be decided again.
        assert!(!fx.service.deny(appeal_id, 52, "again").await.expect("re-deny"));
        assert!(fx.service.approve(appeal_id, 52).await.expect("approve").is_none());
    }

    #[tokio::test]
    async fn duplicate_pending_submission_is_rejected() {
        let fx = fixture().await;

        assert!(fx.service.submit(&ban_appeal(7)).await.expect("submit").is_some());
        assert!(fx.service.submit(&ban_appeal(7)).await.expect("submit").is_none());
    }
}
