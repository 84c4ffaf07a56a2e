use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ForumConfig, RetryConfig, SchedulerConfig};
use crate::db::{VoteKind, VoteOutcome};
use crate::karma::KarmaLedger;
use crate::platform::{ChatPlatform, PlatformError, ThreadEdit, ThreadInfo};
use crate::util::AdaptivePacer;

/// What a full scan did. `complete` is true only when every thread was
/// walked to the end without cancellation, which is the precondition
/// for the orphan purge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub threads_scanned: u64,
    pub threads_failed: u64,
    pub messages_seen: u64,
    pub votes_added: u64,
    pub votes_removed: u64,
    pub deleted_messages_purged: u64,
    pub orphan_messages_purged: u64,
    pub complete: bool,
}

/// Rebuilds the vote ledger from the platform's reaction state. The
/// platform is the source of truth; the scan walks every message in
/// the forum, diffs its reactions against the recorded votes and
/// applies each difference as its own vote operation so an interrupted
/// scan leaves the ledger strictly closer to reality.
pub struct Reconciler {
    ledger: Arc<KarmaLedger>,
    platform: Arc<dyn ChatPlatform>,
    bot_user_id: i64,
    retired_prefix: String,
    fetch_delay: Duration,
    throttle_cap: Duration,
    cancelled: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<KarmaLedger>,
        platform: Arc<dyn ChatPlatform>,
        forum: &ForumConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            ledger,
            platform,
            bot_user_id: forum.bot_user_id,
            retired_prefix: forum.retired_prefix.clone(),
            fetch_delay: Duration::from_millis(retry.fetch_delay_ms),
            throttle_cap: Duration::from_millis(retry.throttle_cap_ms),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping an in-flight scan from another task. The
    /// scan stops at the next message boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Walks the whole forum and converges the ledger on it. A raised
    /// cancel flag is honored but never cleared here, so a shutdown
    /// request cannot be lost to a scan that started late.
    pub async fn full_scan(&self) -> anyhow::Result<ScanReport> {
        let mut pacer = AdaptivePacer::new(self.fetch_delay, self.throttle_cap);
        let mut report = ScanReport::default();
        let mut seen_messages: HashSet<i64> = HashSet::new();

        let threads = self
            .fetch(&mut pacer, || self.platform.forum_threads(true))
            .await?;
        info!(threads = threads.len(), "reconciliation scan starting");

        for thread in &threads {
            if self.is_cancelled() {
                info!("reconciliation scan cancelled");
                return Ok(report);
            }
            if thread.name.starts_with(&self.retired_prefix) {
                // Retired threads are exempt from diffing, but their
                // messages are still live; list them so the purge
                // below cannot mistake their votes for orphans.
                match self
                    .fetch(&mut pacer, || self.platform.thread_messages(thread.id))
                    .await
                {
                    Ok(messages) => {
                        seen_messages.extend(messages.iter().map(|m| m.id));
                    }
                    Err(e) => {
                        warn!(thread_id = thread.id, error = %e, "retired thread listing failed");
                        report.threads_failed += 1;
                    }
                }
                continue;
            }
            match self
                .scan_thread(thread, &mut pacer, &mut seen_messages, &mut report)
                .await
            {
                Ok(()) => report.threads_scanned += 1,
                Err(e) => {
                    warn!(thread_id = thread.id, error = %e, "thread scan abandoned");
                    report.threads_failed += 1;
                }
            }
        }

        if self.is_cancelled() {
            info!("reconciliation scan cancelled");
            return Ok(report);
        }

        // Votes recorded for messages no thread surfaced anymore. Only
        // safe to drop when every thread was actually walked, otherwise
        // a failed thread's live votes would look orphaned.
        if report.threads_failed == 0 {
            for message_id in self.ledger.recorded_message_ids().await? {
                if !seen_messages.contains(&message_id) {
                    let dropped = self.ledger.delete_message_votes(message_id).await?;
                    if dropped > 0 {
                        debug!(message_id, dropped, "purged votes for vanished message");
                        report.orphan_messages_purged += 1;
                    }
                }
            }
            report.complete = true;
        }

        info!(
            threads = report.threads_scanned,
            failed = report.threads_failed,
            added = report.votes_added,
            removed = report.votes_removed,
            "reconciliation scan finished"
        );
        Ok(report)
    }

    async fn scan_thread(
        &self,
        thread: &ThreadInfo,
        pacer: &mut AdaptivePacer,
        seen_messages: &mut HashSet<i64>,
        report: &mut ScanReport,
    ) -> anyhow::Result<()> {
        let messages = self
            .fetch(pacer, || self.platform.thread_messages(thread.id))
            .await?;

        for message in &messages {
            if self.is_cancelled() {
                return Ok(());
            }
            seen_messages.insert(message.id);
            report.messages_seen += 1;
            if message.author_is_bot {
                continue;
            }
            self.reconcile_message(thread.id, message.id, message.author_id, pacer, report)
                .await?;
        }
        Ok(())
    }

    /// Diffs one message's reactions against its recorded votes.
    async fn reconcile_message(
        &self,
        thread_id: i64,
        message_id: i64,
        author_id: i64,
        pacer: &mut AdaptivePacer,
        report: &mut ScanReport,
    ) -> anyhow::Result<()> {
        let mut desired: HashMap<i64, VoteKind> = HashMap::new();
        for kind in [VoteKind::Up, VoteKind::Down] {
            let emoji = self.ledger.emoji_for_vote_kind(kind).to_string();
            let users = match self
                .fetch(pacer, || {
                    self.platform.reaction_users(thread_id, message_id, &emoji)
                })
                .await
            {
                Ok(users) => users,
                // Message gone between the listing and here.
                Err(PlatformError::NotFound) => {
                    let dropped = self.ledger.delete_message_votes(message_id).await?;
                    if dropped > 0 {
                        report.deleted_messages_purged += 1;
                    }
                    return Ok(());
                }
                Err(PlatformError::Forbidden(detail)) => {
                    debug!(message_id, detail, "reaction fetch forbidden, skipping message");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            for voter_id in users {
                if voter_id == self.bot_user_id || voter_id == author_id {
                    continue;
                }
                // A voter reacting both ways counts as their most
                // negative reaction.
                desired.insert(voter_id, kind);
            }
        }

        let recorded = self.ledger.message_votes(message_id).await?;

        for (&voter_id, &kind) in &desired {
            if recorded.get(&voter_id) != Some(&kind) {
                let outcome = self
                    .ledger
                    .add_vote(voter_id, message_id, author_id, kind)
                    .await?;
                if outcome != VoteOutcome::Unchanged {
                    report.votes_added += 1;
                }
            }
        }
        for &voter_id in recorded.keys() {
            if !desired.contains_key(&voter_id) {
                if self.ledger.remove_vote(voter_id, message_id).await?.is_some() {
                    report.votes_removed += 1;
                }
            }
        }
        Ok(())
    }

    /// Archives forum threads with no activity for the configured
    /// window. Returns how many were archived.
    pub async fn archive_idle_threads(
        &self,
        scheduler: &SchedulerConfig,
    ) -> anyhow::Result<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(scheduler.idle_archive_days);
        let mut pacer = AdaptivePacer::new(self.fetch_delay, self.throttle_cap);
        let threads = self
            .fetch(&mut pacer, || self.platform.forum_threads(false))
            .await?;

        let mut archived = 0;
        let edit = ThreadEdit {
            archived: Some(true),
            ..ThreadEdit::default()
        };
        for thread in threads {
            if thread.name.starts_with(&self.retired_prefix) {
                continue;
            }
            let Some(last_activity) = thread.last_activity else {
                continue;
            };
            if last_activity >= cutoff {
                continue;
            }
            match self.platform.edit_thread(thread.id, &edit).await {
                Ok(()) => {
                    info!(thread_id = thread.id, name = %thread.name, "archived idle thread");
                    archived += 1;
                }
                Err(e) => warn!(thread_id = thread.id, error = %e, "idle archive edit failed"),
            }
            tokio::time::sleep(pacer.step()).await;
        }
        Ok(archived)
    }

    /// Runs a platform fetch under the pacer: rests between calls and
    /// backs off on throttling until the call goes through.
    async fn fetch<T, F, Fut>(
        &self,
        pacer: &mut AdaptivePacer,
        mut call: F,
    ) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PlatformError>>,
    {
        tokio::time::sleep(pacer.step()).await;
        loop {
            match call().await {
                Ok(value) => {
                    pacer.on_success();
                    return Ok(value);
                }
                Err(e) if e.is_throttle() => {
                    let retry_after = match e {
                        PlatformError::RateLimited { retry_after } => retry_after,
                        _ => None,
                    };
                    let delay = pacer.on_throttle(retry_after);
                    warn!(delay_ms = delay.as_millis() as u64, "throttled, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
