use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{ForumConfig, RetryConfig};
use crate::db::{DatabaseError, ThreadStore};
use crate::platform::{ChatPlatform, ThreadEdit};

/// `42 | Some Title` with tolerant whitespace around the separator.
static NUMBERED_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*\|\s*(.+)$").expect("static regex"));

/// Hands out sequential debate numbers and repairs numbering drift.
/// The counter lives in a single store row mutated inside an exclusive
/// transaction, never in process memory, so restarts and concurrent
/// callers stay consistent.
pub struct NumberingAuthority {
    threads: Arc<dyn ThreadStore>,
    retired_prefix: String,
    max_title_length: usize,
    edit_pacing: Duration,
}

impl NumberingAuthority {
    pub fn new(threads: Arc<dyn ThreadStore>, forum: &ForumConfig, retry: &RetryConfig) -> Self {
        Self {
            threads,
            retired_prefix: forum.retired_prefix.clone(),
            max_title_length: forum.max_title_length,
            edit_pacing: Duration::from_millis(retry.fetch_delay_ms),
        }
    }

    pub async fn next_number(&self) -> Result<i64, DatabaseError> {
        self.threads.next_debate_number().await
    }

    pub async fn counter(&self) -> Result<i64, DatabaseError> {
        self.threads.counter().await
    }

    /// Administrative recovery, exposed through the CLI.
    pub async fn set_counter(&self, value: i64) -> Result<(), DatabaseError> {
        self.threads.set_counter(value).await
    }

    /// Splits a numbered thread name into its number and bare title.
    pub fn parse_numbered_title(name: &str) -> Option<(i64, &str)> {
        let captures = NUMBERED_TITLE.captures(name)?;
        let number = captures.get(1)?.as_str().parse::<i64>().ok()?;
        Some((number, captures.get(2)?.as_str()))
    }

    /// Builds `N | Title`, truncated to the platform's title limit.
    pub fn format_title(&self, number: i64, title: &str) -> String {
        let full = format!("{number} | {title}");
        if full.chars().count() <= self.max_title_length {
            full
        } else {
            full.chars().take(self.max_title_length).collect()
        }
    }

    /// Renumbers every numbered, non-retired thread to a dense
    /// ascending sequence and syncs the counter to the highest number.
    /// Idempotent: a drift-free forum produces zero edits. Returns the
    /// number of threads renamed.
    pub async fn repair_gaps(&self, platform: &dyn ChatPlatform) -> Result<u64> {
        let threads = platform.forum_threads(true).await?;

        let mut numbered: Vec<(i64, String, i64)> = threads
            .iter()
            .filter(|t| !t.name.starts_with(&self.retired_prefix))
            .filter_map(|t| {
                Self::parse_numbered_title(&t.name)
                    .map(|(number, title)| (number, title.to_string(), t.id))
            })
            .collect();
        // Tie on duplicate numbers breaks by thread id, the creation
        // order the platform assigned.
        numbered.sort_by_key(|(number, _, thread_id)| (*number, *thread_id));

        let mut renamed = 0u64;
        // The counter must cover every number still visible on the
        // platform, including threads whose rename did not land.
        let mut highest = 0i64;
        for (index, (number, title, thread_id)) in numbered.iter().enumerate() {
            let expected = (index + 1) as i64;
            if *number == expected {
                highest = highest.max(expected);
                continue;
            }
            let new_name = self.format_title(expected, title);
            match platform
                .edit_thread(
                    *thread_id,
                    &ThreadEdit {
                        name: Some(new_name.clone()),
                        ..ThreadEdit::default()
                    },
                )
                .await
            {
                Ok(()) => {
                    info!(thread_id, from = number, to = expected, "renumbered thread");
                    renamed += 1;
                    highest = highest.max(expected);
                }
                Err(e) => {
                    warn!(thread_id, error = %e, "thread renumbering failed, skipping");
                    highest = highest.max(*number);
                }
            }
            tokio::time::sleep(self.edit_pacing).await;
        }

        if self.threads.counter().await? != highest {
            self.threads.set_counter(highest).await?;
            info!(highest, "debate counter synced after gap repair");
        }

        Ok(renamed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::NumberingAuthority;
    use crate::config::{Config, DatabaseConfig};
    use crate::db::DatabaseManager;
    use crate::platform::mock::MockPlatform;

    fn test_config() -> Config {
        serde_yaml::from_str(
            r#"
forum:
  forum_id: 123
  bot_user_id: 999
retry:
  fetch_delay_ms: 0
"#,
        )
        .expect("config")
    }

    async fn test_authority() -> (NumberingAuthority, DatabaseManager, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_config = DatabaseConfig {
            path: file.path().to_string_lossy().to_string(),
        };
        let manager = DatabaseManager::new(&db_config).await.expect("db manager");
        manager.migrate().await.expect("migrate");

        let config = test_config();
        let authority =
            NumberingAuthority::new(manager.thread_store(), &config.forum, &config.retry);
        (authority, manager, file)
    }

    #[test]
    fn parses_numbered_titles() {
        assert_eq!(
            NumberingAuthority::parse_numbered_title("42 | Tabs vs Spaces"),
            Some((42, "Tabs vs Spaces"))
        );
        assert_eq!(
            NumberingAuthority::parse_numbered_title("7| dense"),
            Some((7, "dense"))
        );
        assert_eq!(NumberingAuthority::parse_numbered_title("no number"), None);
        assert_eq!(NumberingAuthority::parse_numbered_title("| empty"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_get_distinct_consecutive_numbers() {
        let (authority, _manager, _file) = test_authority().await;
        let authority = Arc::new(authority);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let authority = authority.clone();
            handles.push(tokio::spawn(
                async move { authority.next_number().await },
            ));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.expect("join").expect("number"));
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn gap_repair_renumbers_and_syncs_counter() {
        let (authority, _manager, _file) = test_authority().await;
        let platform = MockPlatform::new();

        platform.add_thread(10, "1 | Alpha", false);
        platform.add_thread(11, "3 | Beta", true);
        platform.add_thread(12, "7 | Gamma", false);
        platform.add_thread(13, "[DEPRECATED] 2 | Old", false);
        platform.add_thread(14, "just chatting", false);

        let renamed = authority.repair_gaps(&platform).await.expect("repair");
        assert_eq!(renamed, 2);
        assert_eq!(platform.thread_name(10).as_deref(), Some("1 | Alpha"));
        assert_eq!(platform.thread_name(11).as_deref(), Some("2 | Beta"));
        assert_eq!(platform.thread_name(12).as_deref(), Some("3 | Gamma"));
        // Retired and unnumbered threads are untouched.
        assert_eq!(
            platform.thread_name(13).as_deref(),
            Some("[DEPRECATED] 2 | Old")
        );
        assert_eq!(platform.thread_name(14).as_deref(), Some("just chatting"));
        assert_eq!(authority.counter().await.expect("counter"), 3);

        // A second pass finds nothing to do and issues no edits.
        let edits_after_first = platform.edits().len();
        assert_eq!(authority.repair_gaps(&platform).await.expect("repair"), 0);
        assert_eq!(platform.edits().len(), edits_after_first);
        assert_eq!(authority.next_number().await.expect("next"), 4);
    }

    #[tokio::test]
    async fn counter_covers_numbers_left_behind_by_failed_renames() {
        let (authority, _manager, _file) = test_authority().await;
        let platform = MockPlatform::new();

        platform.add_thread(10, "1 | Alpha", false);
        platform.add_thread(11, "5 | Beta", false);
        platform.fail_edits_for(11);

        let renamed = authority.repair_gaps(&platform).await.expect("repair");
        assert_eq!(renamed, 0);
        assert_eq!(platform.thread_name(11).as_deref(), Some("5 | Beta"));

        // The stale name still occupies number 5, so the counter must
        // not fall back below it and reissue a taken number.
        assert_eq!(authority.counter().await.expect("counter"), 5);
        assert_eq!(authority.next_number().await.expect("next"), 6);
    }

    #[tokio::test]
    async fn titles_truncate_at_the_platform_limit() {
        let (authority, _manager, _file) = test_authority().await;
        let long = "x".repeat(200);
        let title = authority.format_title(5, &long);
        assert_eq!(title.chars().count(), 100);
        assert!(title.starts_with("5 | xxx"));
    }
}
