use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::media::UploadedMedia;
use crate::schedule::Trigger;

/// Upper bound on the persisted recent-tweet list.
pub const RECENT_LIMIT: usize = 20;

/// Persisted run history. Field names match the stored JSON record
/// (`lastRun` is epoch milliseconds, 0 meaning "never ran").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct History {
    pub last_run: i64,
    pub recent_tweets: Vec<ExecutedTweet>,
}

/// A schedule entry after execution: raw media URLs are replaced by the
/// uploaded descriptors (when upload got that far) and a result is attached.
/// Failed posts are recorded too, not dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTweet {
    pub text: String,
    pub schedule: Vec<Trigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<UploadedMedia>,
    pub result: TweetResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TweetResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tweet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TweetResult {
    pub fn posted(tweet_id: String, url: String, time: String) -> Self {
        Self {
            success: true,
            tweet_id: Some(tweet_id),
            url: Some(url),
            time: Some(time),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Key-value persistence for the run history. `force` bypasses whatever
/// optimistic-concurrency check the backing store applies, if any.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn get(&self) -> Result<Option<History>, StorageError>;
    async fn set(&self, history: &History, force: bool) -> Result<(), StorageError>;
}

/// History persisted as a single JSON file.
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn get(&self) -> Result<Option<History>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    // The file store has no optimistic-concurrency check, so `force` is a
    // no-op here; writes go through a temp file and rename so a crashed run
    // never leaves a truncated record behind.
    async fn set(&self, history: &History, _force: bool) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(history)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_history() -> History {
        History {
            last_run: 1_704_067_200_000,
            recent_tweets: vec![ExecutedTweet {
                text: "hi".into(),
                schedule: vec![Trigger::Text("2024-01-01T00:00:00Z".into())],
                media: vec![],
                result: TweetResult::posted(
                    "42".into(),
                    "https://x.com/someone/status/42".into(),
                    "2024-01-01 00:00:01 UTC".into(),
                ),
            }],
        }
    }

    #[tokio::test]
    async fn absent_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("history.json"));
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("history.json"));
        let history = sample_history();

        store.set(&history, true).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(history));
    }

    #[tokio::test]
    async fn corrupt_record_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = FileHistoryStore::new(path);
        assert!(matches!(store.get().await, Err(StorageError::Serde(_))));
    }

    #[test]
    fn persisted_field_names_are_camel_case() {
        let json = serde_json::to_value(sample_history()).unwrap();
        assert!(json.get("lastRun").is_some());
        assert!(json.get("recentTweets").is_some());
        let result = &json["recentTweets"][0]["result"];
        assert_eq!(result["tweetId"], "42");
        assert_eq!(result["success"], true);
    }
}
