use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::api::SocialApi;
use crate::error::RunError;
use crate::history::{ExecutedTweet, HistoryStore, RECENT_LIMIT, TweetResult};
use crate::media::MediaUploader;
use crate::plan::{self, Plan};
use crate::schedule::{Schedule, ScheduledTweet};

/// How many entries may be mid-flight at once. Media steps within one entry
/// stay sequential; only whole entries run side by side.
const MAX_CONCURRENT_POSTS: usize = 2;

/// One pipeline instance: the parsed schedule plus its collaborators.
/// Everything is carried explicitly; nothing lives in process-wide state.
pub struct Pipeline {
    schedule: Schedule,
    schedule_error: Option<String>,
    api: Arc<dyn SocialApi>,
    store: Arc<dyn HistoryStore>,
    uploader: Arc<MediaUploader>,
}

impl Pipeline {
    /// Build a pipeline from the raw schedule document. A document that
    /// fails to parse is replaced by an empty schedule and the error is kept
    /// for reporting; the pipeline itself stays usable.
    pub fn new(
        schedule_text: &str,
        api: Arc<dyn SocialApi>,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        let (schedule, schedule_error) = match Schedule::parse(schedule_text) {
            Ok(schedule) => (schedule, None),
            Err(e) => {
                warn!("schedule failed to parse, falling back to an empty schedule: {e}");
                (Schedule::default(), Some(e.to_string()))
            }
        };
        Self {
            schedule,
            schedule_error,
            api,
            store,
            uploader: Arc::new(MediaUploader::new()),
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn schedule_error(&self) -> Option<&str> {
        self.schedule_error.as_deref()
    }

    /// Read history and resolve the plan without executing anything.
    pub async fn dry_run(&self) -> Result<Plan, RunError> {
        let history = self.store.get().await?;
        Ok(plan::resolve(history, &self.schedule, Utc::now()))
    }

    /// One full read-resolve-execute-persist cycle. Entry-level publish
    /// failures are recorded in the returned results; only schedule and
    /// storage problems fail the run as a whole.
    pub async fn run(&self) -> Result<Vec<ExecutedTweet>, RunError> {
        if let Some(err) = &self.schedule_error {
            return Err(RunError::Schedule(err.clone()));
        }

        let history = self.store.get().await?;
        let plan = plan::resolve(history, &self.schedule, Utc::now());
        info!(due = plan.entries.len(), "executing plan");

        let Plan {
            now,
            entries,
            mut history,
            ..
        } = plan;
        let time = now.format("%Y-%m-%d %H:%M:%S UTC").to_string();

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_POSTS));
        let mut tasks = JoinSet::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let api = Arc::clone(&self.api);
            let uploader = Arc::clone(&self.uploader);
            let semaphore = Arc::clone(&semaphore);
            let time = time.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                (index, execute_entry(api.as_ref(), &uploader, entry, &time).await)
            });
        }

        // Completion order, not schedule order.
        let mut completed: Vec<(usize, ExecutedTweet)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => completed.push(item),
                Err(e) => error!("post task failed to complete: {e}"),
            }
        }

        // Newest first: the run's entries go ahead of prior history, then
        // the list is capped.
        let mut recent: Vec<ExecutedTweet> =
            completed.iter().rev().map(|(_, t)| t.clone()).collect();
        recent.extend(history.recent_tweets.drain(..));
        recent.truncate(RECENT_LIMIT);
        history.recent_tweets = recent;
        history.last_run = now.timestamp_millis();

        self.store.set(&history, true).await?;

        completed.sort_by_key(|(index, _)| *index);
        Ok(completed.into_iter().map(|(_, tweet)| tweet).collect())
    }
}

/// Publish one due entry: upload its media (sequentially, all-or-nothing),
/// then post. The outcome is always an `ExecutedTweet`; failures land in its
/// result instead of propagating.
async fn execute_entry(
    api: &dyn SocialApi,
    uploader: &MediaUploader,
    entry: ScheduledTweet,
    time: &str,
) -> ExecutedTweet {
    let mut uploaded = Vec::new();
    for url in &entry.media {
        match uploader.upload(api, url).await {
            Ok(media) => uploaded.push(media),
            Err(e) => {
                warn!(%url, "media upload failed: {e}");
                return ExecutedTweet {
                    text: entry.text,
                    schedule: entry.schedule,
                    media: uploaded,
                    result: TweetResult::failed(e),
                };
            }
        }
    }

    let media_ids: Vec<String> = uploaded.iter().map(|m| m.media_id.clone()).collect();
    let result = match api.publish(&entry.text, &media_ids).await {
        Ok(tweet) => {
            info!(tweet_id = %tweet.id, "posted");
            TweetResult::posted(
                tweet.id.clone(),
                format!("https://x.com/{}/status/{}", tweet.author_handle, tweet.id),
                time.to_string(),
            )
        }
        Err(e) => {
            warn!("publish failed: {e}");
            TweetResult::failed(e)
        }
    };

    ExecutedTweet {
        text: entry.text,
        schedule: entry.schedule,
        media: uploaded,
        result,
    }
}
