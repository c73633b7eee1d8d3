use crate::{
    config::SyncConfig,
    credentials::CredentialProvider,
    db_handler,
    errors::{EvictionError, SyncError, is_storage_full},
    eviction::EvictionPolicy,
    fetchers::posts::{HotPostFetcher, PostSource},
    models::posts::Post,
    reddit_api::RedditApi,
};
use chrono::{DateTime, Utc};
use redditsync_db::models::reddit_post;
use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub subreddit: String,
    /// Posts returned by the feed.
    pub fetched: usize,
    /// Posts left after collapsing repeated ids.
    pub unique: usize,
    pub inserted: u64,
    pub updated: u64,
    pub evicted: u64,
    pub eviction_error: Option<String>,
    pub preview: Vec<PreviewRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRow {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub score: i32,
    pub num_comments: i32,
    pub created_at: DateTime<Utc>,
}

impl From<reddit_post::Model> for PreviewRow {
    fn from(model: reddit_post::Model) -> Self {
        PreviewRow {
            id: model.id,
            // tables created by older tooling allow NULL titles
            title: model.title.unwrap_or_default(),
            author: model.author,
            score: model.score,
            num_comments: model.num_comments,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub rows_after: u64,
}

/// An upsert plus whatever the storage-full fallback evicted to make room.
#[derive(Debug)]
pub struct UpsertReport {
    pub outcome: UpsertOutcome,
    pub evicted: u64,
    pub eviction_error: Option<EvictionError>,
}

/// Keeps the first occurrence of every id, preserving order.
pub fn dedupe_by_id(posts: Vec<Post>) -> Vec<Post> {
    let mut seen = HashSet::with_capacity(posts.len());
    posts
        .into_iter()
        .filter(|post| seen.insert(post.id.clone()))
        .collect()
}

/// Writes fetched batches into `reddit_posts` and keeps the table bounded.
/// The connection is borrowed; whoever opened it closes it.
pub struct Synchronizer<'a> {
    db: &'a DatabaseConnection,
    policy: EvictionPolicy,
    preview_limit: u64,
}

impl<'a> Synchronizer<'a> {
    pub fn new(db: &'a DatabaseConnection, policy: EvictionPolicy, preview_limit: u64) -> Self {
        Self {
            db,
            policy,
            preview_limit,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), SyncError> {
        db_handler::ensure_schema(self.db)
            .await
            .map_err(SyncError::Schema)
    }

    /// Applies the whole batch or nothing. Under fixed-cycle eviction a write
    /// refused for lack of storage frees one batch worth of rows and is
    /// retried once.
    #[instrument(skip(self, posts), fields(batch_size = posts.len()))]
    pub async fn upsert(&self, posts: &[Post]) -> Result<UpsertOutcome, SyncError> {
        self.upsert_with_fallback(posts)
            .await
            .map(|report| report.outcome)
    }

    /// Like [`Synchronizer::upsert`], also reporting rows the storage-full
    /// fallback deleted before retrying.
    pub async fn upsert_with_fallback(&self, posts: &[Post]) -> Result<UpsertReport, SyncError> {
        let mut evicted = 0;
        let mut eviction_error = None;

        let outcome = match self.try_upsert(posts).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if self.policy.evicts_on_storage_full() && is_storage_full(&err) => {
                warn!(error = %err, "Storage full, evicting oldest posts before retrying");
                match self.evict_oldest(posts.len() as u64).await {
                    Ok(deleted) => evicted = deleted,
                    Err(evict_err) => {
                        error!(error = %evict_err, "Eviction before retry failed");
                        eviction_error = Some(evict_err);
                    }
                }
                self.try_upsert(posts).await
            }
            Err(err) => Err(err),
        };

        let outcome = outcome.map_err(|source| SyncError::Upsert {
            batch_size: posts.len(),
            source,
        })?;

        Ok(UpsertReport {
            outcome,
            evicted,
            eviction_error,
        })
    }

    async fn try_upsert(&self, posts: &[Post]) -> Result<UpsertOutcome, DbErr> {
        let ids: Vec<&str> = posts.iter().map(|post| post.id.as_str()).collect();

        let txn = self.db.begin().await?;
        let existing = db_handler::count_existing(&txn, &ids).await?;
        db_handler::upsert_posts(&txn, posts).await?;
        let rows_after = db_handler::count_posts(&txn).await?;
        txn.commit().await?;

        Ok(UpsertOutcome {
            inserted: (posts.len() as u64).saturating_sub(existing),
            updated: existing,
            rows_after,
        })
    }

    /// Deletes up to `count` of the oldest posts in their own transaction.
    #[instrument(skip(self))]
    pub async fn evict_oldest(&self, count: u64) -> Result<u64, EvictionError> {
        let evict = async {
            let txn = self.db.begin().await?;
            let deleted = db_handler::delete_oldest(&txn, count).await?;
            txn.commit().await?;
            Ok::<u64, DbErr>(deleted)
        };

        let deleted = evict.await.map_err(|source| EvictionError {
            requested: count,
            source,
        })?;

        if deleted < count {
            info!(requested = count, deleted, "Fewer rows than requested to evict");
        } else {
            info!(deleted, "Evicted oldest posts");
        }
        Ok(deleted)
    }

    pub async fn preview(&self) -> Result<Vec<PreviewRow>, DbErr> {
        let rows = db_handler::latest_posts(self.db, self.preview_limit).await?;
        Ok(rows.into_iter().map(PreviewRow::from).collect())
    }

    /// schema, upsert, eviction, preview. Only the first two can fail the run.
    #[instrument(skip(self, posts), fields(subreddit = subreddit, fetched = posts.len()))]
    pub async fn apply(&self, subreddit: &str, posts: Vec<Post>) -> Result<SyncStats, SyncError> {
        self.ensure_schema().await?;

        let fetched = posts.len();
        let posts = dedupe_by_id(posts);
        let mut stats = SyncStats {
            subreddit: subreddit.to_string(),
            fetched,
            unique: posts.len(),
            ..Default::default()
        };

        if posts.is_empty() {
            info!("No posts fetched, nothing to write");
            return Ok(stats);
        }

        let batch_size = posts.len() as u64;

        if let EvictionPolicy::FixedCycle { .. } = self.policy {
            match db_handler::count_posts(self.db).await {
                Ok(rows_before) => {
                    let count = self.policy.before_upsert(batch_size, rows_before);
                    if count > 0 {
                        info!(rows_before, count, "Table at capacity, evicting before upsert");
                        self.record_eviction(&mut stats, count).await;
                    }
                }
                Err(err) => warn!(error = %err, "Failed to count posts for capacity check"),
            }
        }

        let report = self.upsert_with_fallback(&posts).await?;
        let outcome = report.outcome;
        stats.inserted = outcome.inserted;
        stats.updated = outcome.updated;
        stats.evicted += report.evicted;
        if let Some(err) = report.eviction_error {
            stats.eviction_error = Some(err.to_string());
        }
        info!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            rows = outcome.rows_after,
            "Batch upserted"
        );

        let count = self
            .policy
            .after_upsert(batch_size, outcome.updated, outcome.rows_after);
        if count > 0 {
            self.record_eviction(&mut stats, count).await;
        }

        match self.preview().await {
            Ok(preview) => {
                for row in &preview {
                    info!(
                        id = %row.id,
                        title = %row.title,
                        author = ?row.author,
                        score = row.score,
                        num_comments = row.num_comments,
                        created_at = %row.created_at,
                        "Latest post"
                    );
                }
                stats.preview = preview;
            }
            Err(err) => warn!(error = %err, "Failed to read back latest posts"),
        }

        Ok(stats)
    }

    async fn record_eviction(&self, stats: &mut SyncStats, count: u64) {
        match self.evict_oldest(count).await {
            Ok(deleted) => stats.evicted += deleted,
            Err(err) => {
                error!(error = %err, requested = err.requested, "Eviction failed, batch kept");
                stats.eviction_error = Some(err.to_string());
            }
        }
    }
}

/// One full run: credentials, fetch, connect, write. Nothing touches the
/// database until the fetch has succeeded.
#[instrument(skip(provider, config), fields(subreddit = %config.feed.subreddit))]
pub async fn sync<P>(provider: &P, config: &SyncConfig) -> Result<SyncStats, SyncError>
where
    P: CredentialProvider + ?Sized,
{
    let result = run(provider, config).await;
    log_outcome(&result);
    result
}

async fn run<P>(provider: &P, config: &SyncConfig) -> Result<SyncStats, SyncError>
where
    P: CredentialProvider + ?Sized,
{
    let credentials = provider.credentials().await?;

    let api = RedditApi::new(&credentials.reddit, &config.feed, &config.http)?;
    let fetcher = HotPostFetcher::new(api, config.feed.page_size);
    let posts = fetcher
        .fetch_hot(&config.feed.subreddit, config.feed.fetch_limit)
        .await?;

    let db = db_handler::connect(&credentials.database_url, &config.database)
        .await
        .map_err(SyncError::Connect)?;

    let result = Synchronizer::new(&db, config.eviction.policy(), config.feed.preview_limit)
        .apply(&config.feed.subreddit, posts)
        .await;

    if let Err(err) = db.close().await {
        warn!(error = %err, "Failed to close database connection");
    }

    result
}

/// Same as [`sync`] with the feed and the connection supplied by the caller.
pub async fn sync_with<S>(
    source: &S,
    db: &DatabaseConnection,
    config: &SyncConfig,
) -> Result<SyncStats, SyncError>
where
    S: PostSource + ?Sized,
{
    let result = fetch_and_apply(source, db, config).await;
    log_outcome(&result);
    result
}

async fn fetch_and_apply<S>(
    source: &S,
    db: &DatabaseConnection,
    config: &SyncConfig,
) -> Result<SyncStats, SyncError>
where
    S: PostSource + ?Sized,
{
    let posts = source
        .fetch_hot(&config.feed.subreddit, config.feed.fetch_limit)
        .await?;

    Synchronizer::new(db, config.eviction.policy(), config.feed.preview_limit)
        .apply(&config.feed.subreddit, posts)
        .await
}

fn log_outcome(result: &Result<SyncStats, SyncError>) {
    match result {
        Ok(stats) => info!(
            subreddit = %stats.subreddit,
            fetched = stats.fetched,
            unique = stats.unique,
            inserted = stats.inserted,
            updated = stats.updated,
            evicted = stats.evicted,
            eviction_error = ?stats.eviction_error,
            "Sync completed"
        ),
        Err(err) => error!(phase = %err.phase(), error = %err, "Sync failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(id: &str, score: i32) -> Post {
        Post {
            id: id.to_string(),
            title: format!("title {id}"),
            author: None,
            score,
            num_comments: 0,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            url: String::new(),
        }
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let posts = dedupe_by_id(vec![post("a", 1), post("b", 2), post("a", 3)]);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "a");
        assert_eq!(posts[0].score, 1);
        assert_eq!(posts[1].id, "b");
    }
}
