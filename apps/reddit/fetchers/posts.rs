use crate::{
    MAX_PAGE_SIZE, MAX_PAGES_PER_RUN, errors::FetchError, models::posts::Post,
    reddit_api::RedditApi,
};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

/// Anything that can produce a subreddit's hot posts, in rank order.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_hot(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, FetchError>;
}

pub struct HotPostFetcher {
    api: RedditApi,
    page_size: usize,
}

impl HotPostFetcher {
    pub fn new(api: RedditApi, page_size: usize) -> Self {
        Self {
            api,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

#[async_trait]
impl PostSource for HotPostFetcher {
    /// Walks the listing with its `after` cursor until `limit` unique posts
    /// are collected or the feed runs dry.
    #[instrument(skip(self), fields(page_size = self.page_size))]
    async fn fetch_hot(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, FetchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let token = self.api.access_token().await?;

        let mut posts: Vec<Post> = Vec::with_capacity(limit);
        let mut seen: HashSet<String> = HashSet::new();
        let mut after: Option<String> = None;
        let mut page = 0;

        while posts.len() < limit && page < MAX_PAGES_PER_RUN {
            let wanted = (limit - posts.len()).min(self.page_size);
            let listing = self
                .api
                .hot_page(&token, subreddit, wanted, after.as_deref())
                .await?;
            page += 1;

            if listing.children.is_empty() {
                info!(page, "Listing exhausted");
                break;
            }

            let received = listing.children.len();
            let mut duplicates = 0;
            for child in listing.children {
                let post = Post::from(child.data);
                if seen.insert(post.id.clone()) {
                    posts.push(post);
                } else {
                    duplicates += 1;
                }
            }

            info!(
                page,
                received,
                duplicates,
                total = posts.len(),
                "Fetched hot listing page"
            );

            match listing.after {
                Some(next) if after.as_deref() != Some(next.as_str()) => after = Some(next),
                Some(_) => {
                    warn!(page, "Listing cursor did not advance, stopping");
                    break;
                }
                None => break,
            }
        }

        if page >= MAX_PAGES_PER_RUN && posts.len() < limit {
            warn!(
                pages = page,
                collected = posts.len(),
                limit,
                "Page cap reached before limit"
            );
        }

        posts.truncate(limit);
        Ok(posts)
    }
}

/// A fixed batch, for embedding callers that already hold the posts.
#[async_trait]
impl PostSource for Vec<Post> {
    async fn fetch_hot(&self, _subreddit: &str, limit: usize) -> Result<Vec<Post>, FetchError> {
        Ok(self.iter().take(limit).cloned().collect())
    }
}
