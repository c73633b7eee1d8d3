use crate::{
    MAX_PAGE_SIZE,
    config::{FeedConfig, HttpConfig},
    credentials::RedditCredentials,
    errors::FetchError,
    models::posts::{AccessTokenResponse, ListingData, ListingResponse},
};
use reqwest::{Client, RequestBuilder, StatusCode, header::RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Thin client over the two endpoints a sync needs: the application-only
/// token grant and the subreddit hot listing.
#[derive(Clone)]
pub struct RedditApi {
    client: Client,
    credentials: RedditCredentials,
    api_base_url: String,
    auth_base_url: String,
    max_retries: usize,
    initial_backoff: Duration,
}

impl RedditApi {
    pub fn new(
        credentials: &RedditCredentials,
        feed: &FeedConfig,
        http: &HttpConfig,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(credentials.user_agent.clone())
            .connect_timeout(http.connect_timeout())
            .timeout(http.timeout())
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            credentials: credentials.clone(),
            api_base_url: feed.api_base_url.trim_end_matches('/').to_string(),
            auth_base_url: feed.auth_base_url.trim_end_matches('/').to_string(),
            max_retries: http.max_retries,
            initial_backoff: http.initial_backoff(),
        })
    }

    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<String, FetchError> {
        let url = format!("{}/api/v1/access_token", self.auth_base_url);

        let token: AccessTokenResponse = self
            .fetch_json(&url, || {
                self.client
                    .post(&url)
                    .basic_auth(
                        &self.credentials.client_id,
                        Some(&self.credentials.client_secret),
                    )
                    .form(&[("grant_type", "client_credentials")])
            })
            .await?;

        if token.access_token.is_empty() {
            return Err(FetchError::Malformed {
                url,
                reason: "empty access_token".to_string(),
            });
        }

        debug!(
            token_type = ?token.token_type,
            expires_in = ?token.expires_in,
            "Obtained access token"
        );
        Ok(token.access_token)
    }

    /// One page of `/r/{subreddit}/hot`. `limit` is clamped to the API maximum.
    #[instrument(skip(self, token))]
    pub async fn hot_page(
        &self,
        token: &str,
        subreddit: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<ListingData, FetchError> {
        let url = format!("{}/r/{}/hot", self.api_base_url, subreddit);
        let mut query = vec![
            ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let listing: ListingResponse = self
            .fetch_json(&url, || {
                self.client.get(&url).bearer_auth(token).query(&query)
            })
            .await?;

        Ok(listing.data)
    }

    async fn fetch_json<T, F>(&self, url: &str, build: F) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let body = self.execute_request(url, build).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Sends the request built by `build`, retrying rate limits, server errors
    /// and transport failures with exponential backoff.
    async fn execute_request<F>(&self, url: &str, build: F) -> Result<String, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        let mut delay = self.initial_backoff;

        loop {
            match build().send().await {
                Ok(response) => match response.status() {
                    status if status.is_success() => {
                        info!(url, "Request successful");
                        return response.text().await.map_err(|source| FetchError::Transport {
                            url: url.to_string(),
                            attempts: attempt + 1,
                            source,
                        });
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        attempt += 1;
                        if attempt > self.max_retries {
                            error!(url, attempt, "Max retries reached. Last error: HTTP 429");
                            return Err(FetchError::RateLimited {
                                url: url.to_string(),
                                attempts: attempt,
                            });
                        }

                        let retry_after = Self::get_retry_after(&response, delay);
                        warn!(url, attempt, retry_after = ?retry_after, "Rate limited, retrying");
                        sleep(retry_after).await;
                        delay = delay.max(retry_after) * 2;
                    }
                    status if status.is_server_error() => {
                        attempt += 1;
                        if attempt > self.max_retries {
                            let body = response.text().await.unwrap_or_default();
                            error!(url, status = %status, attempt, "Max retries reached. Server error");
                            return Err(FetchError::Status {
                                url: url.to_string(),
                                status,
                                body,
                            });
                        }

                        warn!(url, status = %status, attempt, delay = ?delay, "Server error, retrying");
                        sleep(delay).await;
                        delay *= 2;
                    }
                    status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                        let body = response.text().await.unwrap_or_default();
                        error!(url, status = %status, "Credentials rejected");
                        return Err(FetchError::Unauthorized { status, body });
                    }
                    status => {
                        let body = response.text().await.unwrap_or_default();
                        error!(url, status = %status, body = %body, "Request failed");
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status,
                            body,
                        });
                    }
                },
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(url, error = %e, attempt, "Max retries reached");
                        return Err(FetchError::Transport {
                            url: url.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    warn!(url, error = %e, attempt, delay = ?delay, "Request error, retrying");
                    sleep(delay).await;
                    delay *= 2; // Exponential backoff
                }
            }
        }
    }

    fn get_retry_after(response: &reqwest::Response, default: Duration) -> Duration {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(default)
    }
}
