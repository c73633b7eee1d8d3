use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Values the listing (or clients built on it) use for a removed or
/// suspended account. They are stored as NULL.
pub const AUTHOR_SENTINELS: [&str; 3] = ["[deleted]", "None", "none"];

/// A hot-listing item after normalization, ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub score: i32,
    pub num_comments: i32,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListingResponse {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
pub struct ListingChild {
    pub data: RawPost,
}

/// A listing item as the API sends it. Only `id` and `created_utc` are
/// required; everything else tolerates absence or null.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPost {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub num_comments: Option<i64>,
    #[serde(with = "epoch_seconds")]
    pub created_utc: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
}

impl From<RawPost> for Post {
    fn from(raw: RawPost) -> Self {
        Post {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            author: normalize_author(raw.author),
            // missing counters are stored as 0
            score: saturate(raw.score.unwrap_or(0)),
            num_comments: saturate(raw.num_comments.unwrap_or(0)),
            created_at: raw.created_utc,
            url: raw.url.unwrap_or_default(),
        }
    }
}

pub fn normalize_author(author: Option<String>) -> Option<String> {
    author.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() || AUTHOR_SENTINELS.contains(&trimmed) {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn saturate(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

#[derive(Debug, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        if !seconds.is_finite() {
            return Err(serde::de::Error::custom(format!(
                "created_utc is not a finite number: {seconds}"
            )));
        }

        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
        DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).ok_or_else(|| {
            serde::de::Error::custom(format!("created_utc out of range: {seconds}"))
        })
    }
}
