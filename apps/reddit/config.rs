use crate::eviction::EvictionPolicy;
use serde::Deserialize;
use std::{env, fmt::Display, fs, str::FromStr, time::Duration};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "reddit-sync.yaml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub feed: FeedConfig,
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub eviction: EvictionConfig,
    pub schedule: ScheduleConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub subreddit: String,
    pub fetch_limit: usize,
    pub page_size: usize,
    pub api_base_url: String,
    pub auth_base_url: String,
    pub preview_limit: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            subreddit: "economics".to_string(),
            fetch_limit: 100,
            page_size: 100,
            api_base_url: "https://oauth.reddit.com".to_string(),
            auth_base_url: "https://www.reddit.com".to_string(),
            preview_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: 30,
            max_retries: 5,
            initial_backoff_ms: 2_000,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout_secs: 15,
            acquire_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionMode {
    Exact,
    Fixed,
    Disabled,
}

impl FromStr for EvictionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" | "exact-cycle" => Ok(EvictionMode::Exact),
            "fixed" | "fixed-cycle" => Ok(EvictionMode::Fixed),
            "disabled" | "none" | "off" => Ok(EvictionMode::Disabled),
            other => Err(format!("unknown eviction policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub policy: EvictionMode,
    /// Rows kept before exact-cycle eviction starts trimming.
    pub floor: u64,
    /// Row count at which fixed-cycle eviction considers the table full.
    pub capacity: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            policy: EvictionMode::Exact,
            floor: 1_000,
            capacity: 10_000,
        }
    }
}

impl EvictionConfig {
    pub fn policy(&self) -> EvictionPolicy {
        match self.policy {
            EvictionMode::Exact => EvictionPolicy::ExactCycle { floor: self.floor },
            EvictionMode::Fixed => EvictionPolicy::FixedCycle {
                capacity: self.capacity,
            },
            EvictionMode::Disabled => EvictionPolicy::Disabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Unset runs a single sync and exits.
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    #[default]
    Env,
    Json,
}

impl FromStr for CredentialSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "env" => Ok(CredentialSource::Env),
            "json" => Ok(CredentialSource::Json),
            other => Err(format!("unknown credential source {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    pub source: CredentialSource,
    pub json_path: Option<String>,
}

impl SyncConfig {
    /// Reads the YAML file named by `REDDIT_SYNC_CONFIG_PATH` (falling back to
    /// defaults when it is absent or broken), then applies env overrides.
    pub fn load() -> SyncConfig {
        let path =
            env::var("REDDIT_SYNC_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_yaml::from_str::<SyncConfig>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(error = %err, path = %path, "Failed to parse sync config, using defaults");
                    SyncConfig::default()
                }
            },
            Err(err) => {
                info!(error = %err, path = %path, "Sync config not found, using defaults");
                SyncConfig::default()
            }
        };

        config.apply_overrides(|key| env::var(key).ok());

        info!(
            subreddit = %config.feed.subreddit,
            fetch_limit = config.feed.fetch_limit,
            eviction = ?config.eviction.policy(),
            interval_secs = ?config.schedule.interval_secs,
            "Sync config loaded"
        );

        config
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(subreddit) = lookup("REDDIT_SUBREDDIT") {
            self.feed.subreddit = subreddit.trim().trim_start_matches("r/").to_string();
        }
        if let Some(url) = lookup("REDDIT_API_BASE_URL") {
            self.feed.api_base_url = url;
        }
        if let Some(url) = lookup("REDDIT_AUTH_BASE_URL") {
            self.feed.auth_base_url = url;
        }

        parse_override(&lookup, "REDDIT_FETCH_LIMIT", &mut self.feed.fetch_limit);
        parse_override(&lookup, "REDDIT_PAGE_SIZE", &mut self.feed.page_size);
        parse_override(&lookup, "PREVIEW_LIMIT", &mut self.feed.preview_limit);

        parse_override(
            &lookup,
            "HTTP_CONNECT_TIMEOUT_SECS",
            &mut self.http.connect_timeout_secs,
        );
        parse_override(&lookup, "HTTP_TIMEOUT_SECS", &mut self.http.timeout_secs);
        parse_override(&lookup, "HTTP_MAX_RETRIES", &mut self.http.max_retries);
        parse_override(
            &lookup,
            "HTTP_INITIAL_BACKOFF_MS",
            &mut self.http.initial_backoff_ms,
        );

        parse_override(
            &lookup,
            "DB_MAX_CONNECTIONS",
            &mut self.database.max_connections,
        );
        parse_override(
            &lookup,
            "DB_CONNECT_TIMEOUT_SECS",
            &mut self.database.connect_timeout_secs,
        );
        parse_override(
            &lookup,
            "DB_ACQUIRE_TIMEOUT_SECS",
            &mut self.database.acquire_timeout_secs,
        );

        parse_override(&lookup, "EVICTION_POLICY", &mut self.eviction.policy);
        parse_override(&lookup, "EVICTION_FLOOR", &mut self.eviction.floor);
        parse_override(&lookup, "EVICTION_CAPACITY", &mut self.eviction.capacity);

        if let Some(value) = lookup("SYNC_INTERVAL_SECS") {
            match value.trim().parse::<u64>() {
                Ok(0) => self.schedule.interval_secs = None,
                Ok(secs) => self.schedule.interval_secs = Some(secs),
                Err(err) => warn!(error = %err, "Failed to parse SYNC_INTERVAL_SECS override"),
            }
        }

        parse_override(&lookup, "CREDENTIALS_SOURCE", &mut self.credentials.source);
        if let Some(path) = lookup("CREDENTIALS_JSON_PATH") {
            self.credentials.json_path = Some(path);
        }
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(key) else {
        return;
    };

    match value.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(err) => warn!(error = %err, key, "Failed to parse config override, keeping previous value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.feed.subreddit, "economics");
        assert_eq!(config.feed.fetch_limit, 100);
        assert_eq!(config.feed.preview_limit, 5);
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(
            config.eviction.policy(),
            EvictionPolicy::ExactCycle { floor: 1_000 }
        );
        assert_eq!(config.schedule.interval_secs, None);
        assert_eq!(config.credentials.source, CredentialSource::Env);
    }

    #[test]
    fn env_overrides_replace_defaults() {
        let mut config = SyncConfig::default();
        config.apply_overrides(lookup_from(&[
            ("REDDIT_SUBREDDIT", "r/AskEconomics"),
            ("REDDIT_FETCH_LIMIT", "250"),
            ("EVICTION_POLICY", "fixed"),
            ("EVICTION_CAPACITY", "5000"),
            ("SYNC_INTERVAL_SECS", "3600"),
            ("CREDENTIALS_SOURCE", "json"),
            ("CREDENTIALS_JSON_PATH", "/run/secrets/reddit.json"),
        ]));

        assert_eq!(config.feed.subreddit, "AskEconomics");
        assert_eq!(config.feed.fetch_limit, 250);
        assert_eq!(
            config.eviction.policy(),
            EvictionPolicy::FixedCycle { capacity: 5_000 }
        );
        assert_eq!(config.schedule.interval_secs, Some(3600));
        assert_eq!(config.credentials.source, CredentialSource::Json);
        assert_eq!(
            config.credentials.json_path.as_deref(),
            Some("/run/secrets/reddit.json")
        );
    }

    #[test]
    fn unparsable_overrides_keep_previous_value() {
        let mut config = SyncConfig::default();
        config.apply_overrides(lookup_from(&[
            ("REDDIT_FETCH_LIMIT", "lots"),
            ("EVICTION_POLICY", "sometimes"),
            ("SYNC_INTERVAL_SECS", "-1"),
        ]));

        assert_eq!(config.feed.fetch_limit, 100);
        assert_eq!(config.eviction.policy, EvictionMode::Exact);
        assert_eq!(config.schedule.interval_secs, None);
    }

    #[test]
    fn yaml_sections_fill_missing_keys_with_defaults() {
        let config: SyncConfig = serde_yaml::from_str(
            "feed:\n  subreddit: finance\neviction:\n  policy: disabled\n",
        )
        .unwrap();

        assert_eq!(config.feed.subreddit, "finance");
        assert_eq!(config.feed.fetch_limit, 100);
        assert_eq!(config.eviction.policy(), EvictionPolicy::Disabled);
        assert_eq!(config.http.timeout_secs, 30);
    }
}
