use reqwest::StatusCode;
use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// Missing or unusable credentials / connection settings. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to read credentials from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse credentials from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed after {attempts} attempts: {source}")]
    Transport {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("rejected credentials ({status}): {body}")]
    Unauthorized { status: StatusCode, body: String },
    #[error("rate limited by {url}, gave up after {attempts} attempts")]
    RateLimited { url: String, attempts: usize },
    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// Eviction runs after the batch is committed, so this never fails a sync.
#[derive(Debug, Error)]
#[error("failed to evict {requested} oldest posts: {source}")]
pub struct EvictionError {
    pub requested: u64,
    #[source]
    pub source: DbErr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Config,
    Fetch,
    Connect,
    Schema,
    Upsert,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncPhase::Config => "config",
            SyncPhase::Fetch => "fetch",
            SyncPhase::Connect => "connect",
            SyncPhase::Schema => "schema",
            SyncPhase::Upsert => "upsert",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to connect to the database: {0}")]
    Connect(#[source] DbErr),
    #[error("failed to ensure the reddit_posts table: {0}")]
    Schema(#[source] DbErr),
    #[error("failed to upsert batch of {batch_size} posts: {source}")]
    Upsert {
        batch_size: usize,
        #[source]
        source: DbErr,
    },
}

impl SyncError {
    pub fn phase(&self) -> SyncPhase {
        match self {
            SyncError::Config(_) => SyncPhase::Config,
            SyncError::Fetch(_) => SyncPhase::Fetch,
            SyncError::Connect(_) => SyncPhase::Connect,
            SyncError::Schema(_) => SyncPhase::Schema,
            SyncError::Upsert { .. } => SyncPhase::Upsert,
        }
    }

    /// Retrying cannot help: credentials or settings have to be fixed first.
    pub fn is_fatal(&self) -> bool {
        self.phase() == SyncPhase::Config
    }
}

/// SQLSTATE 53100 (Postgres disk_full) and SQLITE_FULL.
const STORAGE_FULL_CODES: [&str; 2] = ["53100", "13"];

/// True when the database refused a write because it ran out of room, as
/// opposed to any other failure.
pub fn is_storage_full(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::Exec(runtime) | DbErr::Query(runtime) => runtime,
        _ => return false,
    };

    match runtime {
        RuntimeErr::SqlxError(sqlx_err) => sqlx_err
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .is_some_and(|code| STORAGE_FULL_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_storage_full() {
        assert!(!is_storage_full(&DbErr::RecordNotInserted));
        assert!(!is_storage_full(&DbErr::Custom("disk full".to_string())));
        assert!(!is_storage_full(&DbErr::Exec(RuntimeErr::Internal(
            "53100".to_string()
        ))));
    }

    #[test]
    fn phase_follows_variant() {
        let err = SyncError::Upsert {
            batch_size: 3,
            source: DbErr::RecordNotInserted,
        };
        assert_eq!(err.phase(), SyncPhase::Upsert);
        assert_eq!(err.phase().to_string(), "upsert");

        let err = SyncError::from(ConfigError::Missing("CLIENT_ID"));
        assert_eq!(err.phase(), SyncPhase::Config);
        assert_eq!(err.to_string(), "required setting CLIENT_ID is not set");
    }

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(SyncError::from(ConfigError::Missing("CLIENT_ID")).is_fatal());
        assert!(
            SyncError::from(ConfigError::Invalid {
                key: "DB_PORT",
                reason: "not a number".to_string(),
            })
            .is_fatal()
        );
        assert!(!SyncError::Connect(DbErr::RecordNotInserted).is_fatal());
        assert!(
            !SyncError::Upsert {
                batch_size: 1,
                source: DbErr::RecordNotInserted,
            }
            .is_fatal()
        );
    }
}
