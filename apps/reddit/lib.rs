pub mod config;
pub mod credentials;
pub mod db_handler;
pub mod errors;
pub mod eviction;
pub mod fetchers;
pub mod models;
pub mod reddit_api;
pub mod synchronizer;

pub use config::SyncConfig;
pub use errors::{ConfigError, EvictionError, FetchError, SyncError, SyncPhase};
pub use eviction::EvictionPolicy;
pub use models::posts::Post;
pub use synchronizer::{SyncStats, Synchronizer, sync, sync_with};

pub const MAX_PAGE_SIZE: usize = 100; // Upper bound the listing endpoint accepts
pub const MAX_PAGES_PER_RUN: u32 = 50; // Safety break for pagination loops
