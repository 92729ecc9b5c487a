pub mod config;
pub mod database;
pub mod filters;
pub mod friday;
pub mod models;
pub mod rate_limiter;
pub mod stream;
pub mod telegram;
pub mod twitter;

pub use config::Config;
pub use filters::{Filter, FilterOutcome};
pub use friday::FridayChecker;
pub use models::{NormalizeError, StreamResponse};
pub use rate_limiter::RetweetLimitHandler;
pub use stream::FurStream;
pub use twitter::{TwitterClient, TwitterError};
