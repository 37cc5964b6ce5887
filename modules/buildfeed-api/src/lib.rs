//! HTTP surface of the feed service: personalized feed, event ingestion,
//! experiment results, trending aggregates and analytics.

pub mod auth;
pub mod error;
pub mod maintenance;
pub mod rate_limit;
pub mod rest;
pub mod router;
pub mod state;

pub use auth::{Caller, USER_ID_HEADER};
pub use error::ApiError;
pub use rate_limit::RateLimiter;
pub use router::build_router;
pub use state::{AppState, Limits, Stores};
