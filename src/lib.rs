pub mod calendar;
pub mod config;
pub mod error;
pub mod http;
pub mod rate_limit;
pub mod retry_after;
pub mod types;
pub mod upload;
