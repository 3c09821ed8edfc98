//! Bybit V5 exchange integration
//!
//! - [`client`]: REST client implementing [`crate::broker::Broker`]
//! - [`auth`]: request signing and credentials
//! - [`rate_limit`]: pause on `X-Bapi-Limit-Status` exhaustion
//! - [`types`]: response envelope and payload models

pub mod auth;
pub mod client;
pub mod rate_limit;
pub mod types;

pub use auth::Credentials;
pub use client::{BybitClient, ClientConfig, MAINNET_URL, TESTNET_URL};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
