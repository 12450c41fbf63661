//! Network seam used for cache misses and install-time asset fetches.
//!
//! `HttpNetwork` talks to a real origin through reqwest. Tests substitute
//! scripted implementations of the `Network` trait.

pub mod client;

use async_trait::async_trait;

use crate::error::NetworkError;
use crate::http::{Request, Response};

pub use client::HttpNetwork;

#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. Non-2xx statuses are returned as responses,
    /// only transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}
