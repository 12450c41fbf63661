//! reqwest-backed implementation of the `Network` trait.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::Network;
use crate::error::NetworkError;
use crate::http::{Request, Response, ResponseKind};

/// HTTP client bound to the application's origin.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    pub fn new(origin: Url, timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Classify the final URL of a response against the configured origin.
    fn classify(&self, final_url: &Url) -> ResponseKind {
        if final_url.origin() == self.origin.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(url = %request.url, status, bytes = body.len(), "Network response received");

        Ok(Response {
            status,
            headers,
            body,
            kind: self.classify(&final_url),
            redirected: final_url != request.url,
            url: Some(final_url.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> HttpNetwork {
        let origin = Url::parse("http://localhost:8080").unwrap();
        HttpNetwork::new(origin, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_classify_same_origin_is_basic() {
        let url = Url::parse("http://localhost:8080/static/css/main.css").unwrap();
        assert_eq!(network().classify(&url), ResponseKind::Basic);
    }

    #[test]
    fn test_classify_other_origin_is_cors() {
        for other in [
            "https://localhost:8080/",
            "http://localhost:9090/",
            "http://cdn.example.com/app.js",
        ] {
            let url = Url::parse(other).unwrap();
            assert_eq!(network().classify(&url), ResponseKind::Cors, "{}", other);
        }
    }
}
