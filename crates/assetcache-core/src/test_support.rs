//! Scripted network double shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Url;

use crate::error::NetworkError;
use crate::http::{Request, Response};
use crate::network::Network;

pub const ORIGIN: &str = "http://localhost:8080";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Answers from a fixed route table; unknown URLs fail like a dropped
/// connection. Every call is recorded.
#[derive(Default)]
pub struct StubNetwork {
    routes: HashMap<String, Response>,
    calls: Mutex<Vec<String>>,
}

impl StubNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, path: &str, response: Response) -> Self {
        self.routes.insert(url(path).to_string(), response);
        self
    }

    pub fn ok(self, path: &str, body: &str) -> Self {
        self.respond(path, Response::new(200, body))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for StubNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());
        self.routes
            .get(&url)
            .cloned()
            .ok_or(NetworkError::Failed {
                url,
                reason: "connection refused".to_string(),
            })
    }
}
