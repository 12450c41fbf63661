//! Request and response snapshots exchanged between the host, the
//! interceptor, the network and the storage backends.

use std::fmt;

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// What the requesting code intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// A full navigable page.
    Document,
    Style,
    Script,
    Image,
    Manifest,
    #[default]
    Empty,
}

/// Where a response came from, relative to the configured origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Served directly by the same origin.
    Basic,
    /// Cross-origin response with readable contents.
    Cors,
    /// Cross-origin response with hidden contents.
    Opaque,
    /// Result of a redirect that was not followed.
    OpaqueRedirect,
    Error,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// A plain `GET` for a subresource.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            destination: Destination::Empty,
            headers: Vec::new(),
        }
    }

    /// A `GET` for a full document, as issued by a page navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Identity under which a response is stored: method plus absolute URL
/// without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Final URL after redirects, if known.
    pub url: Option<String>,
    pub kind: ResponseKind,
    pub redirected: bool,
}

impl Response {
    /// A same-origin response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            url: None,
            kind: ResponseKind::Basic,
            redirected: false,
        }
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Status in the 2xx range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Full success served directly by the origin, not through a redirect.
    pub fn is_first_party_success(&self) -> bool {
        self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
    }
}
