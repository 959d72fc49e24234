//! Core data models for the edge shield
//!
//! A [`EdgeRequest`] is built once per inbound call and is read-only to every
//! component afterwards. An [`EdgeResponse`] is what a handling strategy
//! produces, either fetched from origin, read from a cache tier, or synthesized.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};

/// Declared resource kind of a request (the `Sec-Fetch-Dest` value)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Image,
    Document,
    Script,
    Style,
    Font,
    /// No destination declared, as for programmatic fetches
    Empty,
    Other(String),
}

impl ResourceKind {
    /// Parse a destination string; unknown values are kept as `Other`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => ResourceKind::Image,
            "document" => ResourceKind::Document,
            "script" => ResourceKind::Script,
            "style" => ResourceKind::Style,
            "font" => ResourceKind::Font,
            "" | "empty" => ResourceKind::Empty,
            other => ResourceKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Document => "document",
            ResourceKind::Script => "script",
            ResourceKind::Style => "style",
            ResourceKind::Font => "font",
            ResourceKind::Empty => "",
            ResourceKind::Other(value) => value,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ResourceKind::Image)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResourceKind::Empty)
    }
}

/// Navigation mode of a request (the `Sec-Fetch-Mode` value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestMode {
    /// Top-level browser navigation
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    /// Parse a mode string; anything unrecognised is treated as `no-cors`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => RequestMode::Navigate,
            "same-origin" => RequestMode::SameOrigin,
            "cors" => RequestMode::Cors,
            _ => RequestMode::NoCors,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Navigate => "navigate",
            RequestMode::SameOrigin => "same-origin",
            RequestMode::NoCors => "no-cors",
            RequestMode::Cors => "cors",
        }
    }
}

/// Handling class assigned to a request by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    StaticAsset,
    ProtectedImage,
    Dynamic,
    Generic,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::StaticAsset => "static_asset",
            RequestClass::ProtectedImage => "protected_image",
            RequestClass::Dynamic => "dynamic",
            RequestClass::Generic => "generic",
        }
    }
}

/// An inbound unit of work
#[derive(Debug, Clone)]
pub struct EdgeRequest {
    url: String,
    method: Method,
    destination: ResourceKind,
    mode: RequestMode,
    headers: HeaderMap,
    body: Bytes,
}

impl EdgeRequest {
    /// Create a request with an empty destination, `no-cors` mode and no headers
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        EdgeRequest {
            url: url.into(),
            method,
            destination: ResourceKind::Empty,
            mode: RequestMode::NoCors,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_destination(mut self, destination: ResourceKind) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header; invalid names or values are dropped
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn destination(&self) -> &ResourceKind {
        &self.destination
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed absolute URL, `None` when the URL is malformed or relative
    pub fn uri(&self) -> Option<Uri> {
        let uri: Uri = self.url.parse().ok()?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return None;
        }
        Some(uri)
    }

    /// Path component of the URL
    pub fn path(&self) -> Option<String> {
        self.uri().map(|uri| uri.path().to_string())
    }

    /// Host the request was addressed to, without port
    pub fn host(&self) -> Option<String> {
        self.uri()
            .and_then(|uri| uri.host().map(|h| h.to_ascii_lowercase()))
    }

    /// `scheme://authority` of the URL
    pub fn origin(&self) -> Option<String> {
        let uri = self.uri()?;
        Some(format!("{}://{}", uri.scheme_str()?, uri.authority()?))
    }

    /// Identity used to key cache tiers: method plus URL without fragment
    pub fn cache_key(&self) -> String {
        let url = match self.url.split_once('#') {
            Some((before, _)) => before,
            None => &self.url,
        };
        format!("{} {}", self.method, url)
    }
}

/// Whether a response came from the serving origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    /// Same-origin response
    Basic,
    Cors,
    Opaque,
    /// Built locally by the edge layer
    Synthetic,
}

/// A response produced by a handling strategy
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
}

impl EdgeResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        EdgeResponse {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
        }
    }

    /// Add a header; invalid values are dropped
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Status in the 2xx range
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
