//! # Request Module
//!
//! The fetch unit submitted to the engine.
//!
//! A [`Request`] describes one HTTP exchange (method, URL, headers, body) plus
//! the engine-side baggage that travels with it: opaque metadata handed back
//! to the parser, the parser itself, and an optional per-request HTTP client.
//!
//! Requests are identified by their [`Fingerprint`], a SHA-256 digest of
//! `body ‖ url ‖ method`. Two requests that agree on those three parts are the
//! same request as far as deduplication and retry accounting are concerned,
//! whatever their metadata says.

use crate::error::SpiderError;
use crate::spider::Parser;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use url::Url;

/// Opaque key-value metadata carried from a request to its response.
pub type Meta = HashMap<String, serde_json::Value>;

/// Fixed-size request identity used by the dedup filter and the retry monitor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digests `body ‖ url ‖ method`.
    pub fn compute(method: &Method, url: &Url, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hasher.update(url.as_str().as_bytes());
        hasher.update(method.as_str().as_bytes());
        Fingerprint(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Two independent 64-bit words taken from the digest, used for double hashing.
    pub(crate) fn hash_pair(&self) -> (u64, u64) {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&self.0[0..8]);
        hi.copy_from_slice(&self.0[8..16]);
        (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// A request to be admitted, fetched and parsed.
pub struct Request<I> {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    meta: Meta,
    parser: Option<Arc<dyn Parser<I>>>,
    client: Option<reqwest::Client>,
    fingerprint: OnceLock<Fingerprint>,
}

impl<I: Send + 'static> Request<I> {
    /// Creates a request with an empty body, no metadata and no parser.
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            meta: Meta::new(),
            parser: None,
            client: None,
            fingerprint: OnceLock::new(),
        }
    }

    /// Parses `url` and creates a GET request for it.
    pub fn get(url: &str) -> Result<Self, SpiderError> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    /// Adopts a fully built `reqwest::Request`.
    ///
    /// Streaming bodies cannot be replayed on retry, so they are dropped; only
    /// in-memory bodies are carried over.
    pub fn from_native(native: reqwest::Request) -> Self {
        let body = native
            .body()
            .and_then(|body| body.as_bytes())
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();
        let mut request = Self::new(native.method().clone(), native.url().clone());
        request.headers = native.headers().clone();
        request.body = body;
        request
    }

    pub fn with_parser<P>(mut self, parser: P) -> Self
    where
        P: Parser<I>,
    {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Uses an already shared parser.
    pub fn with_shared_parser(mut self, parser: Arc<dyn Parser<I>>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.fingerprint = OnceLock::new();
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_meta_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Fetches this request with `client` instead of the engine's default client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }
}

impl<I> Request<I> {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn parser(&self) -> Option<&Arc<dyn Parser<I>>> {
        self.parser.as_ref()
    }

    pub fn client(&self) -> Option<&reqwest::Client> {
        self.client.as_ref()
    }

    /// The URL scheme, e.g. `https`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The URL host without the port.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// A request can be scheduled only if it has a URL and a parser.
    pub fn is_valid(&self) -> bool {
        !self.url.as_str().is_empty() && self.parser.is_some()
    }

    /// The request fingerprint, computed on first use.
    pub fn fingerprint(&self) -> Fingerprint {
        *self
            .fingerprint
            .get_or_init(|| Fingerprint::compute(&self.method, &self.url, &self.body))
    }
}

impl<I> Clone for Request<I> {
    fn clone(&self) -> Self {
        Request {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            meta: self.meta.clone(),
            parser: self.parser.clone(),
            client: self.client.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl<I> fmt::Debug for Request<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("body_len", &self.body.len())
            .field("meta", &self.meta)
            .field("has_parser", &self.parser.is_some())
            .field("has_client", &self.client.is_some())
            .finish()
    }
}
