//! The fetched counterpart of a [`Request`].
//!
//! The downloader reads the body completely before building a `Response`, so
//! the connection is already back in the pool by the time a parser sees it and
//! the body can be read as often as the parser likes.

use crate::request::{Meta, Request};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use std::fmt;
use url::Url;

/// A fetched page paired with the request that produced it.
pub struct Response<I> {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    request: Request<I>,
}

impl<I> Response<I> {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, request: Request<I>) -> Self {
        Response {
            status,
            headers,
            body,
            request,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Metadata attached to the originating request.
    pub fn meta(&self) -> &Meta {
        self.request.meta()
    }

    /// URL of the originating request.
    pub fn url(&self) -> &Url {
        self.request.url()
    }

    /// Method of the originating request.
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn request(&self) -> &Request<I> {
        &self.request
    }

    pub fn into_request(self) -> Request<I> {
        self.request
    }
}

impl<I> fmt::Debug for Response<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.request.url().as_str())
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_request_side_details() {
        let request = Request::<()>::get("https://example.test/page")
            .unwrap()
            .with_meta_value("from", serde_json::json!("seed"));
        let response = Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"caf\xc3\xa9"),
            request,
        );

        assert_eq!(response.text(), "café");
        assert_eq!(response.body().len(), 5);
        assert_eq!(response.url().path(), "/page");
        assert_eq!(response.method(), &Method::GET);
        assert_eq!(response.meta()["from"], "seed");
    }
}
