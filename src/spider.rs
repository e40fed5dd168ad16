//! # Spider Module
//!
//! Defines the [`Parser`] trait and the [`CrawlContext`] handle that parsers
//! use to talk back to the engine.
//!
//! ## Overview
//!
//! A crawl is driven entirely by parsers. Each request names the parser that
//! will handle its response; the parser reads the response, then submits
//! follow-up requests (each with its own parser) and pushes extracted items
//! to the output sink. The crawl ends when no parser is running and nothing
//! is left to fetch.
//!
//! Any `async fn` or closure taking `(Response<I>, CrawlContext<I>)` is a
//! parser. Stateful parsers implement the trait directly.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! async fn parse_index(response: Response<String>, ctx: CrawlContext<String>) {
//!     for link in extract_links(&response.text()) {
//!         let _ = ctx.request(&link, parse_article, None).await;
//!     }
//! }
//!
//! async fn parse_article(response: Response<String>, ctx: CrawlContext<String>) {
//!     ctx.push(response.text()).await;
//! }
//! ```

use crate::crawler::ItemSink;
use crate::error::SpiderError;
use crate::request::{Meta, Request};
use crate::response::Response;
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use url::Url;

/// Handles the response to a request.
#[async_trait]
pub trait Parser<I>: Send + Sync + 'static {
    async fn parse(&self, response: Response<I>, ctx: CrawlContext<I>);
}

#[async_trait]
impl<I, F, Fut> Parser<I> for F
where
    I: Send + 'static,
    F: Fn(Response<I>, CrawlContext<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn parse(&self, response: Response<I>, ctx: CrawlContext<I>) {
        (self)(response, ctx).await
    }
}

/// A parser's view of the running crawl.
///
/// Cheap to clone; every clone talks to the same scheduler and sink.
pub struct CrawlContext<I> {
    scheduler: Arc<Scheduler<I>>,
    sink: ItemSink<I>,
}

impl<I> Clone for CrawlContext<I> {
    fn clone(&self) -> Self {
        CrawlContext {
            scheduler: Arc::clone(&self.scheduler),
            sink: self.sink.clone(),
        }
    }
}

impl<I: Send + 'static> CrawlContext<I> {
    pub(crate) fn new(scheduler: Arc<Scheduler<I>>, sink: ItemSink<I>) -> Self {
        CrawlContext { scheduler, sink }
    }

    /// Submits a GET request for `url`.
    ///
    /// Returns whether the request was admitted. A URL that does not parse is
    /// counted as intercepted like any other invalid request.
    pub async fn request<P>(&self, url: &str, parser: P, meta: Option<Meta>) -> Result<bool, SpiderError>
    where
        P: Parser<I>,
    {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                self.scheduler.reject_unparsable(url, &e);
                return Ok(false);
            }
        };

        let request = Request::new(reqwest::Method::GET, url)
            .with_parser(parser)
            .with_meta(meta.unwrap_or_default());
        self.scheduler.admit(request).await
    }

    /// Submits a fully built `reqwest::Request` (method, headers and body kept).
    pub async fn native_request<P>(
        &self,
        native: reqwest::Request,
        parser: P,
        meta: Option<Meta>,
    ) -> Result<bool, SpiderError>
    where
        P: Parser<I>,
    {
        let request = Request::from_native(native)
            .with_parser(parser)
            .with_meta(meta.unwrap_or_default());
        self.scheduler.admit(request).await
    }

    /// Submits a request built by hand.
    pub async fn submit(&self, request: Request<I>) -> Result<bool, SpiderError> {
        self.scheduler.admit(request).await
    }

    /// Pushes an extracted item to the output sink.
    pub async fn push(&self, item: I) {
        self.sink.push(item).await
    }

    /// Streams items out of the output sink until it closes.
    pub fn drain(&self) -> BoxStream<'static, I> {
        self.sink.drain()
    }
}
