//! A "prelude" for users of the `spider-engine` crate.
//!
//! This prelude re-exports the most commonly used traits and types so that
//! they can be easily imported.
//!
//! # Example
//!
//! ```
//! use spider_engine::prelude::*;
//! ```

pub use crate::{
    // Core structs
    CrawlContext,
    CrawlStats,
    Crawler,
    CrawlerBuilder,
    CrawlerConfig,
    Meta,
    Request,
    Response,
    SpiderError,
    // Core traits
    Parser,
    // Essential re-exports for trait implementation
    async_trait,
};
