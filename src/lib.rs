//! # spider-engine
//!
//! A concurrent crawl engine: admission with bloom-filter dedup and domain
//! filtering, bounded per-request retries, parser dispatch, an item output
//! sink, and shutdown once the crawl goes quiet.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//! use futures_util::StreamExt;
//!
//! async fn parse(response: Response<String>, ctx: CrawlContext<String>) {
//!     ctx.push(response.url().to_string()).await;
//! }
//!
//! async fn run() -> Result<(), SpiderError> {
//!     let crawler = CrawlerBuilder::<String>::new()
//!         .allowed_domains(["example.com"])
//!         .build()?;
//!
//!     let ctx = crawler.context();
//!     ctx.request("https://example.com/", parse, None).await?;
//!
//!     let consumer = tokio::spawn(ctx.drain().for_each(|url| async move { println!("{url}") }));
//!     let stats = crawler.start_crawl().await?;
//!     consumer.await.ok();
//!     println!("{}", stats.to_json_string_pretty()?);
//!     Ok(())
//! }
//! ```

pub mod bloom_filter;
pub mod builder;
pub mod concurrency;
pub mod crawler;
pub mod error;
pub mod interrupt;
pub mod prelude;
pub mod queue;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod spider;
pub mod state;
pub mod stats;

pub use builder::{CrawlerBuilder, CrawlerConfig};
pub use crawler::Crawler;
pub use error::SpiderError;
pub use request::{Fingerprint, Meta, Request};
pub use response::Response;
pub use scheduler::Scheduler;
pub use spider::{CrawlContext, Parser};
pub use stats::CrawlStats;

pub use async_trait::async_trait;
pub use tokio;
pub use tokio_util::sync::CancellationToken;
