//! # Crawler Module
//!
//! Implements the engine that drives a crawl from seed requests to
//! quiescence.
//!
//! ## Key Components
//!
//! - **Crawler**: owns the stages and runs the dispatch loop and idle monitors
//! - **Downloader**: performs fetch attempts and decides on retries
//! - **dispatch_response**: hands fetched responses to their parsers
//! - **ItemSink**: bounded output queue that parsers push items into
//! - **IdleMonitor**: debounced quiescence detection
//!
//! ## Architecture
//!
//! Stages communicate through bounded queues. Only the dispatch loop reads
//! the two stage queues, and it takes work from a stage only when that stage
//! has a free concurrency slot. Each job runs in its own Tokio task, holding
//! an in-flight guard until its result has been handed on, so the monitors
//! can tell "nothing queued and nothing running" apart from a stage that is
//! merely between jobs.

mod core;
mod item_sink;
pub mod monitor;
pub mod request_handler;
mod response_parser;

pub use self::core::Crawler;
pub use item_sink::{ItemSink, WeakItemSink};
pub use monitor::{IdleCounter, IdleMonitor};
pub use request_handler::{Downloader, FetchError, FetchResult, RetryDecision, RetryMonitor};
pub use response_parser::dispatch_response;
