//! Contains the response dispatch stage of the crawler.
//!
//! A fetched response is handed to the parser attached to its request,
//! together with a [`CrawlContext`] for submitting follow-up work. No timeout
//! is put on a parser; one that never returns keeps the crawl alive. A parser
//! that panics takes down only its own task, and the caller's in-flight guard
//! is released as the task unwinds.

use crate::response::Response;
use crate::spider::CrawlContext;
use crate::state::StageCounters;
use std::sync::Arc;
use tracing::{trace, warn};

/// Runs the response's parser to completion.
pub async fn dispatch_response<I: Send + 'static>(
    response: Response<I>,
    ctx: CrawlContext<I>,
    counters: &Arc<StageCounters>,
) {
    counters.increment_called();

    let Some(parser) = response.request().parser().cloned() else {
        // Admission rejects parserless requests, so this is only reachable
        // through a hand-built response.
        warn!("Response for {} has no parser; dropping it", response.url());
        counters.increment_failed();
        return;
    };

    trace!("Parsing response from {}", response.url());
    parser.parse(response, ctx).await;
    counters.increment_completed();
}
