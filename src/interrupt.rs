//! Ctrl-C hook.
//!
//! The engine never installs a signal handler of its own. Callers that want
//! an interrupted crawl to stop cleanly register a callback here, typically
//! one that cancels [`Crawler::shutdown_token`](crate::Crawler::shutdown_token).
//!
//! ```rust,ignore
//! let token = crawler.shutdown_token();
//! let _done = interrupt::on_interrupt(move || token.cancel());
//! let stats = crawler.start_crawl().await?;
//! ```

use std::future::Future;
use std::io;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Runs `callback` on the first Ctrl-C. The receiver resolves once the
/// callback has returned, and errors if listening for the signal failed.
pub fn on_interrupt<F>(callback: F) -> oneshot::Receiver<()>
where
    F: FnOnce() + Send + 'static,
{
    on_signal(tokio::signal::ctrl_c(), callback)
}

/// Runs `callback` once `signal` resolves successfully.
pub fn on_signal<S, F>(signal: S, callback: F) -> oneshot::Receiver<()>
where
    S: Future<Output = io::Result<()>> + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("Interrupt received, running shutdown hook");
                callback();
                let _ = tx.send(());
            }
            Err(e) => warn!("Could not listen for the interrupt signal: {}", e),
        }
    });
    rx
}
