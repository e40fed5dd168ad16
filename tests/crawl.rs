//! End-to-end crawls against a mock HTTP server.
//!
//! Covers: chained parsers, deduplication, retry exhaustion, the domain
//! allow-list, delivered error statuses, the counter identities over a mixed
//! crawl, download backpressure from slow parsers, idle shutdown with no
//! seeds, and external cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use spider_engine::prelude::*;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn builder<I: Send + 'static>() -> CrawlerBuilder<I> {
    init_tracing();
    CrawlerBuilder::new()
        .heartbeat(Duration::from_millis(20))
        .max_idle(3)
        .connect_timeout(Duration::from_secs(1))
        .read_write_timeout(Duration::from_secs(2))
        .max_concurrent_downloads(8)
        .max_concurrent_parsers(8)
}

async fn run<I: Send + 'static>(crawler: Crawler<I>) -> anyhow::Result<Arc<CrawlStats>> {
    let stats = tokio::time::timeout(Duration::from_secs(10), crawler.start_crawl()).await??;
    Ok(stats)
}

fn collect<I: Send + 'static>(ctx: &CrawlContext<I>) -> JoinHandle<Vec<I>> {
    tokio::spawn(ctx.drain().collect::<Vec<I>>())
}

async fn items<I>(consumer: JoinHandle<Vec<I>>) -> anyhow::Result<Vec<I>> {
    Ok(tokio::time::timeout(Duration::from_secs(5), consumer).await??)
}

fn assert_identities(stats: &CrawlStats) {
    assert_eq!(stats.called(), stats.intercepted() + stats.accepted());
    assert_eq!(stats.accepted(), stats.failed() + stats.completed());
}

/// Follows every line of the body as a relative link and records the path.
struct FollowLinks;

#[async_trait]
impl Parser<String> for FollowLinks {
    async fn parse(&self, response: Response<String>, ctx: CrawlContext<String>) {
        ctx.push(response.url().path().to_string()).await;
        for line in response.text().lines().filter(|l| !l.trim().is_empty()) {
            let next = response.url().join(line.trim()).unwrap();
            ctx.request(next.as_str(), FollowLinks, None).await.unwrap();
        }
    }
}

async fn parse_x(response: Response<String>, ctx: CrawlContext<String>) {
    ctx.push(format!("X at {}", response.url().path())).await;
    let next = response.url().join(response.text().trim()).unwrap();
    let mut meta = Meta::new();
    meta.insert("from".into(), serde_json::json!(response.url().path()));
    ctx.request(next.as_str(), parse_y, Some(meta)).await.unwrap();
}

async fn parse_y(response: Response<String>, ctx: CrawlContext<String>) {
    let from = response.meta()["from"].as_str().unwrap_or_default().to_string();
    ctx.push(format!("{} -> {}", from, response.text())).await;
}

async fn record_status(response: Response<u16>, ctx: CrawlContext<u16>) {
    ctx.push(response.status().as_u16()).await;
}

async fn slow_record_status(response: Response<u16>, ctx: CrawlContext<u16>) {
    tokio::time::sleep(Duration::from_millis(40)).await;
    ctx.push(response.status().as_u16()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_page_chain() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("/y"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .respond_with(ResponseTemplate::new(200).set_body_string("leaf"))
        .expect(1)
        .mount(&server)
        .await;

    let crawler = builder::<String>().build()?;
    let ctx = crawler.context();
    assert!(ctx.request(&format!("{}/x", server.uri()), parse_x, None).await?);
    let consumer = collect(&ctx);

    let stats = run(crawler).await?;
    assert_eq!(stats.called(), 2);
    assert_eq!(stats.accepted(), 2);
    assert_eq!(stats.completed(), 2);
    assert_eq!(stats.failed(), 0);
    assert_identities(&stats);

    let mut pushed = items(consumer).await?;
    pushed.sort();
    assert_eq!(pushed, vec!["/x -> leaf".to_string(), "X at /x".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_seed_is_fetched_once() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let crawler = builder::<u16>().build()?;
    let ctx = crawler.context();
    let url = format!("{}/page", server.uri());
    let mut meta = Meta::new();
    meta.insert("attempt".into(), serde_json::json!(2));
    assert!(ctx.request(&url, record_status, None).await?);
    assert!(!ctx.request(&url, record_status, Some(meta)).await?);
    let consumer = collect(&ctx);

    let stats = run(crawler).await?;
    assert_eq!(stats.called(), 2);
    assert_eq!(stats.accepted(), 1);
    assert_eq!(stats.intercepted(), 1);
    assert_eq!(stats.completed(), 1);
    assert_identities(&stats);
    assert_eq!(items(consumer).await?, vec![200]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn always_failing_page_is_attempted_max_retry_times() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let crawler = builder::<u16>().max_retry(3).build()?;
    let ctx = crawler.context();
    ctx.request(&format!("{}/down", server.uri()), record_status, None).await?;
    let consumer = collect(&ctx);

    let stats = run(crawler).await?;
    assert_eq!(stats.accepted(), 1);
    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.completed(), 0);
    assert_eq!(stats.retried(), 2);
    assert_identities(&stats);
    assert!(items(consumer).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn error_statuses_outside_the_retry_set_reach_the_parser() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/limited"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let crawler = builder::<u16>().build()?;
    let ctx = crawler.context();
    ctx.request(&format!("{}/gone", server.uri()), record_status, None).await?;
    ctx.request(&format!("{}/limited", server.uri()), record_status, None).await?;
    let consumer = collect(&ctx);

    let stats = run(crawler).await?;
    assert_eq!(stats.completed(), 2);
    assert_eq!(stats.failed(), 0);
    let mut statuses = items(consumer).await?;
    statuses.sort_unstable();
    assert_eq!(statuses, vec![404, 429]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn allow_list_filters_other_hosts() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/in"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/out"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let port = server.address().port();
    let crawler = builder::<u16>().allowed_domains(["127.0.0.1"]).build()?;
    let ctx = crawler.context();
    assert!(ctx.request(&format!("http://127.0.0.1:{}/in", port), record_status, None).await?);
    assert!(!ctx.request(&format!("http://localhost:{}/out", port), record_status, None).await?);
    assert!(!ctx.request("mailto:someone@127.0.0.1", record_status, None).await?);

    let stats = run(crawler).await?;
    assert_eq!(stats.called(), 3);
    assert_eq!(stats.intercepted(), 2);
    assert_eq!(stats.completed(), 1);
    assert_identities(&stats);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_site_keeps_the_counter_identities() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let page = |route: &'static str, body: &'static str| {
        Mock::given(path(route)).respond_with(ResponseTemplate::new(200).set_body_string(body))
    };
    page("/", "/a\n/b\n/broken\n").expect(1).mount(&server).await;
    page("/a", "/\n/b\n").expect(1).mount(&server).await;
    page("/b", "/a\n").expect(1).mount(&server).await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let crawler = builder::<String>().max_retry(2).build()?;
    let ctx = crawler.context();
    ctx.request(&format!("{}/", server.uri()), FollowLinks, None).await?;
    let consumer = collect(&ctx);

    let stats = run(crawler).await?;
    assert_eq!(stats.called(), 7);
    assert_eq!(stats.accepted(), 4);
    assert_eq!(stats.intercepted(), 3);
    assert_eq!(stats.completed(), 3);
    assert_eq!(stats.failed(), 1);
    assert_identities(&stats);

    let mut visited = items(consumer).await?;
    visited.sort();
    assert_eq!(visited, vec!["/", "/a", "/b"]);

    let json: serde_json::Value = serde_json::from_str(&stats.to_json_string()?)?;
    assert_eq!(json["response_status_counts"]["500"], 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_parsers_hold_back_new_downloads() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(20)
        .mount(&server)
        .await;

    let crawler = builder::<u16>()
        .max_concurrent_downloads(1)
        .max_concurrent_parsers(1)
        .response_queue_capacity(1)
        .max_pending_pushes(1)
        .build()?;
    let ctx = crawler.context();
    for n in 0..20 {
        ctx.request(&format!("{}/page/{}", server.uri(), n), slow_record_status, None).await?;
    }
    let consumer = collect(&ctx);

    let live = crawler.stats();
    let peak = Arc::new(AtomicUsize::new(0));
    let sampler = tokio::spawn({
        let peak = Arc::clone(&peak);
        async move {
            loop {
                peak.fetch_max(live.downloader.in_flight(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    });

    let stats = run(crawler).await?;
    sampler.abort();

    // One download on the network plus one waiting to hand over its response.
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 2, "download stage peaked at {} in flight", peak);
    assert_eq!(stats.completed(), 20);
    assert_eq!(stats.dispatcher.completed(), 20);
    assert_eq!(items(consumer).await?.len(), 20);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crawl_without_seeds_ends_on_its_own() -> anyhow::Result<()> {
    let crawler = builder::<()>().build()?;
    let consumer = collect(&crawler.context());

    let started = Instant::now();
    let stats = run(crawler).await?;
    // 3 idle heartbeats of 20ms each, with generous slack for slow CI.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stats.called(), 0);
    assert!(items(consumer).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_the_token_stops_the_crawl() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    // Idle detection alone would take far longer than the test allows.
    let crawler = builder::<u16>().max_idle(10_000).build()?;
    let ctx = crawler.context();
    ctx.request(&format!("{}/slow", server.uri()), record_status, None).await?;

    let token = crawler.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let stats = run(crawler).await?;
    assert_eq!(stats.called(), 1);
    assert_eq!(stats.accepted(), 1);
    Ok(())
}
