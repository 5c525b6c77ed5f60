mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use common::Harness;
use scrape_core::{
    config::models::{RateLimit, RateLimits},
    models::{ScraperType, TaskStatus},
    traits::{FnScraper, Scraper, ScraperError},
    ScrapeOutcome,
};
use scrape_dispatcher::CreateTaskRequest;
use scrape_infrastructure::StoredResult;

fn request(scraper_name: &str, data: Value) -> CreateTaskRequest {
    CreateTaskRequest {
        scraper_name: scraper_name.to_string(),
        data,
        metadata: None,
        task_name: None,
        is_sync: false,
    }
}

/// 记录同时运行的最大并发数
struct ConcurrencyProbe {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_browser_rate_limit_bounds_concurrency() {
    let probe = Arc::new(ConcurrencyProbe {
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let scraper_probe = probe.clone();
    let scraper: Arc<dyn Scraper> = Arc::new(FnScraper::new("screenshot", ScraperType::Browser, move |data, _, _| {
        scraper_probe.enter();
        std::thread::sleep(Duration::from_millis(50));
        scraper_probe.exit();
        Ok(json!([{"page": data["page"]}]))
    }));

    let harness = Harness::new(vec![scraper]).await;
    for page in 0..5 {
        harness.service.create(request("screenshot", json!({"page": page}))).await.unwrap();
    }

    let executor = harness.executor(RateLimits {
        browser: RateLimit::Bounded(2),
        ..RateLimits::default()
    });

    // 不等待已启动的任务，持续准入
    let mut handles = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        handles.extend(executor.tick(ScraperType::Browser).await.unwrap());
        assert!(executor.capacity().current(ScraperType::Browser) <= 2);

        let tasks = harness.all_tasks().await;
        let in_progress = tasks.iter().filter(|t| t.status == TaskStatus::InProgress).count();
        assert!(in_progress <= 2, "{in_progress} tasks in progress");
        if tasks.iter().all(|t| t.is_terminal()) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(executor.capacity().current(ScraperType::Browser), 0);
    let tasks = harness.all_tasks().await;
    assert_eq!(tasks.len(), 5);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed && t.result_count == 1));
}

#[tokio::test]
async fn test_scraper_errors_and_panics_fail_the_task() {
    let failing: Arc<dyn Scraper> = Arc::new(FnScraper::new("fails", ScraperType::Request, |_, _, _| {
        Err(ScraperError::new("timeout").with_trace("at fetch()"))
    }));
    let panicking: Arc<dyn Scraper> = Arc::new(FnScraper::new("panics", ScraperType::Request, |_, _, _| {
        panic!("index out of bounds")
    }));
    let harness = Harness::new(vec![failing, panicking]).await;

    let failed = harness.service.create(request("fails", json!(1))).await.unwrap();
    let panicked = harness.service.create(request("panics", json!(2))).await.unwrap();
    let executor = harness.executor(RateLimits::default());
    harness.drain(&executor, ScraperType::Request).await;

    let failed = harness.task(failed[0].id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.result_count, 0);
    assert_eq!(
        harness.results.read(failed.id).await,
        Some(StoredResult::Trace("timeout\nat fetch()".to_string()))
    );

    let panicked = harness.task(panicked[0].id).await;
    assert_eq!(panicked.status, TaskStatus::Failed);
    match harness.results.read(panicked.id).await {
        Some(StoredResult::Trace(trace)) => assert!(trace.contains("index out of bounds")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_abort_while_running_discards_result() {
    let scraper: Arc<dyn Scraper> = Arc::new(FnScraper::new("slow", ScraperType::Request, |_, _, _| {
        std::thread::sleep(Duration::from_millis(200));
        Ok(json!([{"late": true}]))
    }));
    let harness = Harness::new(vec![scraper]).await;
    let created = harness.service.create(request("slow", json!({}))).await.unwrap();
    let executor = harness.executor(RateLimits::default());

    let handles = executor.tick(ScraperType::Request).await.unwrap();
    assert_eq!(handles.len(), 1);
    assert!(harness.service.abort(created[0].id).await.unwrap());
    for handle in handles {
        handle.await.unwrap();
    }

    let task = harness.task(created[0].id).await;
    assert_eq!(task.status, TaskStatus::Aborted);
    assert_eq!(task.result_count, 0);
    assert!(!harness.results.exists(task.id).await);
    assert_eq!(executor.capacity().current(ScraperType::Request), 0);
}

#[tokio::test]
async fn test_finalizing_a_finished_task_keeps_its_result() {
    let noop: Arc<dyn Scraper> = Arc::new(FnScraper::new("noop", ScraperType::Task, |_, _, _| Ok(Value::Null)));
    let harness = Harness::new(vec![noop]).await;
    harness.service.create(request("noop", json!({}))).await.unwrap();
    let task = harness.repo.claim_pending(ScraperType::Task, None).await.unwrap().remove(0);

    let first = vec![json!({"n": 1})];
    assert!(harness
        .finalizer
        .finalize(&task, ScrapeOutcome::Success(first.clone()))
        .await
        .unwrap());
    assert!(!harness
        .finalizer
        .finalize(&task, ScrapeOutcome::Failure("again".to_string()))
        .await
        .unwrap());

    let stored = harness.task(task.id).await;
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result_count, 1);
    assert_eq!(harness.results.read(task.id).await, Some(StoredResult::Records(first)));
}

#[tokio::test]
async fn test_identical_submission_hits_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let scraper: Arc<dyn Scraper> = Arc::new(
        FnScraper::new("search", ScraperType::Request, move |data, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!([{"q": data["q"], "rank": 1}]))
        })
        .with_cache(true),
    );
    let harness = Harness::new(vec![scraper]).await;
    let executor = harness.executor(RateLimits::default());

    let first = harness.service.create(request("search", json!({"q": "rust"}))).await.unwrap();
    assert_eq!(first[0].status, TaskStatus::Pending);
    harness.drain(&executor, ScraperType::Request).await;

    let second = harness.service.create(request("search", json!({"q": "rust"}))).await.unwrap();
    assert_eq!(second[0].status, TaskStatus::Completed);
    assert_eq!(second[0].result_count, 1);
    harness.drain(&executor, ScraperType::Request).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.results.read_records(first[0].id).await,
        harness.results.read_records(second[0].id).await
    );
}

#[tokio::test]
async fn test_sync_submission_waits_for_completion() {
    let scraper: Arc<dyn Scraper> = Arc::new(FnScraper::new("echo", ScraperType::Task, |data, meta, _| {
        Ok(json!({"data": data, "meta": meta}))
    }));
    let harness = Harness::new(vec![scraper]).await;
    let executor = harness.executor(RateLimits::default());
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let loops = executor.start(&[ScraperType::Task], &shutdown_tx);

    let mut req = request("echo", json!({"x": 1}));
    req.is_sync = true;
    req.metadata = Some(json!({"token": "t"}));
    let created = harness.service.create(req).await.unwrap();
    let finished = harness.service.wait_for_terminal(created[0].id).await.unwrap();

    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(
        harness.service.all_results(finished.id).await,
        vec![json!({"data": {"x": 1}, "meta": {"token": "t"}})]
    );

    shutdown_tx.send(()).unwrap();
    for handle in loops {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_unknown_scraper_is_rejected() {
    let harness = Harness::new(Vec::new()).await;
    let err = harness.service.create(request("missing", json!(null))).await.unwrap_err();
    assert!(matches!(err, scrape_core::SchedulerError::ScraperNotFound { .. }));
}
