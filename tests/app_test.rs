use std::time::Duration;

use axum::{extract::Path, routing::get, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use scrape_core::{config::models::NodeConfig, AppConfig, ScraperRegistry};
use scrape_scheduler::{scrapers::builtin_scrapers, Application, RunMode, ShutdownManager};

fn local_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = format!("sqlite://{}", dir.path().join("db").join("tasks.db").display());
    config.storage.root_dir = dir.path().join("output").display().to_string();
    config.executor.poll_interval_ms = 20;
    config.executor.sync_poll_interval_ms = 10;
    config.executor.sync_wait_timeout_seconds = 30;
    config
}

async fn registry() -> ScraperRegistry {
    let registry = ScraperRegistry::new();
    registry.register_batch(builtin_scrapers()).await;
    registry
}

struct Running {
    base_url: String,
    shutdown: ShutdownManager,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

async fn start(app: Application, listener: TcpListener) -> Running {
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = ShutdownManager::new();
    let handle = tokio::spawn(app.serve(listener, shutdown.clone()));
    Running {
        base_url,
        shutdown,
        handle,
    }
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (u16, Value) {
    let response = client.post(url).json(&body).send().await.unwrap();
    (response.status().as_u16(), response.json().await.unwrap())
}

async fn get_json(client: &reqwest::Client, url: String) -> Value {
    client.get(url).send().await.unwrap().json().await.unwrap()
}

/// 提供 `/page/{n}` 的假站点
async fn fake_site() -> String {
    let app = Router::new().route("/page/{n}", get(|Path(n): Path<u32>| async move { format!("page {n}") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_mode_end_to_end() {
    let dir = TempDir::new().unwrap();
    let client = reqwest::Client::new();

    let app = Application::new(local_config(&dir), RunMode::Local, registry().await)
        .await
        .unwrap();
    let server = start(app, TcpListener::bind("127.0.0.1:0").await.unwrap()).await;

    let health = get_json(&client, format!("{}/health", server.base_url)).await;
    assert_eq!(health["mode"], "local");

    let (status, body) = post(
        &client,
        format!("{}/api/tasks", server.base_url),
        json!({"scraper_name": "echo", "data": {"q": 1}, "metadata": {"tag": "t"}, "is_sync": true}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["tasks"][0]["status"], "COMPLETED");
    assert_eq!(body["data"]["results"], json!([{"data": {"q": 1}, "metadata": {"tag": "t"}}]));
    let echo_id = body["data"]["tasks"][0]["id"].as_i64().unwrap();

    let site = fake_site().await;
    let (status, body) = post(
        &client,
        format!("{}/api/tasks", server.base_url),
        json!({
            "scraper_name": "http_fetch",
            "data": {"urls": [format!("{site}/page/1"), format!("{site}/page/2"), format!("{site}/page/1")]},
            "is_sync": true
        }),
    )
    .await;
    assert_eq!(status, 200);
    let tasks = body["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t["status"] == "COMPLETED"));

    let results = body["data"]["results"].as_array().unwrap();
    let mut bodies: Vec<&str> = results.iter().map(|r| r["body"].as_str().unwrap()).collect();
    bodies.sort();
    assert_eq!(bodies, vec!["page 1", "page 2"]);
    assert_eq!(tasks[0]["result_count"], 2);

    server.stop().await;

    // 重启后任务与结果仍在
    let app = Application::new(local_config(&dir), RunMode::Local, registry().await)
        .await
        .unwrap();
    let server = start(app, TcpListener::bind("127.0.0.1:0").await.unwrap()).await;
    let body = get_json(&client, format!("{}/api/tasks/{echo_id}/results", server.base_url)).await;
    assert_eq!(body["data"]["total"], 1);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_master_dispatches_to_worker() {
    let dir = TempDir::new().unwrap();
    let client = reqwest::Client::new();

    let worker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let master_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let worker_url = format!("http://{}", worker_listener.local_addr().unwrap());
    let master_url = format!("http://{}", master_listener.local_addr().unwrap());

    let mut worker_config = AppConfig::default();
    worker_config.cluster.node_name = "w1".to_string();
    worker_config.cluster.master_url = Some(master_url.clone());
    let worker = Application::new(worker_config, RunMode::Worker, registry().await)
        .await
        .unwrap();
    let worker = start(worker, worker_listener).await;

    let mut master_config = local_config(&dir);
    master_config.cluster.node_name = "master".to_string();
    master_config.cluster.nodes = vec![NodeConfig {
        name: "w1".to_string(),
        url: worker_url.clone(),
    }];
    master_config.cluster.readiness_timeout_seconds = 5;
    master_config.cluster.readiness_poll_ms = 50;
    let master = Application::new(master_config, RunMode::Master, registry().await)
        .await
        .unwrap();
    let master = start(master, master_listener).await;

    let (status, body) = post(
        &client,
        format!("{master_url}/api/tasks"),
        json!({"scraper_name": "echo", "data": "ping", "is_sync": true}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["tasks"][0]["status"], "COMPLETED");
    assert_eq!(body["data"]["results"], json!([{"data": "ping", "metadata": null}]));

    let health = get_json(&client, format!("{worker_url}/health")).await;
    assert_eq!(health["mode"], "worker");
    assert_eq!(health["node_name"], "w1");

    master.stop().await;
    worker.stop().await;
}

#[tokio::test]
async fn test_master_refuses_to_start_without_ready_nodes() {
    let dir = TempDir::new().unwrap();
    let mut config = local_config(&dir);
    config.cluster.nodes = vec![NodeConfig {
        name: "w-dead".to_string(),
        url: "http://127.0.0.1:9".to_string(),
    }];
    config.cluster.readiness_timeout_seconds = 0;
    config.cluster.readiness_poll_ms = 10;

    let result = Application::new(config, RunMode::Master, registry().await).await;
    assert!(result.is_err());
}
