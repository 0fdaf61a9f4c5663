//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use tempfile::TempDir;
use tokio::sync::Notify;

use offsync::adapters::{ManualConnectivity, Network, RetryScheduler};
use offsync::config::ResolvedConfig;
use offsync::core::{Adapters, OfflineWorker};
use offsync::domain::{HttpRequest, HttpResponse, LibraryEntry, RetryIntent};

pub const SEARCH_URL: &str = "https://search.example.com/";
pub const API_URL: &str = "https://app.example.com/api";
pub const ASSET_PATTERN: &str = "https://assets.example.com/a/*.json";

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// Network that records every request and answers from a closure
pub struct FakeNetwork {
    calls: Mutex<Vec<HttpRequest>>,
    responder: Responder,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeNetwork {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            gate: None,
        }
    }

    /// Every request answered with 200 and `body`
    pub fn ok_with(body: &'static str) -> Self {
        Self::new(move |_| Ok(HttpResponse::ok().with_body(body)))
    }

    /// Each request signals `started`, then waits for `release`
    pub fn gated(mut self, started: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((started, release));
        self
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }

        (self.responder)(request)
    }
}

/// Scheduler that only remembers what was registered
#[derive(Default)]
pub struct RecordingScheduler {
    intents: Mutex<Vec<RetryIntent>>,
}

impl RecordingScheduler {
    pub fn intents(&self) -> Vec<RetryIntent> {
        self.intents.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetryScheduler for RecordingScheduler {
    async fn register(&self, intent: RetryIntent) -> Result<()> {
        self.intents.lock().unwrap().push(intent);
        Ok(())
    }
}

pub struct Harness {
    pub worker: OfflineWorker,
    pub network: Arc<FakeNetwork>,
    pub connectivity: Arc<ManualConnectivity>,
    pub scheduler: Arc<RecordingScheduler>,
    pub config: ResolvedConfig,
    pub home: TempDir,
}

pub fn test_config(home: &TempDir) -> ResolvedConfig {
    let mut config = ResolvedConfig::with_home(home.path().to_path_buf()).unwrap();
    config.endpoints.search_url = Url::parse(SEARCH_URL).unwrap();
    config.endpoints.api_url = Url::parse(API_URL).unwrap();
    config.assets.patterns = vec![ASSET_PATTERN.to_string()];
    config
}

pub async fn harness(network: FakeNetwork) -> Harness {
    let home = TempDir::new().unwrap();
    let config = test_config(&home);
    harness_with(network, config, home).await
}

pub async fn harness_with(network: FakeNetwork, config: ResolvedConfig, home: TempDir) -> Harness {
    let network = Arc::new(network);
    let connectivity = Arc::new(ManualConnectivity::new(true));
    let scheduler = Arc::new(RecordingScheduler::default());

    let adapters = Adapters {
        network: network.clone(),
        connectivity: connectivity.clone(),
        scheduler: scheduler.clone(),
    };
    let worker = OfflineWorker::open(&config, adapters).await.unwrap();

    Harness {
        worker,
        network,
        connectivity,
        scheduler,
        config,
        home,
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn entry(cursor: &str) -> LibraryEntry {
    LibraryEntry {
        cursor: cursor.to_string(),
        lottie_url: format!("https://lottie.host/{}.lottie", cursor),
        json_url: format!("https://assets.example.com/a/{}.json", cursor),
        created_by_first_name: "Ana".to_string(),
    }
}

pub fn save_request(cursor: &str) -> HttpRequest {
    HttpRequest::post(url(API_URL), Vec::new())
        .with_json(&entry(cursor))
        .unwrap()
}

pub fn remove_request(cursor: &str) -> HttpRequest {
    HttpRequest::delete(url(&format!("{}/{}", API_URL, cursor)))
}

pub fn search_request(body: &str) -> HttpRequest {
    HttpRequest::post(url(SEARCH_URL), body).with_header("Content-Type", "application/json")
}
