//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use proxyflow_db::{
    Allocation, AllocationResolver, AnalyticsSink, DbErr, StoreError, UsageAccounting,
    UsageRecord,
};
use proxyflow_gateway::http::read_request_head;
use proxyflow_gateway::{ConnectionHandler, HandlerConfig};
use proxyflow_telemetry::UsageTracker;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const USERNAME: &str = "alice";
pub const API_KEY: &str = "pk_abc123";
pub const VIRTUAL_PORT: u32 = 10001;
pub const TARGET: &str = "example.com:443";

/// Resolver backed by a fixed list of allocations
pub struct StaticResolver {
    allocations: Vec<Allocation>,
}

impl StaticResolver {
    pub fn new(allocations: Vec<Allocation>) -> Arc<Self> {
        Arc::new(Self { allocations })
    }
}

#[async_trait]
impl AllocationResolver for StaticResolver {
    async fn resolve(
        &self,
        username: &str,
        api_key: &str,
        virtual_port: u32,
    ) -> Result<Option<Allocation>, StoreError> {
        Ok(self
            .allocations
            .iter()
            .find(|a| {
                a.username == username && a.api_key == api_key && a.virtual_port == virtual_port
            })
            .cloned())
    }
}

/// Resolver whose backing store is down
pub struct FailingResolver;

#[async_trait]
impl AllocationResolver for FailingResolver {
    async fn resolve(
        &self,
        _username: &str,
        _api_key: &str,
        _virtual_port: u32,
    ) -> Result<Option<Allocation>, StoreError> {
        Err(StoreError::Database(DbErr::Custom(
            "connection refused (db.internal:5432)".to_string(),
        )))
    }
}

#[derive(Default)]
pub struct RecordingAnalytics {
    pub batches: Mutex<Vec<Vec<UsageRecord>>>,
}

impl RecordingAnalytics {
    pub fn records(&self) -> Vec<UsageRecord> {
        self.batches.lock().unwrap().concat()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingAnalytics {
    async fn insert_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAccounting {
    pub updates: Mutex<Vec<(i32, u64)>>,
}

#[async_trait]
impl UsageAccounting for RecordingAccounting {
    async fn increment_usage(&self, owner_id: i32, bytes: u64) -> Result<(), StoreError> {
        self.updates.lock().unwrap().push((owner_id, bytes));
        Ok(())
    }
}

/// Handler wired to recording sinks
pub struct Harness {
    pub handler: Arc<ConnectionHandler>,
    pub tracker: Arc<UsageTracker>,
    pub analytics: Arc<RecordingAnalytics>,
    pub accounting: Arc<RecordingAccounting>,
}

pub fn harness(resolver: Arc<dyn AllocationResolver>, config: HandlerConfig) -> Harness {
    let analytics = Arc::new(RecordingAnalytics::default());
    let accounting = Arc::new(RecordingAccounting::default());
    // No timer: tests flush explicitly
    let tracker = UsageTracker::new(analytics.clone(), accounting.clone(), Duration::ZERO);
    let handler = Arc::new(ConnectionHandler::new(resolver, tracker.clone(), config));

    Harness {
        handler,
        tracker,
        analytics,
        accounting,
    }
}

pub fn test_config() -> HandlerConfig {
    HandlerConfig {
        handshake_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
    }
}

pub fn allocation(upstream: SocketAddr) -> Allocation {
    Allocation {
        owner_id: 1,
        username: USERNAME.to_string(),
        api_key: API_KEY.to_string(),
        virtual_port: VIRTUAL_PORT,
        upstream_id: 7,
        upstream_host: upstream.ip().to_string(),
        upstream_port: upstream.port(),
        upstream_type: "residential".to_string(),
        upstream_country: "US".to_string(),
        upstream_username: None,
        upstream_password: None,
    }
}

pub fn connect_head(target: &str, user: &str, key: &str) -> String {
    format!(
        "CONNECT {} HTTP/1.1\r\nHost: {}\r\nProxy-Authorization: {}\r\n\r\n",
        target,
        target,
        proxyflow_auth::encode_basic(user, key)
    )
}

pub fn valid_connect_head() -> String {
    connect_head(
        TARGET,
        &format!("{}_{}", USERNAME, VIRTUAL_PORT),
        API_KEY,
    )
}

/// Serve exactly one connection with `handler`
pub async fn spawn_gateway_once(handler: Arc<ConnectionHandler>) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        handler.handle(stream, peer_addr).await;
    });

    (addr, task)
}

/// What the mock upstream proxy does after reading the CONNECT head
#[derive(Clone)]
pub enum UpstreamBehavior {
    /// Answer 200 (plus `banner` in the same write), read the client's
    /// bytes to EOF, then send `reply` and close
    Accept { banner: Vec<u8>, reply: Vec<u8> },
    /// Answer with this status line and close
    Reject { status: &'static str },
    /// Close without answering
    HangUp,
    /// Answer with these raw bytes and close
    Garbage { raw: &'static [u8] },
}

/// What the mock upstream observed
pub struct UpstreamSession {
    pub head: proxyflow_gateway::http::RequestHead,
    pub received: Vec<u8>,
}

/// A single-connection upstream proxy
pub async fn spawn_upstream(
    behavior: UpstreamBehavior,
) -> (SocketAddr, JoinHandle<UpstreamSession>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let head = read_request_head(&mut stream).await.unwrap();

        let mut received = Vec::new();
        match behavior {
            UpstreamBehavior::Accept { banner, reply } => {
                let mut response = b"HTTP/1.1 200 Connection established\r\n\r\n".to_vec();
                response.extend_from_slice(&banner);
                stream.get_mut().write_all(&response).await.unwrap();

                stream.read_to_end(&mut received).await.unwrap();

                stream.get_mut().write_all(&reply).await.unwrap();
                stream.get_mut().shutdown().await.unwrap();
            }
            UpstreamBehavior::Reject { status } => {
                let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status);
                stream.get_mut().write_all(response.as_bytes()).await.unwrap();
            }
            UpstreamBehavior::HangUp => {
                stream.get_mut().shutdown().await.unwrap();
            }
            UpstreamBehavior::Garbage { raw } => {
                stream.get_mut().write_all(raw).await.unwrap();
                stream.get_mut().shutdown().await.unwrap();
            }
        }

        UpstreamSession { head, received }
    });

    (addr, task)
}

/// An address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Send `request` and read everything the gateway sends before closing
pub async fn request_and_read_all(addr: SocketAddr, request: &[u8]) -> String {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(request).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .expect("gateway should close the connection")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
