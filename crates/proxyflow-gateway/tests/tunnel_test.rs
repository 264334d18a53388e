//! Integration tests for the relay over real TCP sockets

mod common;

use common::payload;
use proxyflow_gateway::relay;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Connected (local, remote) socket pair
async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (connected.unwrap(), accepted.unwrap().0)
}

/// Test 1: Client finishes sending first, upstream answers afterwards
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_finishes_first() {
    let (mut client, client_side) = tcp_pair().await;
    let (upstream_side, mut upstream) = tcp_pair().await;

    let tunnel = tokio::spawn(relay(client_side, upstream_side));

    let sent_up = payload(100_000, 3);
    let sent_down = payload(70_000, 4);

    let upstream_task = {
        let sent_down = sent_down.clone();
        tokio::spawn(async move {
            let mut received = Vec::new();
            upstream.read_to_end(&mut received).await.unwrap();
            upstream.write_all(&sent_down).await.unwrap();
            upstream.shutdown().await.unwrap();
            received
        })
    };

    client.write_all(&sent_up).await.unwrap();
    client.shutdown().await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();

    assert_eq!(upstream_task.await.unwrap(), sent_up);
    assert_eq!(received, sent_down);

    let result = tunnel.await.unwrap();
    assert_eq!(result.bytes_up, 100_000);
    assert_eq!(result.bytes_down, 70_000);
}

/// Test 2: Upstream finishes first; the client keeps sending after the
/// download direction has closed
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_finishes_first() {
    let (mut client, client_side) = tcp_pair().await;
    let (upstream_side, mut upstream) = tcp_pair().await;

    let tunnel = tokio::spawn(relay(client_side, upstream_side));

    let sent_down = payload(4096, 5);
    let sent_up = payload(9000, 6);

    let upstream_task = {
        let sent_down = sent_down.clone();
        tokio::spawn(async move {
            upstream.write_all(&sent_down).await.unwrap();
            upstream.shutdown().await.unwrap();

            let mut received = Vec::new();
            upstream.read_to_end(&mut received).await.unwrap();
            received
        })
    };

    // Drain the whole download before sending anything
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, sent_down);

    client.write_all(&sent_up).await.unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(upstream_task.await.unwrap(), sent_up);

    let result = tunnel.await.unwrap();
    assert_eq!(result.bytes_up, 9000);
    assert_eq!(result.bytes_down, 4096);
}

/// Test 3: An empty tunnel still completes
#[tokio::test]
async fn test_empty_tunnel() {
    let (client, client_side) = tcp_pair().await;
    let (upstream_side, upstream) = tcp_pair().await;

    let tunnel = tokio::spawn(relay(client_side, upstream_side));
    drop(client);
    drop(upstream);

    let result = tokio::time::timeout(Duration::from_secs(5), tunnel)
        .await
        .expect("relay should finish")
        .unwrap();
    assert_eq!(result.bytes_up, 0);
    assert_eq!(result.bytes_down, 0);
}

/// Test 4: A peer vanishing mid-stream ends the tunnel without an error
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_disconnect_mid_stream() {
    let (mut client, client_side) = tcp_pair().await;
    let (upstream_side, mut upstream) = tcp_pair().await;

    let tunnel = tokio::spawn(relay(client_side, upstream_side));

    client.write_all(b"partial request").await.unwrap();
    let mut buf = [0u8; 15];
    upstream.read_exact(&mut buf).await.unwrap();
    drop(upstream);

    // The gateway notices the upstream is gone and closes towards the client
    let mut rest = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest)).await;
    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(5), tunnel)
        .await
        .expect("relay should finish")
        .unwrap();
    assert_eq!(result.bytes_up, 15);
    assert_eq!(result.bytes_down, 0);
}
