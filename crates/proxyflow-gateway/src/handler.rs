//! Per-connection CONNECT handshake and tunnel

use crate::error::HandshakeError;
use crate::http::{self, CONNECTION_ESTABLISHED};
use crate::tunnel;
use chrono::Utc;
use proxyflow_auth::{decode_proxy_authorization, encode_basic};
use proxyflow_db::{Allocation, AllocationResolver, UsageRecord};
use proxyflow_telemetry::UsageTracker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Connection handler configuration
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Deadline for reading the client's request head
    pub handshake_timeout: Duration,
    /// Deadline for the TCP connect to the upstream proxy
    pub connect_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Both legs of a successful handshake
struct Established {
    upstream: BufReader<TcpStream>,
    allocation: Allocation,
    target: String,
}

/// Authenticates CONNECT requests and tunnels them through the allocated
/// upstream proxy
pub struct ConnectionHandler {
    resolver: Arc<dyn AllocationResolver>,
    tracker: Arc<UsageTracker>,
    config: HandlerConfig,
}

impl ConnectionHandler {
    pub fn new(
        resolver: Arc<dyn AllocationResolver>,
        tracker: Arc<UsageTracker>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            resolver,
            tracker,
            config,
        }
    }

    /// Serve one accepted connection to completion
    ///
    /// Both sockets are closed when this returns, on every path. A usage
    /// record is submitted only for connections that reached the tunnel.
    pub async fn handle<S>(&self, stream: S, peer_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let start_time = Utc::now();
        debug!("New connection from {}", peer_addr);

        let mut client = BufReader::new(stream);

        let Established {
            upstream,
            allocation,
            target,
        } = match self.handshake(&mut client, peer_addr).await {
            Ok(established) => established,
            Err(e) => {
                log_handshake_failure(&e, peer_addr);
                if let Some(response) = e.response() {
                    if let Err(write_err) = client.get_mut().write_all(response.as_bytes()).await {
                        debug!("Failed to send error response to {}: {}", peer_addr, write_err);
                    }
                }
                return;
            }
        };

        info!(
            "Tunnel established for {} to {} via {}",
            peer_addr,
            target,
            allocation.upstream_addr()
        );

        let result = tunnel::relay(client, upstream).await;

        info!(
            "Connection closed: {} (up={}, down={}, duration={}ms)",
            peer_addr,
            result.bytes_up,
            result.bytes_down,
            result.duration.as_millis()
        );

        self.tracker.record(UsageRecord {
            owner_id: allocation.owner_id,
            upstream_id: allocation.upstream_id,
            bytes_up: result.bytes_up,
            bytes_down: result.bytes_down,
            start_time,
            end_time: Utc::now(),
            upstream_type: allocation.upstream_type,
            upstream_ip: allocation.upstream_host,
            upstream_country: allocation.upstream_country,
            target_host: target,
            success: true,
        });
    }

    async fn handshake<S>(
        &self,
        client: &mut BufReader<S>,
        peer_addr: SocketAddr,
    ) -> Result<Established, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = tokio::time::timeout(
            self.config.handshake_timeout,
            http::read_request_head(client),
        )
        .await
        .map_err(|_| HandshakeError::RequestTimeout)?
        .map_err(HandshakeError::BadRequest)?;

        if request.method != "CONNECT" {
            return Err(HandshakeError::MethodNotAllowed(request.method));
        }

        let target = request
            .authority()
            .ok_or(HandshakeError::MissingTarget)?
            .to_string();
        debug!("CONNECT request to {} from {}", target, peer_addr);

        let auth_header = request
            .header("Proxy-Authorization")
            .ok_or(HandshakeError::MissingCredentials)?;
        let credentials = decode_proxy_authorization(auth_header)?;

        let allocation = self
            .resolver
            .resolve(
                &credentials.username,
                &credentials.api_key,
                credentials.virtual_port,
            )
            .await
            .map_err(HandshakeError::Resolver)?
            .ok_or_else(|| HandshakeError::AllocationNotFound {
                username: credentials.username.clone(),
                virtual_port: credentials.virtual_port,
            })?;

        info!(
            "Authenticated user={} vport={} upstream={}",
            allocation.username,
            allocation.virtual_port,
            allocation.upstream_addr()
        );

        let upstream = self.open_upstream(&allocation, &target).await?;

        client
            .get_mut()
            .write_all(CONNECTION_ESTABLISHED)
            .await
            .map_err(HandshakeError::ClientWrite)?;

        Ok(Established {
            upstream,
            allocation,
            target,
        })
    }

    /// Dial the upstream proxy and run the CONNECT handshake against it
    async fn open_upstream(
        &self,
        allocation: &Allocation,
        target: &str,
    ) -> Result<BufReader<TcpStream>, HandshakeError> {
        let addr = allocation.upstream_addr();

        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(addr.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(HandshakeError::UpstreamConnect {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(HandshakeError::UpstreamConnect {
                    addr,
                    reason: format!("timed out after {:?}", self.config.connect_timeout),
                })
            }
        };
        debug!("Connected to upstream proxy {}", addr);

        let proxy_authorization = allocation
            .upstream_credentials()
            .map(|(user, password)| encode_basic(user, password));
        let request = http::connect_request(target, proxy_authorization.as_deref());

        let mut upstream = BufReader::new(stream);
        upstream
            .get_mut()
            .write_all(request.as_bytes())
            .await
            .map_err(|e| HandshakeError::UpstreamHandshake {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        let response = http::read_response_head(&mut upstream)
            .await
            .map_err(|e| HandshakeError::UpstreamHandshake {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        if response.code != 200 {
            return Err(HandshakeError::UpstreamRejected {
                addr,
                code: response.code,
                reason: response.reason,
            });
        }

        Ok(upstream)
    }
}

fn log_handshake_failure(err: &HandshakeError, peer_addr: SocketAddr) {
    match err {
        HandshakeError::RequestTimeout
        | HandshakeError::BadRequest(_)
        | HandshakeError::ClientWrite(_) => {
            debug!("Dropping connection from {}: {}", peer_addr, err)
        }
        HandshakeError::MethodNotAllowed(_)
        | HandshakeError::MissingTarget
        | HandshakeError::MissingCredentials
        | HandshakeError::InvalidCredentials(_)
        | HandshakeError::AllocationNotFound { .. } => {
            warn!("Rejected connection from {}: {}", peer_addr, err)
        }
        HandshakeError::Resolver(_) => {
            error!("Rejected connection from {}: {}", peer_addr, err)
        }
        HandshakeError::UpstreamConnect { .. }
        | HandshakeError::UpstreamHandshake { .. }
        | HandshakeError::UpstreamRejected { .. } => {
            error!("Upstream failure for {}: {}", peer_addr, err)
        }
    }
}
