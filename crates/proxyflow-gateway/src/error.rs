//! Gateway errors

use crate::http::{status_response, HeadError};
use proxyflow_auth::CredentialError;
use proxyflow_db::StoreError;
use thiserror::Error;

/// Listener lifecycle errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Gateway listener has not been started")]
    NotStarted,

    #[error("Gateway listener is already started")]
    AlreadyStarted,

    #[error("Shutdown deadline exceeded with {remaining} connection(s) still active")]
    ShutdownTimeout { remaining: usize },
}

/// Why a connection ended before its tunnel was established
///
/// Each variant is a terminal state of the handshake. Resolver failures
/// and unknown allocations produce the same client-visible response.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Timed out waiting for the request head")]
    RequestTimeout,

    #[error("Failed to read request: {0}")]
    BadRequest(#[source] HeadError),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("Missing CONNECT target")]
    MissingTarget,

    #[error("Missing Proxy-Authorization header")]
    MissingCredentials,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(#[from] CredentialError),

    #[error("No active allocation for {username} on virtual port {virtual_port}")]
    AllocationNotFound { username: String, virtual_port: u32 },

    #[error("Allocation lookup failed: {0}")]
    Resolver(#[source] StoreError),

    #[error("Failed to connect to upstream {addr}: {reason}")]
    UpstreamConnect { addr: String, reason: String },

    #[error("CONNECT handshake with upstream {addr} failed: {reason}")]
    UpstreamHandshake { addr: String, reason: String },

    #[error("Upstream {addr} rejected CONNECT: {code} {reason}")]
    UpstreamRejected {
        addr: String,
        code: u16,
        reason: String,
    },

    #[error("Failed to confirm tunnel to client: {0}")]
    ClientWrite(#[source] std::io::Error),
}

const PROXY_AUTH_REQUIRED: &str = "HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"proxyflow\"\r\n\r\n";

impl HandshakeError {
    /// Response to write to the client before closing, if any
    pub fn response(&self) -> Option<String> {
        match self {
            Self::RequestTimeout | Self::BadRequest(_) | Self::ClientWrite(_) => None,
            Self::MethodNotAllowed(_) => Some(status_response(405, "Method Not Allowed")),
            Self::MissingTarget => Some(status_response(400, "Bad Request")),
            Self::MissingCredentials
            | Self::InvalidCredentials(_)
            | Self::AllocationNotFound { .. }
            | Self::Resolver(_) => Some(PROXY_AUTH_REQUIRED.to_string()),
            Self::UpstreamConnect { .. } | Self::UpstreamHandshake { .. } => {
                Some(status_response(502, "Bad Gateway"))
            }
            Self::UpstreamRejected { code, reason, .. } => Some(status_response(*code, reason)),
        }
    }
}
