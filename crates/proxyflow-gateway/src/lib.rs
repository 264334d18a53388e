//! Authenticating HTTP CONNECT gateway
//!
//! Clients open a tunnel with
//!
//! ```text
//! CONNECT example.com:443 HTTP/1.1
//! Proxy-Authorization: Basic base64(<username>_<virtual port>:<api key>)
//! ```
//!
//! The gateway resolves the credentials to an upstream proxy allocation,
//! repeats the CONNECT against that upstream, answers
//! `200 Connection Established` and relays bytes in both directions. When
//! the tunnel ends, the connection's usage is handed to a
//! [`proxyflow_telemetry::UsageTracker`].
//!
//! Failures before the tunnel is up map to `405` (not CONNECT), `407`
//! (missing, invalid or unresolvable credentials), `502` (upstream
//! unreachable or broken handshake) or the upstream's own status when it
//! rejected the CONNECT.

pub mod error;
pub mod http;
pub mod tunnel;

mod handler;
mod listener;

pub use error::{GatewayError, HandshakeError};
pub use handler::{ConnectionHandler, HandlerConfig};
pub use listener::{GatewayConfig, GatewayListener};
pub use tunnel::{relay, TunnelResult};
