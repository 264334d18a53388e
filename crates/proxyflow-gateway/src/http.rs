//! Minimal HTTP/1.1 head codec for the CONNECT handshake
//!
//! Heads are read byte-exactly from a buffered reader: anything the peer
//! sent after the blank line stays in the reader's buffer and is relayed
//! by the tunnel afterwards.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Largest request or response head accepted
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error)]
pub enum HeadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed before a complete head was received")]
    Closed,

    #[error("Head exceeds {MAX_HEAD_SIZE} bytes")]
    TooLarge,

    #[error("Malformed head: {0}")]
    Malformed(String),
}

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Request target, `host:port` for CONNECT
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// First header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// CONNECT target, falling back to the `Host` header
    pub fn authority(&self) -> Option<&str> {
        if !self.target.is_empty() {
            return Some(&self.target);
        }
        self.header("Host").filter(|host| !host.is_empty())
    }
}

/// Parsed status line; the gateway never inspects upstream headers
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub code: u16,
    pub reason: String,
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

/// Read and parse one request head
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let raw = read_head(reader).await?;

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(&raw) {
        Ok(httparse::Status::Complete(_)) => Ok(RequestHead {
            method: req.method.unwrap_or_default().to_string(),
            target: req.path.unwrap_or_default().to_string(),
            headers: collect_headers(req.headers),
        }),
        Ok(httparse::Status::Partial) => {
            Err(HeadError::Malformed("incomplete request".to_string()))
        }
        Err(e) => Err(HeadError::Malformed(e.to_string())),
    }
}

/// Read and parse one response head
pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let raw = read_head(reader).await?;

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    match resp.parse(&raw) {
        Ok(httparse::Status::Complete(_)) => Ok(ResponseHead {
            code: resp.code.unwrap_or_default(),
            reason: resp.reason.unwrap_or_default().to_string(),
        }),
        Ok(httparse::Status::Partial) => {
            Err(HeadError::Malformed("incomplete response".to_string()))
        }
        Err(e) => Err(HeadError::Malformed(e.to_string())),
    }
}

/// Consume bytes up to and including the first blank line
async fn read_head<R>(reader: &mut R) -> Result<Vec<u8>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(512);

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(HeadError::Closed);
        }

        // The terminator may straddle two reads
        let search_from = head.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        let chunk_len = available.len();
        head.extend_from_slice(available);

        if let Some(pos) = find_terminator(&head[search_from..]) {
            let head_end = search_from + pos + HEAD_TERMINATOR.len();
            let unused = head.len() - head_end;
            head.truncate(head_end);
            reader.consume(chunk_len - unused);
            return Ok(head);
        }

        reader.consume(chunk_len);
        if head.len() > MAX_HEAD_SIZE {
            return Err(HeadError::TooLarge);
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

/// `HTTP/1.1 <code> <reason>` followed by an empty header block
pub fn status_response(code: u16, reason: &str) -> String {
    format!("HTTP/1.1 {} {}\r\n\r\n", code, reason)
}

/// Sent to the client once both legs of the tunnel are up
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// CONNECT request the gateway sends to an upstream proxy
pub fn connect_request(target: &str, proxy_authorization: Option<&str>) -> String {
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", target, target);
    if let Some(value) = proxy_authorization {
        request.push_str("Proxy-Authorization: ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}
