//! Bidirectional relay with half-close

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const BUFFER_SIZE: usize = 16 * 1024;

/// Outcome of a finished tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelResult {
    /// Client to upstream
    pub bytes_up: u64,
    /// Upstream to client
    pub bytes_down: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Relay bytes between `client` and `upstream` until both directions end
///
/// When one direction reaches end of input, the write side it feeds is
/// shut down and the other direction keeps running. Transport errors end
/// the affected direction but are not reported; the byte counts
/// accumulated so far are returned either way.
pub async fn relay<C, U>(client: C, upstream: U) -> TunnelResult
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let started = Instant::now();

    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let bytes_up = Arc::new(AtomicU64::new(0));
    let bytes_down = Arc::new(AtomicU64::new(0));

    let upload = tokio::spawn(copy_until_eof(
        client_read,
        upstream_write,
        bytes_up.clone(),
        Direction::Upload,
    ));
    let download = tokio::spawn(copy_until_eof(
        upstream_read,
        client_write,
        bytes_down.clone(),
        Direction::Download,
    ));

    let (upload, download) = tokio::join!(upload, download);
    if let Err(e) = upload {
        warn!("Upload task failed: {}", e);
    }
    if let Err(e) = download {
        warn!("Download task failed: {}", e);
    }

    TunnelResult {
        bytes_up: bytes_up.load(Ordering::Relaxed),
        bytes_down: bytes_down.load(Ordering::Relaxed),
        duration: started.elapsed(),
    }
}

async fn copy_until_eof<R, W>(
    mut reader: R,
    mut writer: W,
    counter: Arc<AtomicU64>,
    direction: Direction,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                debug!("{} reached end of input", direction);
                break;
            }
            Ok(n) => {
                if let Err(e) = write_counted(&mut writer, &buffer[..n], &counter).await {
                    debug!("{} write failed: {}", direction, e);
                    break;
                }
            }
            Err(e) => {
                debug!("{} read failed: {}", direction, e);
                break;
            }
        }
    }

    // Half-close: the peer sees end of input, the other direction stays open
    if let Err(e) = writer.shutdown().await {
        debug!("{} shutdown failed: {}", direction, e);
    }
}

/// Write all of `chunk`, counting each partial write as it lands
async fn write_counted<W>(
    writer: &mut W,
    mut chunk: &[u8],
    counter: &AtomicU64,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !chunk.is_empty() {
        let written = writer.write(chunk).await?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        counter.fetch_add(written as u64, Ordering::Relaxed);
        chunk = &chunk[written..];
    }
    Ok(())
}
