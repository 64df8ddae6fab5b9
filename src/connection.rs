//! Broker connection and the read loop that drives the parser.
//!
//! The session is generic over the byte stream so tests can run it against
//! an in-memory `tokio::io::duplex` pipe instead of a socket.
//!
//! ## Rust concepts
//! - `async fn` over `AsyncRead + AsyncWrite + Unpin` streams
//! - Closures borrowing several locals while another is borrowed mutably

use crate::config::{BrokerConfig, Subscription};
use crate::protocol::{Event, PONG, Parser};
use crate::scheduler::{FrameSender, Offer};
use crate::stats::WallStats;
use crate::WallError;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};

/// Bytes requested per socket read. Deliberately unrelated to message
/// boundaries; the parser copes with any split.
pub const READ_CHUNK: usize = 512;

/// Resolve the broker and connect to the first address that accepts.
pub async fn connect(broker: &BrokerConfig) -> Result<TcpStream, WallError> {
    let addr = broker.addr();
    let candidates = lookup_host(&addr)
        .await
        .map_err(|source| WallError::Resolve {
            addr: addr.clone(),
            source,
        })?;

    for candidate in candidates {
        match TcpStream::connect(candidate).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("could not disable nagle on {}: {}", candidate, e);
                }
                tracing::info!("connected to broker at {}", candidate);
                return Ok(stream);
            }
            Err(e) => tracing::warn!("connect to {} failed: {}", candidate, e),
        }
    }
    Err(WallError::ConnectFailed(addr))
}

/// Read from `stream` until it fails, answering control traffic and
/// queueing every decoded frame.
///
/// Never returns `Ok`: an orderly close is [`WallError::ConnectionClosed`],
/// and a dispatcher that went away is [`WallError::QueueClosed`].
pub async fn run_session<S>(
    mut stream: S,
    mut parser: Parser,
    subscription: &Subscription,
    frames: FrameSender,
    stats: Arc<WallStats>,
) -> Result<(), WallError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stats.set_connected(true);
    let result = session_loop(&mut stream, &mut parser, subscription, &frames, &stats).await;
    stats.set_connected(false);
    result
}

async fn session_loop<S>(
    stream: &mut S,
    parser: &mut Parser,
    subscription: &Subscription,
    frames: &FrameSender,
    stats: &WallStats,
) -> Result<(), WallError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sub_line = subscription.sub_line();
    let mut buf = [0u8; READ_CHUNK];
    let mut outbound = Vec::new();

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(WallError::ConnectionClosed);
        }

        let mut queue_closed = false;
        parser.feed(&buf[..n], |event| match event {
            Event::Subscribe => {
                tracing::info!(
                    "subscribing to {} (sid {})",
                    subscription.topic,
                    subscription.sid
                );
                outbound.extend_from_slice(&sub_line);
            }
            Event::Pong => outbound.extend_from_slice(PONG),
            Event::Frame(frame) => {
                stats.frame_received();
                match frames.offer(frame) {
                    Offer::Queued => {}
                    Offer::Full => {
                        tracing::trace!("frame queue full, dropping frame");
                        stats.frame_dropped();
                    }
                    Offer::Closed => queue_closed = true,
                }
            }
        });
        stats.set_protocol_errors(parser.errors());

        if !outbound.is_empty() {
            stream.write_all(&outbound).await?;
            stream.flush().await?;
            outbound.clear();
        }
        if queue_closed {
            return Err(WallError::QueueClosed);
        }
        tracing::trace!(bytes = n, state = %parser.state(), "chunk parsed");
    }
}
