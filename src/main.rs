//! LED wall segment driver
//!
//! Connects to a NATS broker, subscribes to one topic, and renders every
//! received frame at the wall-clock deadline it carries.
//!
//! ## Architecture
//! - **Session** (tokio): reads the broker socket, answers PINGs, decodes
//!   frames and offers them to the queue without blocking
//! - **Dispatcher thread** (std::thread): owns the display, sleeps until each
//!   frame is due, drops frames that arrive too late
//! - **Status endpoint** (tokio/axum, optional): read-only counters
//!
//! Any connection error is fatal: the process exits non-zero and its
//! supervisor (systemd) restarts it.
//!
//! ## Rust concepts
//! - `#[tokio::main]` async entry point
//! - `tokio::select!` to race the session against Ctrl+C
//! - `spawn_blocking` for the blocking readiness waits
//! - `#[cfg(feature = ...)]` to pick the display sink at compile time
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/led-wall-rs --host 192.168.4.1 --topic matrix1.in --status-port 8080
//! ```

use clap::Parser;
use led_wall_rs::clock::{HostReadiness, Readiness, SystemClock};
use led_wall_rs::config::{BrokerConfig, Subscription};
use led_wall_rs::connection;
use led_wall_rs::protocol;
use led_wall_rs::scheduler::{Dispatcher, FrameReceiver, FrameSender, frame_queue};
use led_wall_rs::server::{self, AppState};
use led_wall_rs::stats::WallStats;
use led_wall_rs::{PanelConfig, WallConfig, WallError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// LED wall segment driver
#[derive(Parser, Debug)]
#[command(name = "led-wall-rs")]
#[command(about = "Render NATS-delivered frames on an RGB LED panel at their deadlines")]
#[command(version)]
struct Args {
    /// Broker host name or address
    #[arg(long, default_value = "192.168.4.1")]
    host: String,

    /// Broker port
    #[arg(long, default_value = "4222")]
    port: u16,

    /// Subject to subscribe to
    #[arg(long, default_value = "matrix1.in")]
    topic: String,

    /// Subscription id sent with SUB
    #[arg(long, default_value = "1")]
    sid: String,

    /// Number of rows on the LED panel
    #[arg(long, default_value = "7")]
    rows: u32,

    /// Number of columns on the LED panel
    #[arg(long, default_value = "7")]
    cols: u32,

    /// Frames buffered between the network and the display
    #[arg(long, default_value = "128")]
    queue_capacity: usize,

    /// Longest sleep before a single frame, in milliseconds
    #[arg(long, default_value = "3000")]
    max_wait_ms: u64,

    /// Display brightness (0-100)
    #[arg(long, default_value = "100")]
    brightness: u8,

    /// Poll interval while waiting for network and clock, in milliseconds
    #[arg(long, default_value = "500")]
    readiness_poll_ms: u64,

    /// Serve the HTTP status endpoint on this port
    #[arg(long)]
    status_port: Option<u16>,
}

impl Args {
    fn to_config(&self) -> WallConfig {
        WallConfig {
            broker: BrokerConfig {
                host: self.host.clone(),
                port: self.port,
            },
            subscription: Subscription::new(&self.topic, &self.sid),
            panel: PanelConfig::new(self.rows, self.cols),
            queue_capacity: self.queue_capacity,
            max_wait: Duration::from_millis(self.max_wait_ms),
            brightness: self.brightness,
            readiness_poll: Duration::from_millis(self.readiness_poll_ms),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let args = Args::parse();
    let config = args.to_config();
    if let Err(e) = config.validate() {
        fatal(e);
    }

    tracing::info!("LED wall driver v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Broker: {}", config.broker.addr());
    tracing::info!(
        "Subscription: {} (sid {})",
        config.subscription.topic,
        config.subscription.sid
    );
    tracing::info!(
        "Panel: {}x{} ({}-byte payloads)",
        config.panel.cols,
        config.panel.rows,
        config.panel.payload_len()
    );

    let stats = Arc::new(WallStats::new());
    let shutdown = Arc::new(AtomicBool::new(false));
    let (frames, queue) = frame_queue(config.queue_capacity);

    let dispatcher = match spawn_dispatcher(queue, &config, stats.clone(), shutdown.clone()) {
        Ok(handle) => handle,
        Err(e) => fatal(e.into()),
    };

    if let Some(port) = args.status_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let state = AppState {
            stats: stats.clone(),
            panel: config.panel,
        };
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, state).await {
                tracing::error!("status endpoint stopped: {}", e);
            }
        });
    }

    tokio::select! {
        result = run(&config, frames, stats, shutdown.clone()) => {
            if let Err(e) = result {
                fatal(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
    }

    // The session future, and with it the queue sender, is gone. Setting the
    // flag ends a pending readiness wait and makes the dispatcher discard
    // whatever is still queued.
    shutdown.store(true, Ordering::Relaxed);
    match tokio::task::spawn_blocking(move || dispatcher.join()).await {
        Ok(Ok(())) => tracing::info!("Shutdown complete."),
        _ => tracing::warn!("dispatcher thread did not exit cleanly"),
    }
}

/// Wait for network and clock, then run one broker session to completion.
async fn run(
    config: &WallConfig,
    frames: FrameSender,
    stats: Arc<WallStats>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), WallError> {
    let readiness = HostReadiness::new(config.broker.addr(), config.readiness_poll);
    let ready = tokio::task::spawn_blocking(move || {
        readiness.wait_for_wifi_or_cancel(&shutdown) && readiness.wait_for_clock_sync_or_cancel(&shutdown)
    })
    .await
    .map_err(|e| WallError::Io(std::io::Error::other(e)))?;
    if !ready {
        return Ok(());
    }

    let stream = connection::connect(&config.broker).await?;
    let parser = protocol::Parser::new(&config.subscription, config.panel.pixel_count());
    connection::run_session(stream, parser, &config.subscription, frames, stats).await
}

/// Start the dispatcher on its own thread. The display is created on that
/// thread because the matrix library must only be touched from one.
fn spawn_dispatcher(
    queue: FrameReceiver,
    config: &WallConfig,
    stats: Arc<WallStats>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let panel = config.panel;
    let brightness = config.brightness;
    let max_wait = config.max_wait;

    std::thread::Builder::new()
        .name("dispatcher".to_string())
        .spawn(move || {
            #[cfg(feature = "hardware")]
            let sink = match led_wall_rs::render::MatrixSink::new(panel, brightness) {
                Ok(sink) => sink,
                Err(e) => {
                    // Dropping the queue makes the session fail on its next frame.
                    tracing::error!("Failed to initialize LED matrix: {}", e);
                    return;
                }
            };
            #[cfg(not(feature = "hardware"))]
            let sink = {
                tracing::info!(
                    "built without display hardware, logging frames (brightness {} unused)",
                    brightness
                );
                led_wall_rs::render::TraceSink::new(panel)
            };

            let mut dispatcher = Dispatcher::new(SystemClock, sink, max_wait, stats).with_shutdown(shutdown);
            dispatcher.run(queue);

            #[cfg(feature = "hardware")]
            dispatcher.into_sink().clear();
        })
}

fn fatal(error: WallError) -> ! {
    tracing::error!("{}", error);
    std::process::exit(1);
}
