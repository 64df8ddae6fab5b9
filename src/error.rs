//! Error type shared by the network path, configuration and display setup.

use std::io;

/// Everything that can stop the wall driver.
///
/// Protocol errors are absent on purpose: the parser recovers from them
/// in place and they never leave [`crate::protocol`].
#[derive(Debug, thiserror::Error)]
pub enum WallError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not resolve broker {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no address of broker {0} accepted a connection")]
    ConnectFailed(String),

    #[error("connection to broker closed")]
    ConnectionClosed,

    #[error("broker i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame queue closed")]
    QueueClosed,

    #[error("display initialization failed: {0}")]
    Display(String),
}
