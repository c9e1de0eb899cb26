//! Control-plane channel client
//!
//! A byte-oriented, bidirectional connection to a running import
//! daemon, carrying length-prefixed UTF-8 frames (see [`crate::framing`]).
//! The channel itself imposes no payload schema; callers layer
//! [`crate::types::ControlPayload`] on top.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::error::{PdiError, Result};
use crate::framing;

/// Buffered inbound messages per subscriber before lagging drops old ones.
const SUBSCRIBER_BUFFER: usize = 256;

/// Client end of the control-plane channel.
///
/// `send` is gated by an enable toggle independent of the connection
/// state, so outbound traffic can be muted without tearing the
/// connection down. Inbound frames can be read directly with
/// [`ControlChannel::read_message`] or fanned out to any number of
/// subscribers via [`ControlChannel::start_reader`].
pub struct ControlChannel {
    reader: Mutex<ReadHalf<TcpStream>>,
    writer: Mutex<WriteHalf<TcpStream>>,
    send_enabled: AtomicBool,
    inbound: broadcast::Sender<String>,
}

impl ControlChannel {
    /// Connect to a control endpoint.
    ///
    /// Fails with [`PdiError::Timeout`] if no server is reachable
    /// within `timeout`; other connection failures surface as
    /// [`PdiError::Io`].
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PdiError::Timeout(timeout))??;

        debug!(%addr, "Control channel connected");

        let (reader, writer) = tokio::io::split(stream);
        let (inbound, _) = broadcast::channel(SUBSCRIBER_BUFFER);

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            send_enabled: AtomicBool::new(true),
            inbound,
        })
    }

    /// Enable or disable outbound sends without disconnecting.
    pub fn set_send_enabled(&self, enabled: bool) {
        self.send_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether outbound sends are currently enabled.
    pub fn send_enabled(&self) -> bool {
        self.send_enabled.load(Ordering::SeqCst)
    }

    /// Send one framed message.
    ///
    /// While sending is disabled the message is dropped silently; the
    /// toggle exists precisely to mute outbound traffic.
    pub async fn send(&self, text: &str) -> Result<()> {
        if !self.send_enabled() {
            debug!("Control channel muted, dropping outbound message");
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        framing::write_message(&mut *writer, text).await
    }

    /// Read the next framed message, blocking until a full frame is
    /// available.
    ///
    /// A stream closed mid-frame is a [`PdiError::Framing`] error; a
    /// clean disconnect is reported the same way, since either case
    /// requires the owner to reconnect explicitly.
    pub async fn read_message(&self) -> Result<String> {
        let mut reader = self.reader.lock().await;
        match framing::read_message(&mut *reader).await? {
            Some(text) => Ok(text),
            None => Err(PdiError::Framing("connection closed by peer".into())),
        }
    }

    /// Subscribe to inbound messages delivered by the reader task.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }

    /// Spawn a background task that pumps inbound frames to all
    /// subscribers. Returns the task handle; the task ends when the
    /// stream closes or a framing error occurs.
    pub fn start_reader(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            loop {
                match channel.read_message().await {
                    Ok(text) => {
                        // Send fails only when there are no subscribers; that
                        // is fine, the next subscriber starts fresh.
                        let _ = channel.inbound.send(text);
                    },
                    Err(e) => {
                        warn!(error = %e, "Control channel reader stopped");
                        break;
                    },
                }
            }
        })
    }
}

/// Read/write one message on an already-accepted raw stream.
///
/// Convenience for server-side handlers that hold the socket directly.
pub async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, text: &str) -> Result<()> {
    framing::write_message(stream, text).await
}

/// See [`write_frame`].
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<String>> {
    framing::read_message(stream).await
}
