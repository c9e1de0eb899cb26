//! Control-plane server
//!
//! A TCP listener speaking the length-framed protocol from
//! `pdi_common::framing`. Connected controllers receive the daemon's
//! streamed log lines and can issue commands (status, force-update,
//! mute) that are answered with a framed reply. The listener runs
//! independently of the pipeline's own concurrency; a slow or dead
//! controller never blocks an import run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pdi_common::channel::{read_frame, write_frame};
use pdi_common::types::{Command, CommandReply, ControlPayload, LogLine};
use pdi_common::{PdiError, Result};

use crate::import::ModuleRegistry;

/// Outbound log lines buffered per connection before lagging drops old ones.
const PUBLISH_BUFFER: usize = 256;

/// Fan-out handle for daemon events destined for connected controllers.
///
/// Publishing is fire-and-forget: with no controller connected the
/// line simply has no receivers.
#[derive(Clone)]
pub struct ControlPublisher {
    tx: broadcast::Sender<String>,
}

impl Default for ControlPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PUBLISH_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Publish one log line to every connected controller.
    pub fn publish(&self, level: &str, message: String) {
        let payload = ControlPayload::LogLine(LogLine {
            timestamp: Utc::now(),
            level: level.to_string(),
            message,
        });
        match payload.to_frame_text() {
            Ok(text) => {
                let _ = self.tx.send(text);
            },
            Err(e) => warn!(error = %e, "Cannot serialize control log line"),
        }
    }
}

/// The control-plane TCP listener.
pub struct ControlListener {
    listener: TcpListener,
    registry: ModuleRegistry,
    publisher: ControlPublisher,
}

impl ControlListener {
    /// Bind the listener. A bad or busy address is a startup failure.
    pub async fn bind(
        addr: &str,
        registry: ModuleRegistry,
        publisher: ControlPublisher,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(PdiError::Io)?;
        info!(addr = %addr, "Control listener bound");
        Ok(Self {
            listener,
            registry,
            publisher,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr().map_err(PdiError::Io)
    }

    /// Run the accept loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((socket, peer)) => {
                        debug!(peer = %peer, "Controller connected");
                        let registry = self.registry.clone();
                        let log_rx = self.publisher.subscribe();
                        tokio::spawn(async move {
                            handle_connection(socket, registry, log_rx).await;
                            debug!(peer = %peer, "Controller disconnected");
                        });
                    },
                    Err(e) => {
                        warn!(error = %e, "Control accept failed");
                    },
                }
            }
        })
    }
}

/// One controller connection: an outbound pump streaming log lines
/// (subject to the connection's mute toggle) and an inbound loop
/// answering commands. Both share the write half so frames never
/// interleave.
async fn handle_connection(
    socket: TcpStream,
    registry: ModuleRegistry,
    mut log_rx: broadcast::Receiver<String>,
) {
    let (mut reader, writer) = socket.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let muted = Arc::new(AtomicBool::new(false));

    let pump_writer = Arc::clone(&writer);
    let pump_muted = Arc::clone(&muted);
    let pump = tokio::spawn(async move {
        loop {
            match log_rx.recv().await {
                Ok(text) => {
                    if pump_muted.load(Ordering::SeqCst) {
                        continue;
                    }
                    let mut w = pump_writer.lock().await;
                    if write_frame(&mut *w, &text).await.is_err() {
                        break;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "Slow controller lagged, dropping log lines");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(text)) => {
                let reply = handle_frame(&text, &registry, &muted);
                if send_reply(&writer, reply).await.is_err() {
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Controller stream error");
                break;
            },
        }
    }

    pump.abort();
}

async fn send_reply(writer: &Arc<Mutex<OwnedWriteHalf>>, reply: CommandReply) -> Result<()> {
    let text = ControlPayload::CommandReply(reply)
        .to_frame_text()
        .map_err(PdiError::Serialization)?;
    let mut w = writer.lock().await;
    write_frame(&mut *w, &text).await
}

/// Decode and execute one inbound frame.
fn handle_frame(text: &str, registry: &ModuleRegistry, muted: &AtomicBool) -> CommandReply {
    let payload = match ControlPayload::from_frame_text(text) {
        Ok(payload) => payload,
        Err(e) => {
            return CommandReply {
                ok: false,
                detail: format!("unrecognized payload: {}", e),
                instances: Vec::new(),
            };
        },
    };

    let ControlPayload::Command(command) = payload else {
        return CommandReply {
            ok: false,
            detail: "expected a command payload".to_string(),
            instances: Vec::new(),
        };
    };

    match command {
        Command::Status => {
            let instances = registry
                .ids()
                .into_iter()
                .filter_map(|id| registry.resolve(&id))
                .map(|module| module.status())
                .collect();
            CommandReply {
                ok: true,
                detail: String::new(),
                instances,
            }
        },
        Command::ForceUpdate { instance, enabled } => match registry.resolve(&instance) {
            Some(module) => {
                module.set_force_update(enabled);
                CommandReply {
                    ok: true,
                    detail: format!("force_update={} on '{}'", enabled, instance),
                    instances: Vec::new(),
                }
            },
            None => CommandReply {
                ok: false,
                detail: format!("unknown instance: {}", instance),
                instances: Vec::new(),
            },
        },
        Command::Mute { enabled } => {
            muted.store(enabled, Ordering::SeqCst);
            CommandReply {
                ok: true,
                detail: format!("mute={}", enabled),
                instances: Vec::new(),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdi_common::channel::ControlChannel;
    use std::time::Duration;

    async fn start_listener(
        registry: ModuleRegistry,
        publisher: ControlPublisher,
    ) -> std::net::SocketAddr {
        let listener = ControlListener::bind("127.0.0.1:0", registry, publisher)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        listener.spawn();
        addr
    }

    async fn roundtrip(channel: &ControlChannel, command: Command) -> CommandReply {
        let text = ControlPayload::Command(command).to_frame_text().unwrap();
        channel.send(&text).await.unwrap();
        let reply = channel.read_message().await.unwrap();
        match ControlPayload::from_frame_text(&reply).unwrap() {
            ControlPayload::CommandReply(reply) => reply,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_on_empty_registry() {
        let addr = start_listener(ModuleRegistry::new(), ControlPublisher::new()).await;
        let channel = ControlChannel::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let reply = roundtrip(&channel, Command::Status).await;
        assert!(reply.ok);
        assert!(reply.instances.is_empty());
    }

    #[tokio::test]
    async fn test_force_update_unknown_instance() {
        let addr = start_listener(ModuleRegistry::new(), ControlPublisher::new()).await;
        let channel = ControlChannel::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let reply = roundtrip(
            &channel,
            Command::ForceUpdate {
                instance: "ghost".into(),
                enabled: true,
            },
        )
        .await;
        assert!(!reply.ok);
        assert!(reply.detail.contains("ghost"));
    }

    #[tokio::test]
    async fn test_log_lines_stream_to_controller() {
        let publisher = ControlPublisher::new();
        let addr = start_listener(ModuleRegistry::new(), publisher.clone()).await;
        let channel = ControlChannel::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        // The status round-trip guarantees the connection is fully
        // accepted before we publish.
        roundtrip(&channel, Command::Status).await;
        publisher.publish("info", "run complete".to_string());

        let line = channel.read_message().await.unwrap();
        match ControlPayload::from_frame_text(&line).unwrap() {
            ControlPayload::LogLine(log) => {
                assert_eq!(log.level, "info");
                assert_eq!(log.message, "run complete");
            },
            other => panic!("expected a log line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mute_suppresses_log_stream() {
        let publisher = ControlPublisher::new();
        let addr = start_listener(ModuleRegistry::new(), publisher.clone()).await;
        let channel = ControlChannel::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let reply = roundtrip(&channel, Command::Mute { enabled: true }).await;
        assert!(reply.ok);

        publisher.publish("info", "hidden".to_string());
        // Give the outbound pump time to consume (and drop) the muted
        // line before unmuting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        roundtrip(&channel, Command::Mute { enabled: false }).await;
        publisher.publish("info", "visible".to_string());

        // The muted line was dropped server-side; the first streamed
        // frame after unmuting is the visible one.
        let line = channel.read_message().await.unwrap();
        match ControlPayload::from_frame_text(&line).unwrap() {
            ControlPayload::LogLine(log) => assert_eq!(log.message, "visible"),
            other => panic!("expected a log line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_command_payload_rejected() {
        let addr = start_listener(ModuleRegistry::new(), ControlPublisher::new()).await;
        let channel = ControlChannel::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let text = ControlPayload::LogLine(LogLine {
            timestamp: Utc::now(),
            level: "info".into(),
            message: "not a command".into(),
        })
        .to_frame_text()
        .unwrap();
        channel.send(&text).await.unwrap();

        let reply = channel.read_message().await.unwrap();
        match ControlPayload::from_frame_text(&reply).unwrap() {
            ControlPayload::CommandReply(reply) => assert!(!reply.ok),
            other => panic!("expected a reply, got {other:?}"),
        }
    }
}
