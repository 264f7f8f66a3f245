//! TCP accept loop and per-connection I/O tasks.
//!
//! Each accepted connection gets a reader task (frames → decoded messages →
//! the shared [`NetEvent`] queue) and a writer task (queued frames → the
//! socket). Connection objects are created here but handed off to the
//! simulation, which is their sole mutator afterwards.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use strata_protocol::deserialize_message;
use strata_world::ClientId;

use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};
use crate::peer::{NetEvent, PeerSender};

/// Configuration for [`NetServer`].
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Address to bind to. Default: `0.0.0.0:7777`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 256.
    pub max_connections: usize,
    /// Framing limits.
    pub frame: FrameConfig,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            max_connections: 256,
            frame: FrameConfig::default(),
        }
    }
}

/// Accepts connections and feeds the simulation's event queue.
pub struct NetServer {
    config: NetConfig,
    events: mpsc::Sender<NetEvent>,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl NetServer {
    /// Creates a server that pushes events into `events`.
    pub fn new(config: NetConfig, events: mpsc::Sender<NetEvent>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            events,
            next_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Number of currently active connections.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Signal the accept loop and all connection tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = result?;
                    if self.active.load(Ordering::Relaxed) >= self.config.max_connections {
                        tracing::warn!("connection limit reached, rejecting {peer_addr}");
                        drop(stream);
                        continue;
                    }
                    stream.set_nodelay(true)?;

                    let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let (reader, writer) = stream.into_split();
                    let (sender, outbound_rx) = PeerSender::channel();

                    if self
                        .events
                        .send(NetEvent::Connected { id, sender, addr: peer_addr })
                        .await
                        .is_err()
                    {
                        // Simulation is gone; stop accepting.
                        break;
                    }
                    self.active.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("accepted {id:?} from {peer_addr}");

                    let events = self.events.clone();
                    let frame = self.config.frame.clone();
                    let active = Arc::clone(&self.active);
                    let task_shutdown = self.shutdown_rx.clone();

                    tokio::spawn(writer_task(writer, outbound_rx, frame.clone(), id));
                    tokio::spawn(async move {
                        reader_task(id, reader, frame, events.clone(), task_shutdown).await;
                        active.fetch_sub(1, Ordering::Relaxed);
                        let _ = events.send(NetEvent::Disconnected { id }).await;
                        tracing::info!("connection {id:?} closed");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("transport shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Drains the outbound queue onto the socket until the queue closes or a
/// write fails.
async fn writer_task(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    frame: FrameConfig,
    id: ClientId,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &bytes, &frame).await {
            tracing::warn!("{id:?} write failed: {e}");
            break;
        }
    }
}

/// Reads frames, decodes them, and pushes them onto the event queue until
/// EOF, a protocol error, or shutdown.
async fn reader_task(
    id: ClientId,
    mut reader: OwnedReadHalf,
    frame: FrameConfig,
    events: mpsc::Sender<NetEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = read_frame(&mut reader, &frame) => {
                let payload = match result {
                    Ok(p) => p,
                    Err(FrameError::ConnectionClosed) => break,
                    Err(e) => {
                        tracing::warn!("{id:?} frame error: {e}");
                        break;
                    }
                };
                let msg = match deserialize_message(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("{id:?} sent malformed message: {e}");
                        break;
                    }
                };
                if events.send(NetEvent::Message { id, msg }).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use strata_protocol::messages::{Login, Pong};
    use strata_protocol::{Message, serialize_message};

    async fn start_test_server(
        max_connections: usize,
    ) -> (SocketAddr, Arc<NetServer>, mpsc::Receiver<NetEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let config = NetConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_connections,
            frame: FrameConfig::default(),
        };
        let server = Arc::new(NetServer::new(config, tx));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        (addr, server, rx)
    }

    async fn send_message(stream: &mut TcpStream, msg: &Message) {
        let bytes = serialize_message(msg).unwrap();
        stream
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_produces_connected_event() {
        let (addr, _server, mut rx) = start_test_server(16).await;
        let _stream = TcpStream::connect(addr).await.unwrap();

        match rx.recv().await.unwrap() {
            NetEvent::Connected { id, .. } => assert_eq!(id, ClientId(1)),
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inbound_message_reaches_queue() {
        let (addr, _server, mut rx) = start_test_server(16).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _ = rx.recv().await.unwrap(); // Connected

        let msg = Message::Login(Login {
            player_name: "Alice".into(),
            protocol_version: strata_protocol::PROTOCOL_VERSION,
        });
        send_message(&mut stream, &msg).await;

        match rx.recv().await.unwrap() {
            NetEvent::Message { id, msg: got } => {
                assert_eq!(id, ClientId(1));
                assert_eq!(got, msg);
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outbound_sender_reaches_client() {
        let (addr, _server, mut rx) = start_test_server(16).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let sender = match rx.recv().await.unwrap() {
            NetEvent::Connected { sender, .. } => sender,
            other => panic!("expected Connected, got {other:?}"),
        };

        let msg = Message::Pong(Pong { nonce: 9 });
        sender.send(&msg).unwrap();

        let payload = read_frame(&mut stream, &FrameConfig::default())
            .await
            .unwrap();
        assert_eq!(deserialize_message(&payload).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_disconnect_produces_disconnected_event() {
        let (addr, _server, mut rx) = start_test_server(16).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let _ = rx.recv().await.unwrap(); // Connected
        drop(stream);

        match rx.recv().await.unwrap() {
            NetEvent::Disconnected { id } => assert_eq!(id, ClientId(1)),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_message_tears_down_only_that_connection() {
        let (addr, server, mut rx) = start_test_server(16).await;
        let mut bad = TcpStream::connect(addr).await.unwrap();
        let _good = TcpStream::connect(addr).await.unwrap();
        let _ = rx.recv().await.unwrap();
        let _ = rx.recv().await.unwrap();

        // A frame whose payload is not a valid message.
        bad.write_all(&3u32.to_le_bytes()).await.unwrap();
        bad.write_all(&[0xFF, 0xFF, 0xFF]).await.unwrap();

        match rx.recv().await.unwrap() {
            NetEvent::Disconnected { id } => assert_eq!(id, ClientId(1)),
            other => panic!("expected Disconnected, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.active_connections(), 1);
    }

    #[tokio::test]
    async fn test_connection_limit_enforced() {
        let (addr, server, mut rx) = start_test_server(1).await;
        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _ = rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _c2 = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.active_connections(), 1);
    }
}
