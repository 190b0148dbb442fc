//! In-process WebSocket server for relay and signal stream tests.
//!
//! Accepts connections on a loopback port, records the request URI of
//! every handshake, captures inbound JSON frames, and lets the test
//! script outbound frames to the most recent client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

const RECV_DEADLINE: Duration = Duration::from_secs(5);

struct Shared {
    inbound_tx: mpsc::UnboundedSender<Value>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    client: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    connections: AtomicU32,
    request_uris: Mutex<Vec<String>>,
}

/// Scripted WebSocket server bound to an ephemeral loopback port.
pub struct MockWsServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockWsServer {
    /// Bind and start accepting connections.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            client: RwLock::new(None),
            connections: AtomicU32::new(0),
            request_uris: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_connection(Arc::clone(&accept_shared), stream));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            shared,
            accept_task,
        }
    }

    /// `host:port` suitable for a client config's `host` field.
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Number of completed WebSocket handshakes so far.
    pub fn connections(&self) -> u32 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Request URIs of every handshake, in order.
    pub fn request_uris(&self) -> Vec<String> {
        self.shared.request_uris.lock().clone()
    }

    /// Wait until at least `count` handshakes completed.
    pub async fn wait_for_connections(&self, count: u32) {
        let deadline = tokio::time::Instant::now() + RECV_DEADLINE;
        while self.connections() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} connections"
            );
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Next inbound JSON frame, or `None` after a 5s deadline.
    pub async fn recv_frame(&self) -> Option<Value> {
        let mut rx = self.shared.inbound_rx.lock().await;
        timeout(RECV_DEADLINE, rx.recv()).await.ok().flatten()
    }

    /// Next inbound frame whose `type` matches, skipping others
    /// (heartbeats, acks the test does not care about).
    pub async fn recv_frame_of_type(&self, frame_type: &str) -> Option<Value> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.get("type").and_then(Value::as_str) == Some(frame_type) {
                return Some(frame);
            }
        }
    }

    /// Send a JSON frame to the most recent client.
    pub fn send(&self, value: &Value) {
        if let Some(client) = self.shared.client.read().as_ref() {
            let _ = client.send(Message::Text(value.to_string()));
        }
    }

    /// Send a raw text frame (e.g. invalid JSON) to the most recent client.
    pub fn send_raw(&self, text: &str) {
        if let Some(client) = self.shared.client.read().as_ref() {
            let _ = client.send(Message::Text(text.to_string()));
        }
    }

    /// Close the current client connection server-side.
    pub fn close_client(&self) {
        if let Some(client) = self.shared.client.read().as_ref() {
            let _ = client.send(Message::Close(None));
        }
    }

    /// Stop accepting and drop the current client.
    pub fn stop(&self) {
        self.accept_task.abort();
        self.close_client();
        *self.shared.client.write() = None;
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream) {
    let uri_shared = Arc::clone(&shared);
    let callback = move |request: &Request, response: Response| {
        uri_shared
            .request_uris
            .lock()
            .push(request.uri().to_string());
        Ok(response)
    };

    let Ok(socket) = accept_hdr_async(stream, callback).await else {
        return;
    };
    shared.connections.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut stream) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<Message>();
    *shared.client.write() = Some(client_tx);

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = shared.inbound_tx.send(value);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            outbound = client_rx.recv() => match outbound {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if sink.send(message).await.is_err() || closing {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
