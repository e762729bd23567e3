//! In-process stand-in for the orchestrator's control service.
//!
//! Speaks the same length-prefixed JSON framing as the real service. Every
//! request received is forwarded to the test; an optional responder can
//! answer requests automatically.

#![allow(dead_code)]

use rxbridge_core::control::{ControlReply, ControlRequest};
use rxbridge_core::protocol::{read_frame, write_message};
use rxbridge_core::BridgeConfig;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type Responder = Arc<dyn Fn(&ControlRequest) -> Option<ControlReply> + Send + Sync>;

struct Shared {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    responder: Mutex<Option<Responder>>,
    connections: AtomicUsize,
    requests: mpsc::UnboundedSender<ControlRequest>,
}

pub struct MockControl {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<ControlRequest>>,
    accept_task: JoinHandle<()>,
}

impl MockControl {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    /// Listen on a fixed address, e.g. one a client is already retrying.
    pub async fn start_on(bind: SocketAddr) -> Self {
        let listener = TcpListener::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(None),
            responder: Mutex::new(None),
            connections: AtomicUsize::new(0),
            requests: tx,
        });

        let accept_task = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (mut reader, writer) = stream.into_split();
                    *shared.writer.lock().await = Some(writer);
                    shared.connections.fetch_add(1, Ordering::SeqCst);

                    let shared = shared.clone();
                    tokio::spawn(async move {
                        while let Ok(Some(frame)) = read_frame(&mut reader).await {
                            let request: ControlRequest = match serde_json::from_slice(&frame) {
                                Ok(request) => request,
                                Err(_) => continue,
                            };
                            let responder = shared.responder.lock().unwrap().clone();
                            let reply = responder.and_then(|respond| respond(&request));
                            let _ = shared.requests.send(request);
                            if let Some(reply) = reply {
                                if let Some(writer) = shared.writer.lock().await.as_mut() {
                                    let _ = write_message(writer, &reply).await;
                                }
                            }
                        }
                    });
                }
            })
        };

        Self {
            addr,
            shared,
            requests: tokio::sync::Mutex::new(rx),
            accept_task,
        }
    }

    /// Client config pointed at this service with short test timings.
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig::default()
            .with_control_target(self.addr.to_string())
            .with_request_timeout(Duration::from_secs(2))
            .with_reconnect_delay(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_secs(1))
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&ControlRequest) -> Option<ControlReply> + Send + Sync + 'static,
    {
        *self.shared.responder.lock().unwrap() = Some(Arc::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.shared.responder.lock().unwrap() = None;
    }

    /// Next request received, or `None` if nothing arrives within `timeout`.
    pub async fn next_request(&self, timeout: Duration) -> Option<ControlRequest> {
        let mut requests = self.requests.lock().await;
        tokio::time::timeout(timeout, requests.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send `reply` on the current connection.
    pub async fn reply(&self, reply: ControlReply) -> bool {
        match self.shared.writer.lock().await.as_mut() {
            Some(writer) => write_message(writer, &reply).await.is_ok(),
            None => false,
        }
    }

    /// Send an arbitrary JSON frame, bypassing the typed reply.
    pub async fn reply_raw(&self, frame: serde_json::Value) -> bool {
        match self.shared.writer.lock().await.as_mut() {
            Some(writer) => write_message(writer, &frame).await.is_ok(),
            None => false,
        }
    }

    /// Close the write side of the current connection. The client sees EOF.
    pub async fn drop_connection(&self) {
        self.shared.writer.lock().await.take();
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.connections() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for MockControl {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
