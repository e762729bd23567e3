//! Multiplexed control-plane client.
//!
//! One long-lived TCP stream to the control service carries every log, emit
//! and key-value call made by every running handler. Callers never touch the
//! stream: they enqueue a message and, when a reply is expected, park on
//! their own pending slot.
//!
//! # Session lifecycle
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Streaming
//!      ▲                │              │ stream error / close
//!      └── fixed delay ◀┴──────────────┘
//!
//! stop() from any state ──▶ Stopped
//! ```
//!
//! While streaming, an outbound pump drains the queue into the stream and an
//! inbound pump routes replies to waiters by correlation ID. When a session
//! ends, every request written during it fails with a transport error; queued
//! but unwritten requests wait for the next session.

use super::message::{
    ControlMsg, ControlReply, ControlRequest, EmitReq, KvDelReq, KvGetReq, KvPutReq, LogLevel,
    LogReq, ReplyMsg,
};
use super::pending::PendingRequests;
use crate::cancel::CancellationToken;
use crate::config::{BridgeConfig, ControlConfig};
use crate::correlation::CorrelationId;
use crate::protocol::{read_frame, write_message, Meta};
use crate::value::{decode, encode, encode_fields, Fields, Native};
use crate::{BridgeError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};

const STOPPED: &str = "control client stopped";

/// Observable state of the control stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Stopped,
}

enum Outbound {
    Message(ControlRequest),
    /// Sentinel that ends the outbound pump during `stop()`.
    Close,
}

/// Why a pump, and with it the session, ended.
enum SessionEnd {
    /// Ended on request: stop() or the sibling pump finishing first.
    Closed,
    Failed(String),
}

struct ClientInner {
    target: String,
    request_timeout: Duration,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: PendingRequests,
    stop: CancellationToken,
    state: watch::Sender<SessionState>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    session_tasks: Mutex<Vec<AbortHandle>>,
}

/// Handle to the control-plane client. Clones share one stream.
#[derive(Clone)]
pub struct ControlPlaneClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ControlPlaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneClient")
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl ControlPlaneClient {
    /// Start the client against `config.control_target`.
    ///
    /// Returns immediately; the first connection is made in the background
    /// and calls made before it is up are queued.
    pub fn start(config: &BridgeConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Disconnected);

        let inner = Arc::new(ClientInner {
            target: config.control_target.clone(),
            request_timeout: config.request_timeout,
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.connect_timeout,
            outbound: tx,
            pending: PendingRequests::new(),
            stop: CancellationToken::new(),
            state,
            supervisor: Mutex::new(None),
            session_tasks: Mutex::new(Vec::new()),
        });

        let handle = tokio::spawn(supervise(inner.clone(), rx));
        *inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!("Control plane client started (target {})", inner.target);
        Self { inner }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Wait until the session reaches `state`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Number of request/reply calls currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Forward a log line. Never waits and never fails.
    pub fn log(&self, level: LogLevel, message: &str, fields: &Fields, meta: Option<&Meta>) {
        if self.inner.stop.is_cancelled() {
            trace!(level = %level, "dropping log line after stop");
            return;
        }
        let request = ControlRequest {
            correlation: CorrelationId::generate().into_string(),
            meta: meta.cloned(),
            msg: ControlMsg::Log(LogReq {
                level,
                msg: message.to_string(),
                fields: encode_fields(fields),
            }),
        };
        if self.inner.outbound.send(Outbound::Message(request)).is_err() {
            trace!("dropping log line; outbound queue closed");
        }
    }

    /// Emit an event and wait for the service to acknowledge it.
    pub async fn emit(&self, topic: &str, data: &Fields, meta: Option<&Meta>) -> Result<()> {
        let msg = ControlMsg::Emit(EmitReq {
            topic: topic.to_string(),
            data: encode_fields(data),
        });
        let reply = self.request(msg, meta.cloned()).await?;
        expect_ack(reply, "emit")
    }

    /// Read a key. A missing value in a successful reply reads as `Null`.
    pub async fn kv_get(&self, bucket: &str, key: &str) -> Result<Native> {
        let msg = ControlMsg::KvGet(KvGetReq {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        match self.request(msg, None).await? {
            ReplyMsg::KvGetRes(res) => {
                if !res.status.is_ok() {
                    return Err(BridgeError::remote(
                        res.status.code,
                        &res.status.message,
                        "kv_get",
                    ));
                }
                Ok(res.value.as_ref().map(decode).unwrap_or(Native::Null))
            }
            other => Err(BridgeError::UnexpectedReply {
                expected: "kv_get_res",
                actual: other.kind(),
            }),
        }
    }

    /// Write a key, optionally expiring after `ttl` (whole seconds).
    pub async fn kv_put(
        &self,
        bucket: &str,
        key: &str,
        value: &Native,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let msg = ControlMsg::KvPut(KvPutReq {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value: encode(value),
            ttl_sec: ttl.map(|t| t.as_secs()).unwrap_or(0),
        });
        let reply = self.request(msg, None).await?;
        expect_ack(reply, "kv_put")
    }

    /// Delete a key.
    pub async fn kv_del(&self, bucket: &str, key: &str) -> Result<()> {
        let msg = ControlMsg::KvDel(KvDelReq {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let reply = self.request(msg, None).await?;
        expect_ack(reply, "kv_del")
    }

    /// Send a reply-expecting message and wait for its reply.
    async fn request(&self, msg: ControlMsg, meta: Option<Meta>) -> Result<ReplyMsg> {
        self.inner.stop.check()?;

        let correlation = CorrelationId::generate().into_string();
        let kind = msg.kind();
        let rx = self.inner.pending.register(&correlation);

        let request = ControlRequest {
            correlation: correlation.clone(),
            meta,
            msg,
        };
        if self.inner.outbound.send(Outbound::Message(request)).is_err() {
            self.inner.pending.abandon(&correlation);
            return Err(BridgeError::transport(STOPPED));
        }
        if self.inner.stop.is_cancelled() && self.inner.pending.abandon(&correlation) {
            return Err(BridgeError::transport(STOPPED));
        }

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply.msg),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(BridgeError::transport("pending request dropped")),
            Err(_) => {
                self.inner.pending.abandon(&correlation);
                debug!(correlation = %correlation, kind, "control request timed out");
                Err(BridgeError::Timeout(self.inner.request_timeout))
            }
        }
    }

    /// Stop the client: end both pumps, fail outstanding calls and wait for
    /// the background tasks. Safe to call more than once.
    pub async fn stop(&self) {
        if !self.inner.stop.cancel() {
            return;
        }
        let _ = self.inner.outbound.send(Outbound::Close);

        let handle = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut handle) = handle {
            if tokio::time::timeout(ControlConfig::STOP_JOIN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    "Control plane tasks did not stop within {:?}; aborting",
                    ControlConfig::STOP_JOIN_TIMEOUT
                );
                handle.abort();
                self.inner.abort_session_tasks();
            }
        }

        self.inner.pending.fail_all(STOPPED);
        self.inner.state.send_replace(SessionState::Stopped);
        info!("Control plane client stopped");
    }
}

fn expect_ack(reply: ReplyMsg, op: &str) -> Result<()> {
    match reply {
        ReplyMsg::KvCommonRes(res) if res.status.is_ok() => Ok(()),
        ReplyMsg::KvCommonRes(res) => Err(BridgeError::remote(
            res.status.code,
            &res.status.message,
            op,
        )),
        other => Err(BridgeError::UnexpectedReply {
            expected: "kv_common_res",
            actual: other.kind(),
        }),
    }
}

impl ClientInner {
    fn set_state(&self, state: SessionState) {
        if !self.stop.is_cancelled() || state == SessionState::Stopped {
            self.state.send_replace(state);
        }
    }

    fn abort_session_tasks(&self) {
        let tasks = std::mem::take(
            &mut *self
                .session_tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
    }

    /// Hand an inbound frame to its waiter.
    fn route_reply(&self, bytes: &[u8]) {
        let reply: ControlReply = match serde_json::from_slice(bytes) {
            Ok(reply) => reply,
            Err(e) => {
                // The envelope may still name a waiter even if its body is unknown.
                let correlation = serde_json::from_slice::<serde_json::Value>(bytes)
                    .ok()
                    .and_then(|raw| raw.get("correlation")?.as_str().map(str::to_string))
                    .filter(|c| !c.is_empty());
                match correlation {
                    Some(correlation) => {
                        warn!(correlation = %correlation, "Malformed control reply: {}", e);
                        let err = BridgeError::UnexpectedReply {
                            expected: "a known reply",
                            actual: "malformed reply",
                        };
                        if !self.pending.fail(&correlation, err) {
                            debug!(correlation = %correlation, "no waiter for malformed reply");
                        }
                    }
                    None => warn!("Dropping malformed control reply: {}", e),
                }
                return;
            }
        };
        if reply.correlation.is_empty() {
            debug!(kind = reply.msg.kind(), "ignoring control reply without correlation");
            return;
        }
        let correlation = reply.correlation.clone();
        if !self.pending.resolve(reply) {
            debug!(correlation = %correlation, "no waiter for control reply; dropping");
        }
    }
}

/// Reconnect loop. Owns the outbound queue's receiver across sessions.
async fn supervise(inner: Arc<ClientInner>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut epoch: u64 = 0;

    while !inner.stop.is_cancelled() {
        inner.set_state(SessionState::Connecting);

        let connect = tokio::time::timeout(inner.connect_timeout, TcpStream::connect(&inner.target));
        let connected = tokio::select! {
            _ = inner.stop.cancelled() => break,
            result = connect => result,
        };

        match connected {
            Ok(Ok(stream)) => {
                epoch += 1;
                let _ = stream.set_nodelay(true);
                info!(epoch, "Control plane stream established to {}", inner.target);
                inner.set_state(SessionState::Streaming);

                let (returned, end) = run_session(&inner, stream, rx, epoch).await;
                inner.set_state(SessionState::Disconnected);

                let reason = match &end {
                    SessionEnd::Closed => STOPPED.to_string(),
                    SessionEnd::Failed(reason) => reason.clone(),
                };
                let failed = inner.pending.fail_session(epoch, &reason);

                match returned {
                    Some(returned) => rx = returned,
                    None => {
                        warn!("Control plane outbound pump lost its queue; shutting down client");
                        break;
                    }
                }
                if matches!(end, SessionEnd::Closed) {
                    break;
                }
                warn!(
                    epoch,
                    failed, "Control plane stream failed: {}; reconnecting", reason
                );
            }
            Ok(Err(e)) => {
                inner.set_state(SessionState::Disconnected);
                warn!("Control plane connect to {} failed: {}", inner.target, e);
            }
            Err(_) => {
                inner.set_state(SessionState::Disconnected);
                warn!(
                    "Control plane connect to {} timed out after {:?}",
                    inner.target, inner.connect_timeout
                );
            }
        }

        tokio::select! {
            _ = inner.stop.cancelled() => break,
            _ = tokio::time::sleep(inner.reconnect_delay) => {}
        }
    }

    inner.pending.fail_all(STOPPED);
    inner.set_state(SessionState::Stopped);
    debug!("Control plane supervisor exited");
}

/// Run both pumps for one session and wait for them to finish.
///
/// Returns the queue receiver (unless the outbound pump died) and the reason
/// the session ended.
async fn run_session(
    inner: &Arc<ClientInner>,
    stream: TcpStream,
    rx: mpsc::UnboundedReceiver<Outbound>,
    epoch: u64,
) -> (Option<mpsc::UnboundedReceiver<Outbound>>, SessionEnd) {
    let (reader, writer) = stream.into_split();
    let session_end = CancellationToken::new();

    let outbound = tokio::spawn(outbound_pump(
        inner.clone(),
        writer,
        rx,
        epoch,
        session_end.clone(),
    ));
    let inbound = tokio::spawn(inbound_pump(inner.clone(), reader, session_end.clone()));

    *inner
        .session_tasks
        .lock()
        .unwrap_or_else(PoisonError::into_inner) =
        vec![outbound.abort_handle(), inbound.abort_handle()];

    let (outbound, inbound) = tokio::join!(outbound, inbound);
    inner
        .session_tasks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();

    let stopping = inner.stop.is_cancelled();
    let inbound_end = inbound
        .unwrap_or_else(|e| SessionEnd::Failed(format!("inbound pump panicked: {}", e)));
    match outbound {
        Ok((rx, outbound_end)) => {
            let end = match (outbound_end, inbound_end) {
                _ if stopping => SessionEnd::Closed,
                (SessionEnd::Failed(reason), _) | (_, SessionEnd::Failed(reason)) => {
                    SessionEnd::Failed(reason)
                }
                _ => SessionEnd::Failed("control session closed".to_string()),
            };
            (Some(rx), end)
        }
        Err(e) => (None, SessionEnd::Failed(format!("outbound pump panicked: {}", e))),
    }
}

/// Drain the queue into the stream until the session ends.
async fn outbound_pump(
    inner: Arc<ClientInner>,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    epoch: u64,
    session_end: CancellationToken,
) -> (mpsc::UnboundedReceiver<Outbound>, SessionEnd) {
    let end = loop {
        let next = tokio::select! {
            biased;
            _ = session_end.cancelled() => break SessionEnd::Closed,
            next = rx.recv() => next,
        };

        let request = match next {
            Some(Outbound::Message(request)) => request,
            Some(Outbound::Close) | None => break SessionEnd::Closed,
        };

        if request.msg.expects_reply() && !inner.pending.mark_sent(&request.correlation, epoch) {
            debug!(
                correlation = %request.correlation,
                kind = request.msg.kind(),
                "skipping queued request whose caller gave up"
            );
            continue;
        }

        if let Err(e) = write_message(&mut writer, &request).await {
            break SessionEnd::Failed(format!("write failed: {}", e));
        }
        trace!(correlation = %request.correlation, kind = request.msg.kind(), "control message written");
    };

    session_end.cancel();
    let _ = writer.shutdown().await;
    (rx, end)
}

/// Route replies to waiters until the stream closes or the session ends.
async fn inbound_pump(
    inner: Arc<ClientInner>,
    mut reader: OwnedReadHalf,
    session_end: CancellationToken,
) -> SessionEnd {
    let end = loop {
        let frame = tokio::select! {
            _ = session_end.cancelled() => break SessionEnd::Closed,
            _ = inner.stop.cancelled() => break SessionEnd::Closed,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(bytes)) => inner.route_reply(&bytes),
            Ok(None) => break SessionEnd::Failed("control stream closed by peer".to_string()),
            Err(e) => break SessionEnd::Failed(format!("read failed: {}", e)),
        }
    };

    session_end.cancel();
    end
}
