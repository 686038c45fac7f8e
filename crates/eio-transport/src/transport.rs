//! Transport seam between the HTTP layer and a session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use axum::extract::{ConnectInfo, Query, Request};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use eio_protocol::Packet;
use futures_util::future::BoxFuture;

/// Process-unique identity of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("unknown transport: {0}")]
    Unknown(String),

    #[error("invalid transport request: {0}")]
    BadRequest(String),
}

/// Receives everything a transport reads, plus its final close.
///
/// Implemented by the session. `on_packet` may hold the transport's read side
/// for as long as the session needs (a MESSAGE is only acknowledged once the
/// application has consumed it). `on_close` is reported exactly once per
/// transport and must not block.
pub trait PacketHandler: Send + Sync + 'static {
    fn on_packet(&self, from: TransportId, packet: Packet) -> BoxFuture<'_, ()>;

    fn on_close(&self, from: TransportId);
}

/// One client connection mechanism bound to one session.
pub trait Transport: Send + Sync + 'static {
    fn id(&self) -> TransportId;

    /// Registry name (`"polling"`, `"websocket"`).
    fn name(&self) -> &'static str;

    /// Queue a packet for the client. Never blocks.
    fn send(&self, packet: Packet) -> Result<(), TransportError>;

    /// Idempotent. The close is reported through `PacketHandler::on_close`,
    /// possibly after the transport finished flushing.
    fn close(&self);

    /// Take the packets queued for the client that have not been written yet.
    fn drain(&self) -> Vec<Packet>;

    fn is_closed(&self) -> bool;

    /// Serve one HTTP request addressed to this transport.
    fn serve(self: Arc<Self>, req: Request) -> BoxFuture<'static, Response>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Request snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// The parts of an HTTP request kept around after the body is consumed.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    query: HashMap<String, String>,
}

impl RequestInfo {
    pub fn from_request(req: &Request) -> Self {
        let query = Query::<HashMap<String, String>>::try_from_uri(req.uri())
            .map(|Query(q)| q)
            .unwrap_or_default();
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
            remote_addr: req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            query,
        }
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn has_query(&self, key: &str) -> bool {
        self.query.contains_key(key)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler link
// ─────────────────────────────────────────────────────────────────────────────

/// A transport's weak reference to its session, with once-only close reporting.
pub(crate) struct HandlerLink {
    id: TransportId,
    handler: Weak<dyn PacketHandler>,
    close_reported: AtomicBool,
}

impl HandlerLink {
    pub(crate) fn new(handler: Weak<dyn PacketHandler>) -> Self {
        Self {
            id: TransportId::next(),
            handler,
            close_reported: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> TransportId {
        self.id
    }

    pub(crate) async fn deliver(&self, packet: Packet) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_packet(self.id, packet).await;
        }
    }

    pub(crate) fn report_close(&self) {
        if self.close_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handler) = self.handler.upgrade() {
            handler.on_close(self.id);
        }
    }
}
