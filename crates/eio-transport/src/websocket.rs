//! WebSocket transport using Axum.
//!
//! One packet per frame in each direction. Outbound packets go through an
//! unbounded channel to a single writer task that owns the socket sink, so
//! frames never interleave. Packets sent before the HTTP upgrade completes
//! wait in that channel.

use std::sync::{Arc, Weak};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{FromRequestParts, Request, WebSocketUpgrade};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use eio_protocol::{MessageKind, Packet, decode_packet, encode_packet};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::registry::TransportFactory;
use crate::transport::{
    HandlerLink, PacketHandler, RequestInfo, Transport, TransportError, TransportId,
};

pub const NAME: &str = "websocket";

/// Creates websocket transports. Only accepts genuine upgrade requests.
pub struct WebSocketFactory;

impl TransportFactory for WebSocketFactory {
    fn name(&self) -> &'static str {
        NAME
    }

    fn handles_upgrades(&self) -> bool {
        true
    }

    fn create(
        &self,
        req: &RequestInfo,
        handler: Weak<dyn PacketHandler>,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let upgrade = req
            .header(header::UPGRADE.as_str())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let has_key = req.headers.contains_key(header::SEC_WEBSOCKET_KEY);
        if req.method != Method::GET || !upgrade || !has_key {
            return Err(TransportError::BadRequest(
                "websocket transport requires an upgrade request".into(),
            ));
        }
        Ok(Arc::new(WebSocketTransport::new(handler)))
    }
}

enum Phase {
    /// Waiting for the upgrade request to be served.
    Pending(mpsc::UnboundedReceiver<Packet>),
    Running,
    Closed,
}

pub struct WebSocketTransport {
    link: HandlerLink,
    outbound: mpsc::UnboundedSender<Packet>,
    phase: Mutex<Phase>,
    shutdown: watch::Sender<bool>,
}

impl WebSocketTransport {
    pub fn new(handler: Weak<dyn PacketHandler>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            link: HandlerLink::new(handler),
            outbound,
            phase: Mutex::new(Phase::Pending(outbound_rx)),
            shutdown,
        }
    }

    async fn run(self: Arc<Self>, socket: WebSocket, mut outbound: mpsc::UnboundedReceiver<Packet>) {
        let id = self.link.id();
        debug!("WebSocket established: {id}");

        let (mut sink, mut stream) = socket.split();

        let writer_shutdown = self.shutdown.subscribe();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    packet = outbound.recv() => {
                        let Some(packet) = packet else { break };
                        if let Err(e) = sink.send(frame_for(&packet)).await {
                            warn!("WebSocket write failed on {id}: {e}");
                            break;
                        }
                    }
                    _ = shutdown_signal(writer_shutdown.clone()) => {
                        while let Ok(packet) = outbound.try_recv() {
                            if sink.send(frame_for(&packet)).await.is_err() {
                                break;
                            }
                        }
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = shutdown_signal(self.shutdown.subscribe()) => break,
            };

            let decoded = match frame {
                Some(Ok(Message::Text(text))) => decode_packet(
                    MessageKind::Text,
                    Bytes::copy_from_slice(text.as_str().as_bytes()),
                ),
                Some(Ok(Message::Binary(data))) => decode_packet(MessageKind::Binary, data),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket closed by peer: {id}");
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error on {id}: {e}");
                    break;
                }
            };

            match decoded {
                Ok(packet) => self.link.deliver(packet).await,
                Err(e) => {
                    warn!("Malformed websocket frame on {id}: {e}");
                    break;
                }
            }
        }

        self.shutdown.send_replace(true);
        *self.phase.lock() = Phase::Closed;
        let _ = writer.await;
        self.link.report_close();
    }

    /// The upgrade never happened; nothing will run, so report now.
    fn abandon(&self) {
        self.shutdown.send_replace(true);
        *self.phase.lock() = Phase::Closed;
        self.link.report_close();
    }
}

impl Transport for WebSocketTransport {
    fn id(&self) -> TransportId {
        self.link.id()
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn send(&self, packet: Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound.send(packet).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let pending = {
            let mut phase = self.phase.lock();
            if matches!(*phase, Phase::Pending(_)) {
                *phase = Phase::Closed;
                true
            } else {
                false
            }
        };
        if pending {
            self.link.report_close();
        }
    }

    fn drain(&self) -> Vec<Packet> {
        let mut drained = Vec::new();
        if let Phase::Pending(rx) = &mut *self.phase.lock() {
            while let Ok(packet) = rx.try_recv() {
                drained.push(packet);
            }
        }
        drained
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn serve(self: Arc<Self>, req: Request) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            if !matches!(*self.phase.lock(), Phase::Pending(_)) {
                debug!("Stray request on websocket {}", self.link.id());
                return (StatusCode::BAD_REQUEST, "websocket transport already served")
                    .into_response();
            }

            let (mut parts, _body) = req.into_parts();
            let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                Ok(upgrade) => upgrade,
                Err(rejection) => {
                    warn!("WebSocket upgrade rejected on {}: {rejection}", self.link.id());
                    // Only the request that created the transport can upgrade it.
                    if matches!(*self.phase.lock(), Phase::Pending(_)) {
                        self.close();
                    }
                    return rejection.into_response();
                }
            };

            let outbound = {
                let mut phase = self.phase.lock();
                match std::mem::replace(&mut *phase, Phase::Running) {
                    Phase::Pending(rx) => rx,
                    other => {
                        *phase = other;
                        return (StatusCode::BAD_REQUEST, "websocket transport already served")
                            .into_response();
                    }
                }
            };

            let failed = self.clone();
            upgrade
                .on_failed_upgrade(move |e| {
                    warn!("WebSocket upgrade failed on {}: {e}", failed.link.id());
                    failed.abandon();
                })
                .on_upgrade(move |socket| self.run(socket, outbound))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn frame_for(packet: &Packet) -> Message {
    let frame = encode_packet(packet);
    match packet.kind {
        // A digit-headed binary frame still decodes as a text packet.
        MessageKind::Text => match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text.into()),
            Err(_) => Message::Binary(frame),
        },
        MessageKind::Binary => Message::Binary(frame),
    }
}

async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
