//! HTTP long-polling transport.
//!
//! Outbound packets are queued. A pending GET is woken on every send and
//! answers with everything queued so far encoded as one payload, so several
//! sends between two polls coalesce into a single response. A POST body is
//! decoded as a payload and each packet is handed to the session in order
//! before the POST is answered. Only one GET and one POST may be in flight.

use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use eio_protocol::{Packet, PacketType, PayloadEncoder, PayloadFormat, decode_payload};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::registry::{TransportFactory, TransportOptions};
use crate::transport::{
    HandlerLink, PacketHandler, RequestInfo, Transport, TransportError, TransportId,
};

pub const NAME: &str = "polling";

/// Creates polling transports; `b64` in the query selects text framing.
pub struct PollingFactory {
    options: TransportOptions,
}

impl PollingFactory {
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }
}

impl TransportFactory for PollingFactory {
    fn name(&self) -> &'static str {
        NAME
    }

    fn handles_upgrades(&self) -> bool {
        false
    }

    fn create(
        &self,
        req: &RequestInfo,
        handler: Weak<dyn PacketHandler>,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let format = if req.has_query("b64") {
            PayloadFormat::Text
        } else {
            PayloadFormat::Binary
        };
        Ok(Arc::new(PollingTransport::new(format, &self.options, handler)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// Closed locally while a GET was pending; that GET flushes and finishes the close.
    Closing,
    Closed,
}

struct PollState {
    phase: Phase,
    /// Encoded into one payload when a GET flushes.
    queue: Vec<Packet>,
    /// A GET is currently parked on this transport.
    polling: bool,
    /// A POST body is being dispatched.
    posting: bool,
}

pub struct PollingTransport {
    link: HandlerLink,
    state: Mutex<PollState>,
    ready: Notify,
    format: PayloadFormat,
    poll_timeout: Duration,
    max_body: usize,
}

impl PollingTransport {
    pub fn new(
        format: PayloadFormat,
        options: &TransportOptions,
        handler: Weak<dyn PacketHandler>,
    ) -> Self {
        Self {
            link: HandlerLink::new(handler),
            state: Mutex::new(PollState {
                phase: Phase::Open,
                queue: Vec::new(),
                polling: false,
                posting: false,
            }),
            ready: Notify::new(),
            format,
            poll_timeout: options.poll_timeout,
            max_body: options.max_http_buffer_size,
        }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// GET: park until something is queued, the transport closes, or the poll
    /// times out, then answer with the whole queue (NOOP when empty).
    async fn poll(&self) -> Response {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return bad_request("transport closed");
            }
            if state.polling {
                warn!("Overlapping poll on {}", self.link.id());
                return bad_request("overlapping poll");
            }
            state.polling = true;
        }
        let guard = PollGuard(self);

        let deadline = Instant::now() + self.poll_timeout;
        loop {
            let notified = self.ready.notified();
            {
                let state = self.state.lock();
                if !state.queue.is_empty() || state.phase != Phase::Open {
                    break;
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let packets = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.queue)
        };
        let mut payload = PayloadEncoder::new(self.format);
        if packets.is_empty() {
            payload.push(&Packet::control(PacketType::Noop));
        }
        for packet in &packets {
            payload.push(packet);
        }
        debug!("Flushing {} packet(s) on {}", payload.len(), self.link.id());
        let body = payload.take();
        drop(guard);

        payload_response(self.format, body)
    }

    /// POST: decode the body and dispatch every packet before answering.
    async fn deliver(&self, body: Body) -> Response {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Open {
                return bad_request("transport closed");
            }
            if state.posting {
                warn!("Overlapping post on {}", self.link.id());
                return bad_request("overlapping post");
            }
            state.posting = true;
        }
        let _guard = PostGuard(self);

        let bytes = match axum::body::to_bytes(body, self.max_body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Rejected polling body on {}: {e}", self.link.id());
                return (StatusCode::PAYLOAD_TOO_LARGE, "payload too large").into_response();
            }
        };

        let packets = match decode_payload(bytes) {
            Ok(packets) => packets,
            Err(e) => {
                warn!("Malformed polling payload on {}: {e}", self.link.id());
                self.close();
                return bad_request("malformed payload");
            }
        };

        for packet in packets {
            self.link.deliver(packet).await;
        }

        (
            [(header::CONTENT_TYPE, "text/html; charset=UTF-8")],
            "ok",
        )
            .into_response()
    }
}

/// Ends a parked GET even when the request future is dropped mid-wait.
struct PollGuard<'a>(&'a PollingTransport);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        let finish_close = {
            let mut state = self.0.state.lock();
            state.polling = false;
            if state.phase == Phase::Closing {
                state.phase = Phase::Closed;
                true
            } else {
                false
            }
        };
        if finish_close {
            self.0.link.report_close();
        }
    }
}

/// Lets the next POST in once this one is answered or dropped.
struct PostGuard<'a>(&'a PollingTransport);

impl Drop for PostGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().posting = false;
    }
}

impl Transport for PollingTransport {
    fn id(&self) -> TransportId {
        self.link.id()
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn send(&self, packet: Packet) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Open {
                return Err(TransportError::Closed);
            }
            state.queue.push(packet);
        }
        self.ready.notify_one();
        Ok(())
    }

    fn close(&self) {
        let report_now = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Open if state.polling => {
                    state.phase = Phase::Closing;
                    false
                }
                Phase::Open => {
                    state.phase = Phase::Closed;
                    true
                }
                Phase::Closing | Phase::Closed => return,
            }
        };
        if report_now {
            self.link.report_close();
        } else {
            self.ready.notify_one();
        }
    }

    fn drain(&self) -> Vec<Packet> {
        std::mem::take(&mut self.state.lock().queue)
    }

    fn is_closed(&self) -> bool {
        self.state.lock().phase != Phase::Open
    }

    fn serve(self: Arc<Self>, req: Request) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            match *req.method() {
                Method::GET => self.poll().await,
                Method::POST => self.deliver(req.into_body()).await,
                _ => bad_request("unsupported method"),
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn payload_response(format: PayloadFormat, body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, format.content_type())], body).into_response()
}

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}
