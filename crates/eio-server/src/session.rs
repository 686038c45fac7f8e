//! Session — one logical client connection across transport switches.
//!
//! A session owns exactly one current transport and, while an upgrade is in
//! flight, one upgrading transport:
//!
//! ```text
//! Normal{current} ──request on other transport──▶ Upgrading{current, upgrading}
//!        ▲                                              │
//!        └────── UPGRADE packet (promote) / abort ──────┘
//! Normal | Upgrading ──close()──▶ Closing{current} ──current reports closed──▶ Closed
//! ```
//!
//! Application traffic goes through [`Session::next_reader`] and
//! [`Session::next_writer`]. Heartbeat pings run in a task spawned at creation.

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::extract::Request;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use eio_protocol::{HandshakeParams, MessageKind, Packet, PacketType};
use eio_transport::{
    PacketHandler, RequestInfo, Transport, TransportError, TransportId, TransportRegistry,
};
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, OwnedMutexGuard, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// Heartbeat and upgrade settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub allow_upgrades: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            allow_upgrades: true,
        }
    }
}

/// Whoever tracks sessions by id. Told exactly once when a session is gone.
pub trait SessionOwner: Send + Sync + 'static {
    fn on_session_closed(&self, id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Normal,
    Upgrading,
    Closing,
    Closed,
}

enum Slots {
    Normal {
        current: Arc<dyn Transport>,
    },
    Upgrading {
        current: Arc<dyn Transport>,
        upgrading: Arc<dyn Transport>,
    },
    Closing {
        current: Arc<dyn Transport>,
    },
    Closed,
}

impl Slots {
    fn state(&self) -> SessionState {
        match self {
            Self::Normal { .. } => SessionState::Normal,
            Self::Upgrading { .. } => SessionState::Upgrading,
            Self::Closing { .. } => SessionState::Closing,
            Self::Closed => SessionState::Closed,
        }
    }

    fn current(&self) -> Option<&Arc<dyn Transport>> {
        match self {
            Self::Normal { current } | Self::Upgrading { current, .. } | Self::Closing { current } => {
                Some(current)
            }
            Self::Closed => None,
        }
    }

    fn upgrading(&self) -> Option<&Arc<dyn Transport>> {
        match self {
            Self::Upgrading { upgrading, .. } => Some(upgrading),
            _ => None,
        }
    }

    fn owns(&self, id: TransportId) -> bool {
        self.current().is_some_and(|t| t.id() == id) || self.upgrading().is_some_and(|t| t.id() == id)
    }
}

pub struct Session {
    id: String,
    request: RequestInfo,
    config: SessionConfig,
    registry: Arc<TransportRegistry>,
    owner: Arc<dyn SessionOwner>,
    slots: RwLock<Slots>,
    /// Serializes every write onto the transports.
    write_lock: Arc<tokio::sync::Mutex<()>>,
    inbound_tx: Mutex<Option<mpsc::Sender<MessageReader>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<MessageReader>>,
    /// PING or PONG seen from the peer.
    activity: Notify,
    /// Raised once, when the session starts closing.
    shutdown: watch::Sender<bool>,
}

impl Session {
    /// Create a session on the transport named by the request's `transport`
    /// query parameter, queue its OPEN packet, and start its heartbeat.
    pub fn new(
        id: impl Into<String>,
        request: RequestInfo,
        registry: Arc<TransportRegistry>,
        config: SessionConfig,
        owner: Arc<dyn SessionOwner>,
    ) -> Result<Arc<Self>, SessionError> {
        let name = request.query("transport").unwrap_or_default().to_string();
        let factory = registry
            .get(&name)
            .ok_or_else(|| SessionError::InvalidTransport(name.clone()))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);

        let mut created: Result<(), TransportError> = Ok(());
        let session = Arc::new_cyclic(|me: &Weak<Session>| {
            let handler: Weak<dyn PacketHandler> = me.clone();
            let slots = match factory.create(&request, handler) {
                Ok(current) => Slots::Normal { current },
                Err(e) => {
                    created = Err(e);
                    Slots::Closed
                }
            };
            Session {
                id: id.into(),
                request,
                config,
                registry,
                owner,
                slots: RwLock::new(slots),
                write_lock: Arc::new(tokio::sync::Mutex::new(())),
                inbound_tx: Mutex::new(Some(inbound_tx)),
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                activity: Notify::new(),
                shutdown,
            }
        });
        created?;

        let upgrades = if session.config.allow_upgrades {
            session.registry.upgrades_from(&name)
        } else {
            Vec::new()
        };
        let open = HandshakeParams::new(
            session.id.clone(),
            upgrades,
            session.config.ping_interval,
            session.config.ping_timeout,
        )
        .to_packet()?;
        if let Some(current) = session.current_transport() {
            current.send(open)?;
        }

        tokio::spawn(session.clone().heartbeat());
        info!("Session opened: {} ({name})", session.id);
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The request that created the session.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn state(&self) -> SessionState {
        self.slots.read().state()
    }

    pub fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.slots.read().current().cloned()
    }

    pub fn upgrading_transport(&self) -> Option<Arc<dyn Transport>> {
        self.slots.read().upgrading().cloned()
    }

    /// Name of the current transport.
    pub fn transport_name(&self) -> Option<&'static str> {
        self.slots.read().current().map(|t| t.name())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Application interface
    // ─────────────────────────────────────────────────────────────────────

    /// Wait for the next MESSAGE from the peer. Returns
    /// [`SessionError::EndOfStream`] once the session is closing or closed.
    ///
    /// The transport that delivered the message stays blocked until the
    /// returned reader is dropped.
    pub async fn next_reader(&self) -> Result<MessageReader, SessionError> {
        if self.is_shut_down() {
            return Err(SessionError::EndOfStream);
        }
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            _ = self.closed() => Err(SessionError::EndOfStream),
            reader = inbound.recv() => reader.ok_or(SessionError::EndOfStream),
        }
    }

    /// Start one outgoing MESSAGE. Holds the session write lock until the
    /// writer is closed or dropped.
    pub async fn next_writer(&self, kind: MessageKind) -> Result<MessageWriter, SessionError> {
        self.writable_transport()?;
        let guard = self.write_lock.clone().lock_owned().await;
        let transport = self.writable_transport()?;
        Ok(MessageWriter {
            kind,
            buf: BytesMut::new(),
            transport,
            _guard: guard,
        })
    }

    /// Close the session: drop any upgrade in flight, send CLOSE to the peer
    /// and close the current transport. No-op once closing has started.
    pub async fn close(&self) {
        let (current, upgrading) = {
            let mut slots = self.slots.write();
            match std::mem::replace(&mut *slots, Slots::Closed) {
                Slots::Normal { current } => {
                    *slots = Slots::Closing {
                        current: current.clone(),
                    };
                    (current, None)
                }
                Slots::Upgrading { current, upgrading } => {
                    *slots = Slots::Closing {
                        current: current.clone(),
                    };
                    (current, Some(upgrading))
                }
                other => {
                    *slots = other;
                    return;
                }
            }
        };

        debug!("Closing session {}", self.id);
        self.shutdown.send_replace(true);

        if let Some(upgrading) = upgrading {
            upgrading.close();
        }
        {
            let _guard = self.write_lock.lock().await;
            if let Err(e) = current.send(Packet::control(PacketType::Close)) {
                debug!("CLOSE not delivered on session {}: {e}", self.id);
            }
        }
        current.close();
    }

    // ─────────────────────────────────────────────────────────────────────
    // HTTP routing
    // ─────────────────────────────────────────────────────────────────────

    /// Serve a request carrying this session's id. A request naming a
    /// transport other than the current one starts an upgrade.
    pub async fn serve(self: &Arc<Self>, req: Request) -> Result<Response, SessionError> {
        let info = RequestInfo::from_request(&req);
        let name = info.query("transport").unwrap_or_default().to_string();
        let target = self.route(&name, &info)?;
        Ok(target.serve(req).await)
    }

    fn route(
        self: &Arc<Self>,
        name: &str,
        info: &RequestInfo,
    ) -> Result<Arc<dyn Transport>, SessionError> {
        {
            let slots = self.slots.read();
            match &*slots {
                Slots::Normal { current } | Slots::Closing { current } if current.name() == name => {
                    return Ok(current.clone());
                }
                Slots::Upgrading { current, upgrading } => {
                    if upgrading.name() == name {
                        return Ok(upgrading.clone());
                    }
                    if current.name() == name {
                        return Ok(current.clone());
                    }
                    return Err(SessionError::InvalidTransport(name.to_string()));
                }
                Slots::Normal { .. } => {}
                Slots::Closing { .. } | Slots::Closed => return Err(SessionError::EndOfStream),
            }
        }
        self.begin_upgrade(name, info)
    }

    fn begin_upgrade(
        self: &Arc<Self>,
        name: &str,
        info: &RequestInfo,
    ) -> Result<Arc<dyn Transport>, SessionError> {
        if !self.config.allow_upgrades {
            return Err(SessionError::UpgradeNotAllowed);
        }
        let factory = self
            .registry
            .get_upgrade(name)
            .ok_or_else(|| SessionError::InvalidTransport(name.to_string()))?;
        let weak: Weak<Session> = Arc::downgrade(self);
        let handler: Weak<dyn PacketHandler> = weak;
        let upgrading = factory.create(info, handler)?;

        let rejected = {
            let mut slots = self.slots.write();
            let current = match &*slots {
                Slots::Normal { current } => Some(current.clone()),
                _ => None,
            };
            match current {
                Some(current) => {
                    *slots = Slots::Upgrading {
                        current,
                        upgrading: upgrading.clone(),
                    };
                    None
                }
                None if slots.state() == SessionState::Upgrading => Some(SessionError::Upgrading),
                None => Some(SessionError::EndOfStream),
            }
        };
        if let Some(err) = rejected {
            upgrading.close();
            return Err(err);
        }

        debug!("Session {} upgrading to {name}", self.id);
        self.expire_upgrade(upgrading.id());
        Ok(upgrading)
    }

    /// Drop the upgrading transport if the client has not finished the switch
    /// within `ping_timeout`. Its close takes the abort path.
    fn expire_upgrade(self: &Arc<Self>, id: TransportId) {
        let session = Arc::downgrade(self);
        let timeout = self.config.ping_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(session) = session.upgrade() else { return };
            let stalled = match &*session.slots.read() {
                Slots::Upgrading { upgrading, .. } if upgrading.id() == id => {
                    Some(upgrading.clone())
                }
                _ => None,
            };
            if let Some(upgrading) = stalled {
                warn!("Upgrade to {} timed out on session {}", upgrading.name(), session.id);
                upgrading.close();
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Packet dispatch
    // ─────────────────────────────────────────────────────────────────────

    async fn dispatch(&self, from: TransportId, packet: Packet) {
        if !self.slots.read().owns(from) {
            debug!("Dropping {} from detached transport {from}", packet.packet_type);
            return;
        }

        match packet.packet_type {
            PacketType::Open | PacketType::Noop => {}
            PacketType::Close => {
                if let Some(current) = self.current_transport() {
                    current.close();
                }
            }
            PacketType::Ping => {
                self.answer_ping(from, packet.data).await;
                self.activity.notify_one();
            }
            PacketType::Pong => self.activity.notify_one(),
            PacketType::Message => self.deliver_message(packet).await,
            PacketType::Upgrade => self.finish_upgrade(from).await,
        }
    }

    /// PONG goes back on the transport that carried the PING. During an
    /// upgrade the current transport also gets a NOOP so a parked poll
    /// returns and the client can move on.
    async fn answer_ping(&self, from: TransportId, data: Bytes) {
        let (current, upgrading) = {
            let slots = self.slots.read();
            (slots.current().cloned(), slots.upgrading().cloned())
        };

        let _guard = self.write_lock.lock().await;
        if let (Some(current), Some(_)) = (&current, &upgrading) {
            if let Err(e) = current.send(Packet::control(PacketType::Noop)) {
                debug!("NOOP not delivered on session {}: {e}", self.id);
            }
        }
        let reply_on = upgrading
            .into_iter()
            .chain(current)
            .find(|t| t.id() == from);
        if let Some(transport) = reply_on {
            if let Err(e) = transport.send(Packet::pong(data)) {
                debug!("PONG not delivered on session {}: {e}", self.id);
            }
        }
    }

    async fn deliver_message(&self, packet: Packet) {
        let inbound = self.inbound_tx.lock().clone();
        let Some(inbound) = inbound else { return };

        let (done_tx, done_rx) = oneshot::channel();
        let reader = MessageReader {
            kind: packet.kind,
            data: packet.data,
            done: Some(done_tx),
        };

        tokio::select! {
            sent = inbound.send(reader) => {
                if sent.is_err() {
                    return;
                }
            }
            _ = self.closed() => return,
        }
        tokio::select! {
            _ = done_rx => {}
            _ = self.closed() => {}
        }
    }

    /// Promote the upgrading transport. Packets still queued on the old one
    /// move over in order, so no write accepted before the switch is lost.
    async fn finish_upgrade(&self, from: TransportId) {
        let _guard = self.write_lock.lock().await;
        let promoted = {
            let mut slots = self.slots.write();
            match std::mem::replace(&mut *slots, Slots::Closed) {
                Slots::Upgrading { current, upgrading } if upgrading.id() == from => {
                    let carried = current.drain();
                    *slots = Slots::Normal {
                        current: upgrading.clone(),
                    };
                    Some((current, upgrading, carried))
                }
                other => {
                    *slots = other;
                    None
                }
            }
        };

        let Some((previous, current, carried)) = promoted else {
            debug!("Ignoring UPGRADE from {from} on session {}", self.id);
            return;
        };

        let carried: Vec<Packet> = carried
            .into_iter()
            .filter(|packet| packet.packet_type != PacketType::Noop)
            .collect();
        if !carried.is_empty() {
            debug!(
                "Moving {} queued packet(s) to {} on session {}",
                carried.len(),
                current.name(),
                self.id
            );
        }
        for packet in carried {
            if let Err(e) = current.send(packet) {
                warn!("Queued packet lost on session {}: {e}", self.id);
            }
        }

        info!(
            "Session {} upgraded: {} -> {}",
            self.id,
            previous.name(),
            current.name()
        );
        previous.close();
    }

    fn transport_closed(&self, from: TransportId) {
        enum Outcome {
            AbortUpgrade,
            Teardown(Option<Arc<dyn Transport>>),
            Ignore,
        }

        let outcome = {
            let mut slots = self.slots.write();
            match std::mem::replace(&mut *slots, Slots::Closed) {
                Slots::Upgrading { current, upgrading } if upgrading.id() == from => {
                    *slots = Slots::Normal { current };
                    Outcome::AbortUpgrade
                }
                Slots::Upgrading { current, upgrading } if current.id() == from => {
                    Outcome::Teardown(Some(upgrading))
                }
                Slots::Normal { current } | Slots::Closing { current } if current.id() == from => {
                    Outcome::Teardown(None)
                }
                other => {
                    *slots = other;
                    Outcome::Ignore
                }
            }
        };

        match outcome {
            Outcome::AbortUpgrade => debug!("Upgrade aborted on session {}", self.id),
            Outcome::Teardown(upgrading) => {
                self.shutdown.send_replace(true);
                self.inbound_tx.lock().take();
                if let Some(upgrading) = upgrading {
                    upgrading.close();
                }
                info!("Session closed: {}", self.id);
                self.owner.on_session_closed(&self.id);
            }
            Outcome::Ignore => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Heartbeat
    // ─────────────────────────────────────────────────────────────────────

    async fn heartbeat(self: Arc<Self>) {
        let mut last_activity = Instant::now();
        let mut last_ping = last_activity;

        loop {
            let ping_at = last_ping + self.config.ping_interval;
            let dead_at = last_activity + self.config.ping_timeout;

            tokio::select! {
                _ = self.closed() => return,
                _ = self.activity.notified() => {
                    last_activity = Instant::now();
                    last_ping = last_activity;
                }
                _ = sleep_until(ping_at) => {
                    self.send_ping().await;
                    last_ping = Instant::now();
                }
                _ = sleep_until(dead_at) => {
                    warn!("Ping timeout on session {}", self.id);
                    self.close().await;
                    return;
                }
            }
        }
    }

    async fn send_ping(&self) {
        let Some(current) = self.current_transport() else { return };
        let _guard = self.write_lock.lock().await;
        if let Err(e) = current.send(Packet::ping(Bytes::new())) {
            debug!("PING not delivered on session {}: {e}", self.id);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    fn writable_transport(&self) -> Result<Arc<dyn Transport>, SessionError> {
        match &*self.slots.read() {
            Slots::Normal { current } => Ok(current.clone()),
            Slots::Upgrading { .. } => Err(SessionError::Upgrading),
            Slots::Closing { .. } | Slots::Closed => Err(SessionError::EndOfStream),
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once the session starts closing.
    async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl PacketHandler for Session {
    fn on_packet(&self, from: TransportId, packet: Packet) -> BoxFuture<'_, ()> {
        Box::pin(self.dispatch(from, packet))
    }

    fn on_close(&self, from: TransportId) {
        self.transport_closed(from);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader / writer
// ─────────────────────────────────────────────────────────────────────────────

/// One inbound MESSAGE. Dropping it releases the transport that delivered it.
#[derive(Debug)]
pub struct MessageReader {
    kind: MessageKind,
    data: Bytes,
    done: Option<oneshot::Sender<()>>,
}

impl MessageReader {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Unread part of the payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(mut self) -> Bytes {
        std::mem::take(&mut self.data)
    }
}

impl io::Read for MessageReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len());
        let chunk = self.data.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}

impl Drop for MessageReader {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// One outbound MESSAGE, buffered until [`close`](Self::close).
pub struct MessageWriter {
    kind: MessageKind,
    buf: BytesMut,
    transport: Arc<dyn Transport>,
    _guard: OwnedMutexGuard<()>,
}

impl MessageWriter {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Hand the finished packet to the transport and release the write lock.
    pub fn close(self) -> Result<(), SessionError> {
        if self.kind == MessageKind::Text && std::str::from_utf8(&self.buf).is_err() {
            return Err(SessionError::InvalidText);
        }
        self.transport
            .send(Packet::message(self.kind, self.buf.freeze()))?;
        Ok(())
    }
}

impl io::Write for MessageWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("kind", &self.kind)
            .field("len", &self.buf.len())
            .field("transport", &self.transport.name())
            .finish()
    }
}
