//! Engine — the HTTP entry point.
//!
//! Every request under the configured path lands in [`Engine::handle`]:
//! requests without a `sid` open a session (handshake), requests with one are
//! routed to that session, which picks the transport.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use eio_protocol::{EngineErrorCode, ProtocolError};
use eio_transport::{RequestInfo, TransportError, TransportRegistry};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, SessionError};
use crate::session::{Session, SessionState};
use crate::store::{SessionIdGenerator, SessionStore, UuidGenerator};

/// Called once for every newly opened session.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Runs on its own task; the session is already registered and its OPEN
    /// packet queued.
    fn on_connect(&self, session: Arc<Session>) -> impl Future<Output = ()> + Send;
}

/// Query parameters the engine itself looks at. Transports read the rest.
#[derive(Debug, Default, Deserialize)]
struct EngineQuery {
    transport: Option<String>,
    sid: Option<String>,
    #[serde(rename = "EIO")]
    eio: Option<String>,
}

pub struct Engine<H> {
    config: EngineConfig,
    registry: Arc<TransportRegistry>,
    store: Arc<SessionStore>,
    ids: Box<dyn SessionIdGenerator>,
    handler: Arc<H>,
}

impl<H: ConnectionHandler> Engine<H> {
    /// Engine with the built-in transports, limited to `config.transports`.
    pub fn new(config: EngineConfig, handler: H) -> Result<Self, EngineError> {
        let registry = TransportRegistry::with_defaults(&config.transport_options());
        Self::with_registry(config, registry, handler)
    }

    /// Engine over a caller-built registry, still limited to `config.transports`.
    pub fn with_registry(
        config: EngineConfig,
        registry: TransportRegistry,
        handler: H,
    ) -> Result<Self, EngineError> {
        let registry = registry.restrict(config.transports.as_slice())?;
        if registry.is_empty() {
            return Err(TransportError::Unknown("no transports enabled".into()).into());
        }
        Ok(Self {
            config,
            registry: Arc::new(registry),
            store: Arc::new(SessionStore::new()),
            ids: Box::new(UuidGenerator),
            handler: Arc::new(handler),
        })
    }

    pub fn with_id_generator(mut self, ids: impl SessionIdGenerator) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.store.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Close every open session.
    pub async fn close_all(&self) {
        self.store.close_all().await;
    }

    /// Axum router serving the engine path (with and without trailing slash)
    /// and `/health`.
    pub fn router(self: Arc<Self>) -> Router {
        let base = self.config.path.trim_matches('/').to_string();
        let enable_cors = self.config.enable_cors;

        let mut router = Router::new().route("/health", get(health_handler::<H>));
        router = if base.is_empty() {
            router.route("/", any(engine_handler::<H>))
        } else {
            router
                .route(&format!("/{base}"), any(engine_handler::<H>))
                .route(&format!("/{base}/"), any(engine_handler::<H>))
        };
        let router = router.with_state(self);

        if enable_cors {
            router.layer(CorsLayer::very_permissive())
        } else {
            router
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Request handling
    // ─────────────────────────────────────────────────────────────────────

    pub async fn handle(&self, req: Request) -> Response {
        if req.method() == Method::OPTIONS {
            return StatusCode::OK.into_response();
        }

        let query = Query::<EngineQuery>::try_from_uri(req.uri())
            .map(|Query(q)| q)
            .unwrap_or_default();

        if query.eio.as_deref().is_some_and(|v| v != "3") {
            return error_response(
                StatusCode::BAD_REQUEST,
                EngineErrorCode::UnsupportedProtocolVersion.into(),
            );
        }

        let transport = query.transport.as_deref().unwrap_or_default();
        if self.registry.get(transport).is_none() {
            debug!("Rejected request for transport {transport:?}");
            return error_response(StatusCode::BAD_REQUEST, ProtocolError::unknown_transport());
        }

        match query.sid {
            None => self.handshake(req).await,
            Some(sid) => match self.store.get(&sid) {
                Some(session) => match session.serve(req).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        debug!("Request on session {sid} failed: {e}");
                        session_error_response(&e)
                    }
                },
                None => error_response(StatusCode::BAD_REQUEST, ProtocolError::unknown_sid()),
            },
        }
    }

    async fn handshake(&self, req: Request) -> Response {
        if req.method() != Method::GET {
            return error_response(StatusCode::BAD_REQUEST, ProtocolError::bad_handshake_method());
        }
        if let Some(max) = self.config.max_sessions {
            if self.store.len() >= max {
                warn!("Handshake rejected: max sessions reached ({max})");
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    ProtocolError::forbidden("Too many sessions"),
                );
            }
        }

        let id = self.ids.generate();
        let session = match Session::new(
            id.clone(),
            RequestInfo::from_request(&req),
            self.registry.clone(),
            self.config.session_config(),
            self.store.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!("Handshake failed: {e}");
                return session_error_response(&e);
            }
        };

        if !self.store.insert(session.clone()) {
            warn!("Session id collision: {id}");
            session.close().await;
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ProtocolError::bad_request("Session id collision"),
            );
        }
        // Closed before it was stored, so the store was never told.
        if session.state() == SessionState::Closed {
            self.store.remove(&id);
        }

        let handler = self.handler.clone();
        let connected = session.clone();
        tokio::spawn(async move { handler.on_connect(connected).await });

        let mut resp = match session.serve(req).await {
            Ok(resp) => resp,
            Err(e) => return session_error_response(&e),
        };

        if let Some(cookie) = &self.config.cookie {
            match HeaderValue::from_str(&format!("{cookie}={id}; Path=/; HttpOnly; SameSite=Lax")) {
                Ok(value) => {
                    resp.headers_mut().append(header::SET_COOKIE, value);
                }
                Err(e) => warn!("Cannot set session cookie {cookie:?}: {e}"),
            }
        }

        info!("Handshake complete: {id}");
        resp
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn engine_handler<H: ConnectionHandler>(
    State(engine): State<Arc<Engine<H>>>,
    req: Request,
) -> Response {
    engine.handle(req).await
}

async fn health_handler<H: ConnectionHandler>(
    State(engine): State<Arc<Engine<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": engine.session_count(),
    }))
}

fn error_response(status: StatusCode, error: ProtocolError) -> Response {
    (status, Json(error)).into_response()
}

fn session_error_response(err: &SessionError) -> Response {
    match err {
        SessionError::InvalidTransport(_) | SessionError::Transport(TransportError::Unknown(_)) => {
            error_response(StatusCode::BAD_REQUEST, ProtocolError::unknown_transport())
        }
        SessionError::Handshake(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ProtocolError::bad_request(err.to_string()),
        ),
        _ => error_response(StatusCode::BAD_REQUEST, ProtocolError::bad_request(err.to_string())),
    }
}
