//! HTTP listener hosting an [`Engine`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::ServerConfig;
use crate::engine::{ConnectionHandler, Engine};
use crate::error::EngineError;

/// A bound listener serving one engine until stopped.
pub struct EngineServer<H> {
    engine: Arc<Engine<H>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl<H: ConnectionHandler> EngineServer<H> {
    /// Build an engine from `config` and start serving it.
    pub async fn start(config: ServerConfig, handler: H) -> Result<Self, EngineError> {
        let engine = Engine::new(config.engine.clone(), handler)?;
        Self::start_with_engine(&config, Arc::new(engine)).await
    }

    /// Serve an already-built engine. Its own config decides the path; only
    /// the listen address is taken from `config`.
    pub async fn start_with_engine(
        config: &ServerConfig,
        engine: Arc<Engine<H>>,
    ) -> Result<Self, EngineError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let app = engine.clone().router();

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!(
            "Engine listening on http://{}:{}{}",
            config.hostname,
            actual_port,
            engine.config().path
        );

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            engine,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    pub fn engine(&self) -> &Arc<Engine<H>> {
        &self.engine
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close every session, then stop accepting requests.
    pub async fn stop(&mut self) {
        self.engine.close_all().await;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Engine server stopped");
    }
}
