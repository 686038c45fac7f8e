//! TransportRegistry — name → factory table shared by every session.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::polling::PollingFactory;
use crate::transport::{PacketHandler, RequestInfo, Transport, TransportError};
use crate::websocket::WebSocketFactory;

/// Tunables handed to the built-in transport factories.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// How long a polling GET may stay open without traffic
    pub poll_timeout: Duration,
    /// Maximum accepted polling POST body, in bytes
    pub max_http_buffer_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(30),
            max_http_buffer_size: 1_000_000,
        }
    }
}

/// Creates transports of one kind.
pub trait TransportFactory: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Whether a session may switch to this transport mid-life.
    fn handles_upgrades(&self) -> bool;

    /// Build a transport for the request that asked for it. Fails when the
    /// request cannot be served by this kind of transport.
    fn create(
        &self,
        req: &RequestInfo,
        handler: Weak<dyn PacketHandler>,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Registered transport kinds, in preference order.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: Vec<Arc<dyn TransportFactory>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `polling` and `websocket`.
    pub fn with_defaults(options: &TransportOptions) -> Self {
        let mut registry = Self::new();
        registry
            .register(PollingFactory::new(options.clone()))
            .register(WebSocketFactory);
        registry
    }

    /// Add a factory, replacing any factory with the same name.
    pub fn register(&mut self, factory: impl TransportFactory) -> &mut Self {
        let factory: Arc<dyn TransportFactory> = Arc::new(factory);
        match self.factories.iter_mut().find(|f| f.name() == factory.name()) {
            Some(existing) => *existing = factory,
            None => self.factories.push(factory),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TransportFactory>> {
        self.factories.iter().find(|f| f.name() == name).cloned()
    }

    /// Like [`get`](Self::get), but only for upgrade-capable transports.
    pub fn get_upgrade(&self, name: &str) -> Option<Arc<dyn TransportFactory>> {
        self.get(name).filter(|f| f.handles_upgrades())
    }

    /// Upgrade targets advertised to a session created on `current`.
    pub fn upgrades_from(&self, current: &str) -> Vec<String> {
        self.factories
            .iter()
            .filter(|f| f.handles_upgrades() && f.name() != current)
            .map(|f| f.name().to_string())
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Keep only the named transports, in the given order.
    pub fn restrict<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, TransportError> {
        let factories = names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .ok_or_else(|| TransportError::Unknown(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { factories })
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
