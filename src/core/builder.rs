use std::sync::Arc;

use crate::{
    core::BrokerConfig,
    device::ConnectorRef,
    error::ConfigError,
    subscribers::Subscribe,
};

use super::broker::Broker;

/// Builder for a [`Broker`].
pub struct BrokerBuilder {
    cfg: BrokerConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    connector: Option<ConnectorRef>,
}

impl BrokerBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: BrokerConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            connector: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (connects, leases, jobs, shutdown)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the connector used by the reconnection scheduler. Required.
    pub fn with_connector(mut self, connector: ConnectorRef) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the broker.
    ///
    /// Initializes the event bus, the session registry and the subscriber
    /// workers. Background sweeps start with [`Broker::start`] or [`Broker::run`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Arc<Broker>, ConfigError> {
        let connector = self.connector.ok_or(ConfigError::MissingConnector)?;
        Ok(Arc::new(Broker::new_internal(
            self.cfg,
            self.subscribers,
            connector,
        )))
    }
}
