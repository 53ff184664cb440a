//! Lazily connected bus handle
//!
//! Each component (relay publisher, consumer, DLQ publisher) owns one
//! [`LazyBus`]. The connection is opened on first use, reused afterwards,
//! and released by [`LazyBus::disconnect`].

use crate::{BusError, BusResult, EventBus, InMemoryBus, NatsBus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Opens a connection to a concrete bus
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> BusResult<Arc<dyn EventBus>>;
}

/// Connects to a NATS server
#[derive(Debug, Clone)]
pub struct NatsConnector {
    url: String,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    async fn connect(&self) -> BusResult<Arc<dyn EventBus>> {
        tracing::info!(url = %self.url, "Connecting to NATS");
        let client = async_nats::connect(&self.url)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        Ok(Arc::new(NatsBus::new(client)))
    }
}

/// The in-memory bus is always "connected"; every connect shares its channel
#[async_trait]
impl BusConnector for InMemoryBus {
    async fn connect(&self) -> BusResult<Arc<dyn EventBus>> {
        Ok(Arc::new(self.clone()))
    }
}

enum ConnectionState {
    Disconnected,
    Connected(Arc<dyn EventBus>),
}

pub struct LazyBus {
    connector: Arc<dyn BusConnector>,
    state: Mutex<ConnectionState>,
}

impl LazyBus {
    pub fn new(connector: Arc<dyn BusConnector>) -> Self {
        Self {
            connector,
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    /// Return the live connection, opening it if needed
    ///
    /// Concurrent callers share a single connect attempt. A failed attempt
    /// leaves the handle disconnected so the next call tries again.
    pub async fn get(&self) -> BusResult<Arc<dyn EventBus>> {
        let mut state = self.state.lock().await;
        if let ConnectionState::Connected(bus) = &*state {
            return Ok(bus.clone());
        }

        let bus = self.connector.connect().await?;
        *state = ConnectionState::Connected(bus.clone());
        Ok(bus)
    }

    /// Flush and drop the connection. Safe to call when not connected.
    pub async fn disconnect(&self) -> BusResult<()> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, ConnectionState::Disconnected);

        if let ConnectionState::Connected(bus) = previous {
            bus.flush().await?;
            tracing::debug!("Bus connection released");
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, ConnectionState::Connected(_))
    }
}
