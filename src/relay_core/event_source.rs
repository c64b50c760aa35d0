use crate::relay_core::types::{RawEvent, SubscriptionFilter};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("no relay endpoints configured")]
    NoEndpoints,
    #[error("none of the {attempted} relay endpoints were reachable")]
    NoEndpointReachable { attempted: usize },
    #[error("not connected to any relay")]
    NotConnected,
    #[error("relay stream permanently closed: {0}")]
    StreamClosed(String),
    #[error("transport hiccup: {0}")]
    Transient(String),
}

impl TransportError {
    /// Fatal errors end the monitor loop; everything else is retried after a backoff.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Transient(_))
    }
}

/// Source of relay events for the monitor loop.
///
/// Implementations buffer events as they arrive; `drain` hands over whatever
/// is buffered without waiting for more.
#[async_trait]
pub trait EventSource: Send {
    /// Connect to every endpoint, returning how many succeeded.
    /// Fails when the list is empty or nothing was reachable.
    async fn connect(&mut self, endpoints: &[String]) -> Result<usize, TransportError>;

    /// Open a subscription on every connected endpoint and return its id.
    async fn subscribe(&mut self, filter: &SubscriptionFilter) -> Result<String, TransportError>;

    /// Take all currently buffered events.
    async fn drain(&mut self) -> Result<Vec<RawEvent>, TransportError>;

    /// Close subscriptions and connections.
    async fn close(&mut self);

    /// Source name for logging
    fn source_type(&self) -> &'static str;
}
