pub mod error_handler;
pub mod event_filter;
pub mod event_source;
pub mod relay_client;
pub mod types;

pub use event_filter::{EventFilter, FilterConfig, FilterError, QualifyingEvent};
pub use event_source::{EventSource, TransportError};
pub use relay_client::{RelayPool, RelayPoolConfig};
pub use types::{RawEvent, SubscriptionFilter};
