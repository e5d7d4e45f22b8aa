//! Broker Server — resilient fan-out over dynamic, cached and static
//! downstream services, with collaborator adapters and a background worker.

pub mod logging;
pub mod repository;
pub mod service;
pub mod traits;
pub mod transport;

pub use repository::InMemoryRepository;
pub use service::{BrokerConfig, BrokerError, KindRouter, ServiceBroker};
pub use traits::{HttpTransport, ServiceRepository, TaskScheduler};
pub use transport::{HttpResponse, ReqwestTransport, TransportError};
