//! Pod identity admission webhook library.

pub mod cert;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::WebhookConfig;
pub use http::HttpServer;
pub use lifecycle::{ShutdownCoordinator, TlsServerLifecycle};
