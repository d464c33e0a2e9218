pub mod api;
pub mod auth;
pub mod metrics;
pub mod retry;

pub use api::{AffinityRow, BackendClient, PostRow};
pub use auth::{AuthSession, IdentityHandle};
pub use metrics::{ApiMetrics, EndpointMetrics, MetricsCollector, RequestMetrics};
pub use retry::{RetryConfig, RetryExecutor};
