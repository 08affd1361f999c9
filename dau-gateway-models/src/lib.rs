pub mod constants;
pub mod settings;
pub mod web;

use async_trait::async_trait;
use dau_gateway_error::DauResult;

/// Device-communication backbone as seen by the process lifecycle.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Bind listeners and spawn background tasks.
    async fn start(&self) -> DauResult<()>;

    /// Stop accepting, close every device connection and wait for tasks to drain.
    async fn stop(&self) -> DauResult<()>;
}

/// Northbound HTTP surface.
#[async_trait]
pub trait WebServer: Send + Sync + 'static {
    /// Gracefully stops the web server.
    async fn stop(&self) -> DauResult<()>;
}
