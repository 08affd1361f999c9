//! Process-level plumbing shared by the dau gateway binaries: logging and
//! signal-driven graceful shutdown.
mod logger;

pub use dau_gateway_error::{DauError, DauResult};
pub use logger::Logger;

use dau_gateway_models::{settings::Settings, Gateway, WebServer};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
#[cfg(windows)]
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, instrument, warn, Level};

pub struct DauAppContext {
    settings: Settings,
    logger: Logger,
    gateway: Option<Arc<dyn Gateway>>,
    web_server: Option<Arc<dyn WebServer>>,
    /// Flag to prevent duplicate shutdowns
    shutting_down: AtomicBool,
    shutdown_token: CancellationToken,
}

impl DauAppContext {
    /// Loads settings and installs the global logger.
    pub fn init(config: &str) -> DauResult<Self> {
        let settings = Settings::new(config)?;
        let level = Logger::parse_level(&settings.general.log_level).unwrap_or(
            if cfg!(debug_assertions) {
                Level::DEBUG
            } else {
                Level::INFO
            },
        );
        let mut logger = Logger::new(Some(level), settings.general.log_dir.clone());
        logger.initialize()?;
        info!(config, level = %level, "settings loaded");

        Ok(DauAppContext {
            settings,
            logger,
            gateway: None,
            web_server: None,
            shutting_down: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
        })
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_gateway(&mut self, gateway: Arc<dyn Gateway>) {
        self.gateway = Some(gateway);
    }

    pub fn set_web_server(&mut self, web_server: Arc<dyn WebServer>) {
        self.web_server = Some(web_server);
    }

    #[inline]
    pub fn change_log_level(&self, level: Level) {
        self.logger.set_level(level);
    }

    /// Token cancelled when shutdown starts; hand it to anything that should
    /// trigger or observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Blocks until a termination signal or the shutdown token, then stops
    /// every registered component.
    pub async fn run(&self) -> DauResult<()> {
        wait_for_shutdown(&self.shutdown_token).await?;
        self.graceful_shutdown().await
    }

    #[instrument(name = "graceful-shutdown", skip_all)]
    pub async fn graceful_shutdown(&self) -> DauResult<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_token.cancel();
        info!("Starting graceful shutdown");

        let tracker = TaskTracker::new();
        if let Some(web_server) = &self.web_server {
            let web_server = Arc::clone(web_server);
            tracker.spawn(async move {
                if let Err(e) = web_server.stop().await {
                    warn!(error = %e, "web server stop failed");
                }
            });
        }
        if let Some(gateway) = &self.gateway {
            let gateway = Arc::clone(gateway);
            tracker.spawn(async move {
                if let Err(e) = gateway.stop().await {
                    warn!(error = %e, "gateway stop failed");
                }
            });
        }

        tracker.close();
        let budget = self.settings.listener.shutdown_drain_timeout() + Duration::from_secs(5);
        if tokio::time::timeout(budget, tracker.wait()).await.is_err() {
            warn!(?budget, "components did not stop in time");
            return Err(DauError::ShutdownError("shutdown timed out".into()));
        }
        info!("Graceful shutdown completed");
        Ok(())
    }
}

/// Resolves on SIGTERM, SIGINT or SIGQUIT (ctrl-c on windows), or when
/// `token` is cancelled.
pub async fn wait_for_shutdown(token: &CancellationToken) -> DauResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM signal"),
            _ = sigint.recv() => info!("Received SIGINT signal"),
            _ = sigquit.recv() => info!("Received SIGQUIT signal"),
            _ = token.cancelled() => {}
        }
    }

    #[cfg(windows)]
    {
        tokio::select! {
            _ = ctrl_c() => info!("Received ctrl-c signal"),
            _ = token.cancelled() => {}
        }
    }

    Ok(())
}
