//! HTTP surface of the dau gateway.
mod api;

use actix_web::{
    dev::{Server, ServerHandle},
    middleware::{Logger, NormalizePath},
    web::{self, Data},
    App, HttpServer,
};
use async_trait::async_trait;
use dau_gateway_core::CommandFacade;
use dau_gateway_error::{init::InitContextError, DauError, DauResult};
use dau_gateway_models::{settings::Settings, WebServer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    facade: Arc<CommandFacade>,
}

impl AppState {
    pub fn new(facade: Arc<CommandFacade>) -> Self {
        Self { facade }
    }
}

/// Registers every route on `cfg`, with the API under `router_prefix`.
pub fn configure_app(router_prefix: &str) -> impl Fn(&mut web::ServiceConfig) + Clone + '_ {
    move |cfg| {
        cfg.configure(api::configure_public_routes)
            .service(web::scope(router_prefix).configure(api::configure_routes));
    }
}

#[derive(Clone)]
pub struct DauWebServer {
    server: Arc<Mutex<Option<ServerHandle>>>,
}

impl DauWebServer {
    fn create_server(settings: &Settings, facade: Arc<CommandFacade>) -> DauResult<Server> {
        let addr = format!("{}:{}", settings.web.host, settings.web.port);
        let router_prefix = settings.web.router_prefix.clone();
        let state = Arc::new(AppState::new(facade));

        let mut server = HttpServer::new(move || {
            App::new()
                .app_data(Data::new(Arc::clone(&state)))
                .wrap(Logger::default())
                .wrap(NormalizePath::trim())
                .configure(configure_app(&router_prefix))
        });
        if settings.web.workers > 0 {
            server = server.workers(settings.web.workers);
        }
        let server = server
            .bind(&addr)
            .map_err(|e| DauError::from(format!("Failed to bind HTTP server to {addr}: {e}")))?;
        info!(%addr, "web server bound");
        Ok(server.run())
    }

    /// Binds and spawns the HTTP server.
    #[instrument(name = "init-web-server", skip_all)]
    pub async fn init(
        settings: &Settings,
        facade: Arc<CommandFacade>,
    ) -> DauResult<Arc<Self>, InitContextError> {
        let server = Self::create_server(settings, facade)
            .map_err(|e| InitContextError::Primitive(format!("Failed to create web server: {e}")))?;
        let handle = server.handle();

        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "web server failed");
            }
        });

        Ok(Arc::new(DauWebServer {
            server: Arc::new(Mutex::new(Some(handle))),
        }))
    }
}

#[async_trait]
impl WebServer for DauWebServer {
    #[instrument(name = "web-server-stop", skip_all)]
    async fn stop(&self) -> DauResult<()> {
        if let Some(handle) = self.server.lock().await.take() {
            info!("stopping web server");
            handle.stop(true).await;
        }
        Ok(())
    }
}
