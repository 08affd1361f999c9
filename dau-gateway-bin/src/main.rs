use clap::Parser;
use dau_gateway_common::DauAppContext;
use dau_gateway_core::DauGateway;
use dau_gateway_error::{DauError, DauResult};
use dau_gateway_models::{constants::DEFAULT_CONFIG_FILE_NAME, Gateway};
use dau_gateway_web::DauWebServer;
use std::{env::current_dir, path::PathBuf};
use tracing::info;

/// DAU Gateway - server-side backbone for data acquisition units
///
/// Accepts DAU connections, drives their command protocol, negotiates
/// unicast PTP leases and forwards retrieved datasets to the archive.
#[derive(Parser)]
#[command(name = "dau-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "DAU Gateway", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, the gateway looks for 'dau-gateway.toml'
    /// in the current working directory.
    #[arg(short, long, env = "DAU_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> DauResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => {
            let dir = current_dir()
                .map_err(|e| DauError::from(format!("Failed to get current directory: {e}")))?;
            dir.join(DEFAULT_CONFIG_FILE_NAME)
        }
    };

    let mut ctx = DauAppContext::init(&config_path.to_string_lossy())?;
    let settings = ctx.settings().clone();

    let gateway = DauGateway::init(&settings)?;
    gateway.start().await?;
    ctx.set_gateway(gateway.clone());

    if settings.web.enabled {
        let web_server = DauWebServer::init(&settings, gateway.facade()).await?;
        ctx.set_web_server(web_server);
    }

    info!(
        server_id = %settings.general.server_id,
        listener = ?gateway.local_addr(),
        "dau gateway ready"
    );
    ctx.run().await
}
