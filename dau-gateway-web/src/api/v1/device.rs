use actix_web::web::{self, Json, Path};
use dau_gateway_core::{
    facade::DeviceHeartbeat, registry::ConnectionInfo, DeviceCommand,
};
use dau_gateway_error::WebResult;
use dau_gateway_models::web::WebResponse;
use std::sync::Arc;
use tracing::instrument;

use super::firmware;
use crate::{api::respond, AppState};

pub(super) const ROUTER_PREFIX: &str = "/devices";

pub(crate) fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(connected))
        .route("/heartbeat", web::post().to(heartbeat_all))
        .route("/{device_id}/commands", web::post().to(command))
        .configure(firmware::configure_routes);
}

/// Devices with a live connection.
pub async fn connected(state: web::Data<Arc<AppState>>) -> WebResult<WebResponse<Vec<ConnectionInfo>>> {
    Ok(WebResponse::ok(state.facade.connected_devices()))
}

pub async fn heartbeat_all(
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<Vec<DeviceHeartbeat>>> {
    respond(state.facade.heartbeat_all().await)
}

#[instrument(name = "device-command", skip(state, body), fields(device_id = %path.as_str()))]
pub async fn command(
    path: Path<String>,
    body: Json<DeviceCommand>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<serde_json::Value>> {
    let device_id = path.into_inner();
    respond(state.facade.dispatch(&device_id, body.into_inner()).await)
}
