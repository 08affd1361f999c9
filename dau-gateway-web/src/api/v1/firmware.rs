use actix_web::web::{self, Bytes, Path, Query};
use dau_gateway_core::firmware::{FirmwareImage, FirmwareProgress};
use dau_gateway_error::{web::WebError, WebResult};
use dau_gateway_models::web::WebResponse;
use dau_gateway_protocol::message::ImageType;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{api::respond, AppState};

const MAX_IMAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct FirmwareQuery {
    pub version: String,
    #[serde(default)]
    pub image_type: Option<ImageType>,
    #[serde(default)]
    pub reboot_delay_s: Option<u32>,
}

pub(crate) fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/{device_id}/firmware")
            .app_data(web::PayloadConfig::new(MAX_IMAGE_BYTES))
            .route(web::post().to(update)),
    )
    .route("/{device_id}/firmware/progress", web::get().to(progress));
}

/// Runs the whole update; answers once the device has scheduled the swap.
#[instrument(name = "firmware-upload", skip(state, image), fields(device_id = %path.as_str(), size = image.len()))]
pub async fn update(
    path: Path<String>,
    query: Query<FirmwareQuery>,
    image: Bytes,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<FirmwareProgress>> {
    let device_id = path.into_inner();
    let query = query.into_inner();
    if query.version.trim().is_empty() {
        return Err(WebError::BadRequest("version must not be empty".into()));
    }
    if image.is_empty() {
        return Err(WebError::BadRequest("firmware image is empty".into()));
    }
    info!(version = %query.version, "firmware update requested");

    let image = FirmwareImage {
        version: query.version,
        image_type: query.image_type.unwrap_or(ImageType::Application),
        data: image.to_vec(),
    };
    respond(
        state
            .facade
            .firmware_update(&device_id, image, query.reboot_delay_s)
            .await,
    )
}

pub async fn progress(
    path: Path<String>,
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<FirmwareProgress>> {
    let device_id = path.into_inner();
    state
        .facade
        .firmware_progress(&device_id)
        .map(WebResponse::ok)
        .ok_or_else(|| WebError::NotFound(format!("firmware update for {device_id}")))
}
