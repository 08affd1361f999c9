use actix_web::web;
use dau_gateway_core::ptp::LeaseInfo;
use dau_gateway_error::WebResult;
use dau_gateway_models::web::WebResponse;
use std::sync::Arc;

use crate::AppState;

pub(super) const ROUTER_PREFIX: &str = "/ptp";

pub(crate) fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/leases", web::get().to(leases));
}

pub async fn leases(state: web::Data<Arc<AppState>>) -> WebResult<WebResponse<Vec<LeaseInfo>>> {
    Ok(WebResponse::ok(state.facade.ptp_leases()))
}
