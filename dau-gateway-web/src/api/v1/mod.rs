//! V1 version API routes
mod archive;
mod device;
mod firmware;
mod ptp;

use actix_web::web;

pub(super) const ROUTER_PREFIX: &str = "/v1";

pub fn configure_v1_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope(ROUTER_PREFIX)
            .service(web::scope(device::ROUTER_PREFIX).configure(device::configure_routes))
            .service(web::scope(ptp::ROUTER_PREFIX).configure(ptp::configure_routes))
            .service(web::scope(archive::ROUTER_PREFIX).configure(archive::configure_routes)),
    );
}
