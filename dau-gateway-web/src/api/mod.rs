//! Router module for handling all API routes
pub mod public;
pub mod v1;

use actix_web::web;
use dau_gateway_core::FacadeResponse;
use dau_gateway_error::{web::WebError, CommandError, WebResult};
use dau_gateway_models::web::{ResponseCode, WebResponse};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(v1::configure_v1_routes);
}

/// Routes mounted at the root, outside the router prefix.
pub fn configure_public_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(public::configure_public_routes);
}

/// Transport-level command failures become HTTP errors; device-level
/// failures stay in the body with `code != 0`.
pub(crate) fn respond<T>(response: FacadeResponse<T>) -> WebResult<WebResponse<T>> {
    match response.error {
        Some(
            e @ (CommandError::Unavailable(_)
            | CommandError::ConnectionLost(_)
            | CommandError::DeadlineExceeded { .. }),
        ) => Err(WebError::from(e)),
        _ if response.success => Ok(WebResponse::new(
            ResponseCode::Success,
            &response.message,
            response.data,
        )),
        _ => Ok(WebResponse::new(
            ResponseCode::Error,
            &response.message,
            response.data,
        )),
    }
}
