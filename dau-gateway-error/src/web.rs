use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::{command::CommandError, DauError};

#[derive(Error, Debug)]
pub enum WebError {
    #[error("BadRequest: `{0}`")]
    BadRequest(String),
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("Conflict: `{0}`")]
    Conflict(String),
    #[error("ServiceUnavailable: `{0}`")]
    ServiceUnavailable(String),
    #[error("GatewayTimeout: `{0}`")]
    GatewayTimeout(String),
    #[error("InternalError: `{0}`")]
    InternalError(String),
}

impl From<std::io::Error> for WebError {
    fn from(e: std::io::Error) -> Self {
        WebError::InternalError(e.to_string())
    }
}

impl From<CommandError> for WebError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Unavailable(_) | CommandError::ConnectionLost(_) => {
                WebError::ServiceUnavailable(e.to_string())
            }
            CommandError::DeadlineExceeded { .. } => WebError::GatewayTimeout(e.to_string()),
            other => WebError::InternalError(other.to_string()),
        }
    }
}

impl From<DauError> for WebError {
    fn from(e: DauError) -> Self {
        match e {
            DauError::Command(cmd) => cmd.into(),
            DauError::Timeout(dur) => {
                WebError::GatewayTimeout(format!("Timeout: {} ms", dur.as_millis()))
            }
            DauError::InvalidStateError(msg) => WebError::Conflict(msg),
            other => WebError::InternalError(other.to_string()),
        }
    }
}

impl ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let mut body = json!({
            "message": self.to_string()
        });
        match self {
            WebError::BadRequest(_) => {
                body["error"] = json!("Bad Request");
                HttpResponse::BadRequest().json(body)
            }
            WebError::NotFound(_) => {
                body["error"] = json!("Not Found");
                HttpResponse::NotFound().json(body)
            }
            WebError::Conflict(_) => {
                body["error"] = json!("Conflict");
                HttpResponse::Conflict().json(body)
            }
            WebError::ServiceUnavailable(_) => {
                body["error"] = json!("Service Unavailable");
                HttpResponse::ServiceUnavailable().json(body)
            }
            WebError::GatewayTimeout(_) => {
                body["error"] = json!("Gateway Timeout");
                HttpResponse::GatewayTimeout().json(body)
            }
            WebError::InternalError(_) => {
                body["error"] = json!("Internal Server Error");
                HttpResponse::InternalServerError().json(body)
            }
        }
    }
}
