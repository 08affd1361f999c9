use actix_web::body::EitherBody;
use actix_web::{HttpResponse, Responder};
use serde::{Deserialize, Serialize};

/// Response code
pub enum ResponseCode {
    Success = 0,
    Error = 500,
}

/// Envelope of every REST reply
#[derive(Debug, Serialize, Deserialize)]
pub struct WebResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T> WebResponse<T> {
    pub fn new(code: ResponseCode, message: &str, data: Option<T>) -> Self {
        Self {
            code: code as u16,
            message: message.into(),
            data,
        }
    }

    pub fn ok(data: T) -> Self {
        Self::new(ResponseCode::Success, "success", Some(data))
    }

    pub fn ok_with_message(message: &str, data: T) -> Self {
        Self::new(ResponseCode::Success, message, Some(data))
    }

    pub fn ok_empty() -> WebResponse<()> {
        WebResponse::new(ResponseCode::Success, "success", None)
    }

    pub fn error(message: &str) -> Self {
        Self::new(ResponseCode::Error, message, None)
    }
}

impl<T> Responder for WebResponse<T>
where
    T: Serialize,
{
    type Body = EitherBody<String>;

    fn respond_to(self, _req: &actix_web::HttpRequest) -> HttpResponse<EitherBody<String>> {
        let response = match serde_json::to_string(&self) {
            Ok(body) => HttpResponse::Ok()
                .content_type("application/json")
                .body(body),
            Err(e) => HttpResponse::InternalServerError()
                .content_type("application/json")
                .body(format!(r#"{{"code":500,"message":"{e}","data":null}}"#)),
        };
        response.map_into_right_body()
    }
}
