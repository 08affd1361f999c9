use super::{Request, RequestKind, Response, ResponseKind};
use serde::{Deserialize, Serialize};

/// Header carried by every envelope.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub sender_id: String,
    /// Issuer-scoped correlation key
    #[prost(uint32, tag = "2")]
    pub sequence: u32,
    #[prost(uint64, tag = "3")]
    pub timestamp_ms: u64,
}

/// One complete protocol message.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(oneof = "EnvelopePayload", tags = "2, 3")]
    pub payload: Option<EnvelopePayload>,
}

#[derive(Clone, PartialEq, prost::Oneof, Serialize, Deserialize)]
pub enum EnvelopePayload {
    #[prost(message, tag = "2")]
    Request(Request),
    #[prost(message, tag = "3")]
    Response(Response),
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl Envelope {
    pub fn new(sender_id: impl Into<String>, sequence: u32, payload: EnvelopePayload) -> Self {
        Envelope {
            header: Some(Header {
                sender_id: sender_id.into(),
                sequence,
                timestamp_ms: now_ms(),
            }),
            payload: Some(payload),
        }
    }

    pub fn request(sender_id: impl Into<String>, sequence: u32, kind: RequestKind) -> Self {
        Self::new(
            sender_id,
            sequence,
            EnvelopePayload::Request(Request { kind: Some(kind) }),
        )
    }

    pub fn response(sender_id: impl Into<String>, sequence: u32, kind: ResponseKind) -> Self {
        Self::new(
            sender_id,
            sequence,
            EnvelopePayload::Response(Response { kind: Some(kind) }),
        )
    }

    /// Sender id from the header, empty when the header is missing.
    pub fn sender_id(&self) -> &str {
        self.header
            .as_ref()
            .map(|h| h.sender_id.as_str())
            .unwrap_or_default()
    }

    pub fn sequence(&self) -> u32 {
        self.header.as_ref().map(|h| h.sequence).unwrap_or_default()
    }

    pub fn request_kind(&self) -> Option<&RequestKind> {
        match &self.payload {
            Some(EnvelopePayload::Request(req)) => req.kind.as_ref(),
            _ => None,
        }
    }

    pub fn response_kind(&self) -> Option<&ResponseKind> {
        match &self.payload {
            Some(EnvelopePayload::Response(resp)) => resp.kind.as_ref(),
            _ => None,
        }
    }

    pub fn into_response_kind(self) -> Option<ResponseKind> {
        match self.payload {
            Some(EnvelopePayload::Response(resp)) => resp.kind,
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.payload, Some(EnvelopePayload::Response(_)))
    }

    /// Short name of the payload variant for logs.
    pub fn payload_name(&self) -> &'static str {
        match &self.payload {
            Some(EnvelopePayload::Request(req)) => req.kind.as_ref().map_or("request", |k| k.name()),
            Some(EnvelopePayload::Response(resp)) => {
                resp.kind.as_ref().map_or("response", |k| k.name())
            }
            None => "empty",
        }
    }
}
