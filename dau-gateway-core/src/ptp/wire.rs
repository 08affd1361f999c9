//! PTPv2 signaling messages carrying unicast negotiation TLVs.
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub const HEADER_LEN: usize = 34;
/// Header plus the target port identity of a signaling message.
pub const SIGNALING_BODY_OFFSET: usize = HEADER_LEN + 10;

const MESSAGE_TYPE_SIGNALING: u8 = 0x0C;
const PTP_VERSION: u8 = 2;
const CONTROL_OTHER: u8 = 0x05;
const LOG_INTERVAL_UNSPECIFIED: u8 = 0x7F;
const FLAG_UNICAST: u8 = 0x04;

const TLV_REQUEST_UNICAST_TRANSMISSION: u16 = 0x0004;
const TLV_GRANT_UNICAST_TRANSMISSION: u16 = 0x0005;
const REQUEST_TLV_LEN: u16 = 6;
const GRANT_TLV_LEN: u16 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),
    #[error("unsupported PTP version {0}")]
    UnsupportedVersion(u8),
    #[error("declared length {declared} exceeds datagram of {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("truncated TLV at offset {0}")]
    TruncatedTlv(usize),
}

/// Message types a master can grant unicast transmission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PtpMessageType {
    Sync,
    DelayReq,
    DelayResp,
    Announce,
}

impl PtpMessageType {
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Sync),
            0x1 => Some(Self::DelayReq),
            0x9 => Some(Self::DelayResp),
            0xB => Some(Self::Announce),
            _ => None,
        }
    }

    pub fn nibble(self) -> u8 {
        match self {
            Self::Sync => 0x0,
            Self::DelayReq => 0x1,
            Self::DelayResp => 0x9,
            Self::Announce => 0xB,
        }
    }
}

impl fmt::Display for PtpMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sync => "Sync",
            Self::DelayReq => "Delay_Req",
            Self::DelayResp => "Delay_Resp",
            Self::Announce => "Announce",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortIdentity {
    pub clock_identity: [u8; 8],
    pub port_number: u16,
}

impl PortIdentity {
    fn read(buf: &mut &[u8]) -> Self {
        let mut clock_identity = [0u8; 8];
        buf.copy_to_slice(&mut clock_identity);
        Self {
            clock_identity,
            port_number: buf.get_u16(),
        }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_slice(&self.clock_identity);
        out.put_u16(self.port_number);
    }
}

/// One REQUEST_UNICAST_TRANSMISSION TLV. `message_type` is the raw nibble so
/// unsupported types can still be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastRequest {
    pub message_type: u8,
    pub log_inter_message_period: i8,
    pub duration_s: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingRequest {
    pub domain_number: u8,
    pub sequence_id: u16,
    pub source: PortIdentity,
    pub requests: Vec<UnicastRequest>,
}

/// One GRANT_UNICAST_TRANSMISSION TLV; a duration of 0 denies the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastGrant {
    pub message_type: u8,
    pub log_inter_message_period: i8,
    pub duration_s: u32,
    pub renewal: bool,
}

/// Parses a signaling datagram. `Ok(None)` for anything that is not a
/// signaling message carrying at least one unicast transmission request.
pub fn parse_request(datagram: &[u8]) -> Result<Option<SignalingRequest>, WireError> {
    if datagram.len() < HEADER_LEN {
        return Err(WireError::TooShort(datagram.len()));
    }
    if datagram[0] & 0x0F != MESSAGE_TYPE_SIGNALING {
        return Ok(None);
    }
    let version = datagram[1] & 0x0F;
    if version != PTP_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let declared = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    if declared > datagram.len() {
        return Err(WireError::LengthMismatch {
            declared,
            actual: datagram.len(),
        });
    }
    if declared < SIGNALING_BODY_OFFSET {
        return Err(WireError::TooShort(declared));
    }

    let message = &datagram[..declared];
    let mut source_bytes = &message[20..30];
    let source = PortIdentity::read(&mut source_bytes);
    let sequence_id = u16::from_be_bytes([message[30], message[31]]);

    let mut requests = Vec::new();
    let mut offset = SIGNALING_BODY_OFFSET;
    while offset < message.len() {
        let mut tlv = &message[offset..];
        if tlv.remaining() < 4 {
            return Err(WireError::TruncatedTlv(offset));
        }
        let tlv_type = tlv.get_u16();
        let tlv_len = tlv.get_u16() as usize;
        if tlv.remaining() < tlv_len {
            return Err(WireError::TruncatedTlv(offset));
        }
        if tlv_type == TLV_REQUEST_UNICAST_TRANSMISSION && tlv_len >= REQUEST_TLV_LEN as usize {
            requests.push(UnicastRequest {
                message_type: tlv.get_u8() >> 4,
                log_inter_message_period: tlv.get_i8(),
                duration_s: tlv.get_u32(),
            });
        }
        offset += 4 + tlv_len;
    }

    if requests.is_empty() {
        return Ok(None);
    }
    Ok(Some(SignalingRequest {
        domain_number: message[4],
        sequence_id,
        source,
        requests,
    }))
}

/// Builds the signaling answer to `request`, addressed to its source port.
pub fn build_grant(source: PortIdentity, request: &SignalingRequest, grants: &[UnicastGrant]) -> Vec<u8> {
    let length = SIGNALING_BODY_OFFSET + grants.len() * (4 + GRANT_TLV_LEN as usize);
    let mut out = BytesMut::with_capacity(length);

    out.put_u8(MESSAGE_TYPE_SIGNALING);
    out.put_u8(PTP_VERSION);
    out.put_u16(length as u16);
    out.put_u8(request.domain_number);
    out.put_u8(0);
    out.put_u8(FLAG_UNICAST);
    out.put_u8(0);
    out.put_u64(0); // correctionField
    out.put_u32(0);
    source.write(&mut out);
    out.put_u16(request.sequence_id);
    out.put_u8(CONTROL_OTHER);
    out.put_u8(LOG_INTERVAL_UNSPECIFIED);
    request.source.write(&mut out);

    for grant in grants {
        out.put_u16(TLV_GRANT_UNICAST_TRANSMISSION);
        out.put_u16(GRANT_TLV_LEN);
        out.put_u8(grant.message_type << 4);
        out.put_i8(grant.log_inter_message_period);
        out.put_u32(grant.duration_s);
        out.put_u8(0);
        out.put_u8(grant.renewal as u8);
    }
    out.to_vec()
}

#[cfg(test)]
pub(crate) fn encode_request(source: PortIdentity, sequence_id: u16, requests: &[UnicastRequest]) -> Vec<u8> {
    let length = SIGNALING_BODY_OFFSET + requests.len() * (4 + REQUEST_TLV_LEN as usize);
    let mut out = BytesMut::with_capacity(length);
    out.put_u8(MESSAGE_TYPE_SIGNALING);
    out.put_u8(PTP_VERSION);
    out.put_u16(length as u16);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(FLAG_UNICAST);
    out.put_u8(0);
    out.put_bytes(0, 12);
    source.write(&mut out);
    out.put_u16(sequence_id);
    out.put_u8(CONTROL_OTHER);
    out.put_u8(LOG_INTERVAL_UNSPECIFIED);
    out.put_bytes(0xFF, 10);
    for request in requests {
        out.put_u16(TLV_REQUEST_UNICAST_TRANSMISSION);
        out.put_u16(REQUEST_TLV_LEN);
        out.put_u8(request.message_type << 4);
        out.put_i8(request.log_inter_message_period);
        out.put_u32(request.duration_s);
    }
    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PortIdentity {
        PortIdentity {
            clock_identity: [1, 2, 3, 4, 5, 6, 7, 8],
            port_number: 1,
        }
    }

    fn sync_request(duration_s: u32) -> UnicastRequest {
        UnicastRequest {
            message_type: 0x0,
            log_inter_message_period: -3,
            duration_s,
        }
    }

    #[test]
    fn parses_unicast_request() {
        let datagram = encode_request(client(), 77, &[sync_request(300)]);
        assert_eq!(datagram.len(), 54);

        let request = parse_request(&datagram).unwrap().unwrap();
        assert_eq!(request.sequence_id, 77);
        assert_eq!(request.source, client());
        assert_eq!(request.requests, vec![sync_request(300)]);
    }

    #[test]
    fn non_signaling_messages_are_skipped() {
        let mut datagram = encode_request(client(), 1, &[sync_request(60)]);
        datagram[0] = 0x0B; // Announce
        assert_eq!(parse_request(&datagram), Ok(None));
        assert_eq!(parse_request(&datagram[..10]), Err(WireError::TooShort(10)));
    }

    #[test]
    fn rejects_bad_lengths() {
        let datagram = encode_request(client(), 1, &[sync_request(60)]);
        assert!(matches!(
            parse_request(&datagram[..50]),
            Err(WireError::LengthMismatch { declared: 54, actual: 50 })
        ));

        let mut cut = datagram.clone();
        cut[3] = 50; // declared length ends inside the TLV
        assert_eq!(parse_request(&cut[..50]), Err(WireError::TruncatedTlv(44)));
    }

    #[test]
    fn grant_layout() {
        let request = parse_request(&encode_request(client(), 9, &[sync_request(120)]))
            .unwrap()
            .unwrap();
        let server = PortIdentity {
            clock_identity: [0xAA; 8],
            port_number: 1,
        };
        let grant = build_grant(
            server,
            &request,
            &[UnicastGrant {
                message_type: 0x0,
                log_inter_message_period: -3,
                duration_s: 120,
                renewal: true,
            }],
        );

        assert_eq!(grant.len(), 56);
        assert_eq!(grant[0] & 0x0F, 0x0C);
        assert_eq!(grant[1], 2);
        assert_eq!(u16::from_be_bytes([grant[2], grant[3]]), 56);
        assert_eq!(grant[6] & FLAG_UNICAST, FLAG_UNICAST);
        assert_eq!(&grant[20..28], &[0xAA; 8]);
        assert_eq!(u16::from_be_bytes([grant[30], grant[31]]), 9);
        assert_eq!(grant[32], 5);
        assert_eq!(&grant[34..42], &client().clock_identity);
        assert_eq!(u16::from_be_bytes([grant[44], grant[45]]), 0x0005);
        assert_eq!(u16::from_be_bytes([grant[46], grant[47]]), 8);
        assert_eq!(grant[49] as i8, -3);
        assert_eq!(u32::from_be_bytes([grant[50], grant[51], grant[52], grant[53]]), 120);
        assert_eq!(grant[55] & 0x01, 1);
    }

    #[test]
    fn message_type_nibbles() {
        for kind in [
            PtpMessageType::Sync,
            PtpMessageType::DelayReq,
            PtpMessageType::DelayResp,
            PtpMessageType::Announce,
        ] {
            assert_eq!(PtpMessageType::from_nibble(kind.nibble()), Some(kind));
        }
        assert_eq!(PtpMessageType::from_nibble(0x8), None);
    }
}
