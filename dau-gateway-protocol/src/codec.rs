use bytes::{Buf, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{FramingError, ProtocolError},
    message::Envelope,
};

/// Longest protobuf varint.
const MAX_VARINT_LEN: usize = 10;

/// Default frame limit, 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A decoded frame. A body that fails protobuf decoding does not desynchronise
/// the stream, so it is surfaced as an item rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),
    Malformed { len: usize, reason: String },
}

/// Varint length-delimited [`Envelope`] codec.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_len: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl EnvelopeCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Reads the length prefix without consuming it.
    /// Returns `(prefix_len, body_len)` once the varint is complete.
    fn peek_length(&self, buf: &[u8]) -> Result<Option<(usize, usize)>, FramingError> {
        let mut value: u64 = 0;
        for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
            if i == MAX_VARINT_LEN - 1 && *byte > 0x01 {
                return Err(FramingError::MalformedLength);
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                if value > self.max_frame_len as u64 {
                    return Err(FramingError::FrameTooLarge {
                        len: value,
                        max: self.max_frame_len,
                    });
                }
                return Ok(Some((i + 1, value as usize)));
            }
        }
        if buf.len() >= MAX_VARINT_LEN {
            return Err(FramingError::MalformedLength);
        }
        Ok(None)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Inbound;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((prefix_len, body_len)) = self.peek_length(buf)? else {
            return Ok(None);
        };

        let frame_len = prefix_len + body_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(prefix_len);
        let body = buf.split_to(body_len).freeze();
        match Envelope::decode(body) {
            Ok(envelope) => Ok(Some(Inbound::Envelope(envelope))),
            Err(e) => Ok(Some(Inbound::Malformed {
                len: body_len,
                reason: e.to_string(),
            })),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let expected = match self.peek_length(buf) {
            Ok(Some((prefix_len, body_len))) => prefix_len + body_len,
            _ => buf.len() + 1,
        };
        Err(FramingError::Truncated {
            expected,
            available: buf.len(),
        }
        .into())
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, envelope: Envelope, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let len = envelope.encoded_len();
        if len > self.max_frame_len {
            return Err(FramingError::FrameTooLarge {
                len: len as u64,
                max: self.max_frame_len,
            }
            .into());
        }
        buf.reserve(prost::length_delimiter_len(len) + len);
        envelope.encode_length_delimited(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        FirmwareTransferRequest, GetDataResponse, HeartbeatRequest, RequestKind, ResponseKind,
        StatusCode,
    };
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn encode(envelope: Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        EnvelopeCodec::default().encode(envelope, &mut buf).unwrap();
        buf
    }

    fn heartbeat(seq: u32) -> Envelope {
        Envelope::request("server", seq, RequestKind::Heartbeat(HeartbeatRequest {}))
    }

    #[test]
    fn decodes_complete_frame() {
        let mut buf = encode(heartbeat(7));
        let item = EnvelopeCodec::default().decode(&mut buf).unwrap().unwrap();
        match item {
            Inbound::Envelope(env) => {
                assert_eq!(env.sequence(), 7);
                assert_eq!(env.sender_id(), "server");
                assert_eq!(env.payload_name(), "heartbeat");
            }
            other => panic!("unexpected item {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_partial_prefix_and_body() {
        let full = encode(Envelope::request(
            "server",
            1,
            RequestKind::FirmwareTransfer(FirmwareTransferRequest::new(0, 0, vec![0xAB; 300])),
        ));
        let mut codec = EnvelopeCodec::default();

        // 300+ byte body needs a two byte prefix
        let mut buf = BytesMut::from(&full[..1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), full.len() - 1);

        buf.extend_from_slice(&full[full.len() - 1..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Envelope(_))
        ));
    }

    #[test]
    fn malformed_body_does_not_stop_the_stream() {
        let mut buf = BytesMut::from(&[0x01, 0x0F][..]);
        buf.extend_from_slice(&encode(heartbeat(2)));
        let mut codec = EnvelopeCodec::default();

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Malformed { len: 1, .. })
        ));
        match codec.decode(&mut buf).unwrap() {
            Some(Inbound::Envelope(env)) => assert_eq!(env.sequence(), 2),
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn rejects_unterminated_varint() {
        let mut buf = BytesMut::from(&[0xFF; 11][..]);
        let err = EnvelopeCodec::default().decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FramingError::MalformedLength)
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        prost::encode_length_delimiter(2048, &mut buf).unwrap();
        let err = EnvelopeCodec::new(1024).decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FramingError::FrameTooLarge { len: 2048, max: 1024 })
        ));
    }

    #[test]
    fn eof_inside_frame_is_truncation() {
        let full = encode(heartbeat(3));
        let mut buf = BytesMut::from(&full[..full.len() - 2]);
        let err = EnvelopeCodec::default().decode_eof(&mut buf).unwrap_err();
        match err {
            ProtocolError::Framing(FramingError::Truncated {
                expected,
                available,
            }) => {
                assert_eq!(expected, full.len());
                assert_eq!(available, full.len() - 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn clean_eof_is_not_an_error() {
        let mut buf = BytesMut::new();
        assert!(EnvelopeCodec::default()
            .decode_eof(&mut buf)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn framed_stream_preserves_order_and_payloads() {
        let (client, server) = tokio::io::duplex(64);
        let chunk = Envelope::response(
            "dau-7",
            9,
            ResponseKind::GetData(GetDataResponse {
                status: StatusCode::Ok as i32,
                dataset_id: "ds-1".into(),
                chunk_index: 0,
                total_chunks: 2,
                data: vec![1, 2, 3, 4],
                sample_rate_hz: Some(2000),
                channel_count: None,
                start_time_ms: Some(1_700_000_000_000),
            }),
        );
        let sent = vec![heartbeat(1), chunk, heartbeat(2)];

        let writer = {
            let sent = sent.clone();
            tokio::spawn(async move {
                let mut sink = FramedWrite::new(client, EnvelopeCodec::default());
                for env in sent {
                    sink.send(env).await.unwrap();
                }
            })
        };

        let mut stream = FramedRead::new(server, EnvelopeCodec::default());
        let mut received = Vec::new();
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                Inbound::Envelope(env) => received.push(env),
                Inbound::Malformed { reason, .. } => panic!("malformed frame: {reason}"),
            }
        }
        writer.await.unwrap();
        assert_eq!(received, sent);
    }

    fn requests() -> Vec<RequestKind> {
        use crate::message::*;
        vec![
            RequestKind::Hello(Hello {
                model: "DAU-4".into(),
                serial_number: "SN-0042".into(),
                firmware_version: "1.4.2".into(),
            }),
            RequestKind::Heartbeat(HeartbeatRequest {}),
            RequestKind::Health(HealthRequest {}),
            RequestKind::ReadErrorLog(ReadErrorLogRequest { max_entries: 50 }),
            RequestKind::ClearErrorLog(ClearErrorLogRequest {}),
            RequestKind::ReadCalibration(ReadCalibrationRequest { channel: 3 }),
            RequestKind::StartCalibration(StartCalibrationRequest {
                channel: 2,
                reference_value: 9.81,
            }),
            RequestKind::CalibrationStatus(CalibrationStatusRequest { channel: 2 }),
            RequestKind::ConfigureData(ConfigureDataRequest {
                sample_rate_hz: 25_600,
                channel_mask: 0b1011,
                pre_trigger_ms: 100,
                post_trigger_ms: 900,
            }),
            RequestKind::ListData(ListDataRequest {
                since_ms: 1_700_000_000_000,
                limit: 20,
            }),
            RequestKind::GetData(GetDataRequest {
                dataset_id: "ds-9".into(),
            }),
            RequestKind::DeleteData(DeleteDataRequest {
                dataset_id: "ds-9".into(),
            }),
            RequestKind::StartCapture(StartCaptureRequest {
                duration_ms: 5_000,
                tag: "bearing-test".into(),
            }),
            RequestKind::SetDeviceName(SetDeviceNameRequest {
                name: "north-tower".into(),
            }),
            RequestKind::NetworkConfig(NetworkConfigRequest {
                dhcp: false,
                address: "10.0.0.20".into(),
                netmask: "255.255.255.0".into(),
                gateway: "10.0.0.1".into(),
                dns_servers: vec!["10.0.0.2".into(), "10.0.0.3".into()],
            }),
            RequestKind::InstallCertificate(InstallCertificateRequest {
                certificate_pem: "-----BEGIN CERTIFICATE-----".into(),
                ca_chain_pem: "-----BEGIN CERTIFICATE-----".into(),
            }),
            RequestKind::GenerateCsr(GenerateCsrRequest {
                common_name: "dau-1".into(),
                organization: "plant".into(),
            }),
            RequestKind::Reboot(RebootRequest { delay_s: 3 }),
            RequestKind::FactoryReset(FactoryResetRequest { keep_network: true }),
            RequestKind::TimeSync(TimeSyncRequest {
                server_time_ms: 1_700_000_000_123,
            }),
            RequestKind::FirmwarePrepare(FirmwarePrepareRequest {
                total_size: 10_000,
                preferred_block_size: 4096,
                image_type: ImageType::Fpga as i32,
                version: "2.0.0".into(),
            }),
            RequestKind::FirmwareTransfer(FirmwareTransferRequest::new(2, 8192, vec![7; 1808])),
            RequestKind::FirmwareVerify(FirmwareVerifyRequest {
                expected_version: "2.0.0".into(),
            }),
            RequestKind::FirmwareApply(FirmwareApplyRequest { reboot_delay_s: 5 }),
        ]
    }

    fn responses() -> Vec<ResponseKind> {
        use crate::message::*;
        let ok = StatusCode::Ok as i32;
        vec![
            ResponseKind::HelloAck(HelloAck {
                accepted: true,
                server_time_ms: 1_700_000_000_000,
            }),
            ResponseKind::Heartbeat(HeartbeatResponse {
                status: ok,
                uptime_s: 86_400,
            }),
            ResponseKind::Health(HealthResponse {
                status: ok,
                cpu_percent: 12.5,
                memory_percent: 40.25,
                temperature_c: 51.0,
                storage_free_bytes: 1 << 30,
                time_locked: true,
            }),
            ResponseKind::ReadErrorLog(ReadErrorLogResponse {
                status: ok,
                entries: vec![ErrorLogEntry {
                    timestamp_ms: 1_700_000_000_000,
                    code: 17,
                    message: "adc overrun".into(),
                }],
            }),
            ResponseKind::ClearErrorLog(ClearErrorLogResponse {
                status: ok,
                cleared: 4,
            }),
            ResponseKind::ReadCalibration(ReadCalibrationResponse {
                status: ok,
                channel: 3,
                gain: 1.0025,
                offset: -0.5,
                calibrated_at_ms: 1_690_000_000_000,
            }),
            ResponseKind::StartCalibration(StartCalibrationResponse {
                status: StatusCode::Busy as i32,
                channel: 2,
            }),
            ResponseKind::CalibrationStatus(CalibrationStatusResponse {
                status: ok,
                channel: 2,
                state: CalibrationState::Running as i32,
                progress_percent: 60,
            }),
            ResponseKind::ConfigureData(ConfigureDataResponse {
                status: StatusCode::InvalidArgument as i32,
            }),
            ResponseKind::ListData(ListDataResponse {
                status: ok,
                datasets: vec![DatasetInfo {
                    dataset_id: "ds-9".into(),
                    start_time_ms: 1_700_000_000_000,
                    duration_ms: 5_000,
                    size_bytes: 4_096_000,
                    total_chunks: 1000,
                }],
            }),
            ResponseKind::GetData(GetDataResponse {
                status: ok,
                dataset_id: "ds-9".into(),
                chunk_index: 4,
                total_chunks: 1000,
                data: vec![0x5A; 64],
                sample_rate_hz: Some(25_600),
                channel_count: Some(3),
                start_time_ms: None,
            }),
            ResponseKind::DeleteData(DeleteDataResponse { status: ok }),
            ResponseKind::StartCapture(StartCaptureResponse {
                status: ok,
                dataset_id: "ds-10".into(),
            }),
            ResponseKind::SetDeviceName(SetDeviceNameResponse { status: ok }),
            ResponseKind::NetworkConfig(NetworkConfigResponse {
                status: StatusCode::NotSupported as i32,
            }),
            ResponseKind::InstallCertificate(InstallCertificateResponse { status: ok }),
            ResponseKind::GenerateCsr(GenerateCsrResponse {
                status: ok,
                csr_pem: "-----BEGIN CERTIFICATE REQUEST-----".into(),
            }),
            ResponseKind::Reboot(RebootResponse { status: ok }),
            ResponseKind::FactoryReset(FactoryResetResponse {
                status: StatusCode::Error as i32,
            }),
            ResponseKind::TimeSync(TimeSyncResponse {
                status: ok,
                device_time_ms: 1_700_000_000_050,
                offset_ms: -73,
            }),
            ResponseKind::FirmwarePrepare(FirmwarePrepareResponse {
                status: ok,
                ready: true,
                accepted_block_size: 2048,
                estimated_storage_ms: 1_500,
            }),
            ResponseKind::FirmwareTransfer(FirmwareTransferResponse {
                block_index: 2,
                result: TransferResult::CrcFailed as i32,
            }),
            ResponseKind::FirmwareVerify(FirmwareVerifyResponse {
                result: VerifyResult::HeaderIntegrityFailed as i32,
                version: "2.0.0".into(),
            }),
            ResponseKind::FirmwareApply(FirmwareApplyResponse {
                status: ok,
                scheduled: true,
            }),
            ResponseKind::Error(ErrorResponse {
                code: StatusCode::NotSupported as i32,
                message: "unknown request".into(),
            }),
        ]
    }

    #[test]
    fn every_payload_variant_survives_the_codec() {
        let requests = requests();
        let responses = responses();
        let request_names: std::collections::HashSet<_> =
            requests.iter().map(RequestKind::name).collect();
        let response_names: std::collections::HashSet<_> =
            responses.iter().map(ResponseKind::name).collect();
        assert_eq!(request_names.len(), 24);
        assert_eq!(response_names.len(), 25);

        let envelopes = requests
            .into_iter()
            .enumerate()
            .map(|(i, kind)| Envelope::request("dau-server", i as u32 + 1, kind))
            .chain(
                responses
                    .into_iter()
                    .enumerate()
                    .map(|(i, kind)| Envelope::response("dau-1", u32::MAX - i as u32, kind)),
            );

        let mut codec = EnvelopeCodec::default();
        for envelope in envelopes {
            let mut buf = BytesMut::new();
            codec.encode(envelope.clone(), &mut buf).unwrap();
            match codec.decode(&mut buf).unwrap() {
                Some(Inbound::Envelope(decoded)) => {
                    assert_eq!(decoded, envelope, "{}", envelope.payload_name())
                }
                other => panic!("{} did not decode: {other:?}", envelope.payload_name()),
            }
            assert!(buf.is_empty());
        }
    }
}
