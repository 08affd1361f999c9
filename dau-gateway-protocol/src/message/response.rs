use serde::{Deserialize, Serialize};

/// Generic device status carried by most responses.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Error = 1,
    Busy = 2,
    InvalidArgument = 3,
    NotSupported = 4,
}

impl StatusCode {
    pub fn label(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Error => "ERROR",
            StatusCode::Busy => "BUSY",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::NotSupported => "NOT_SUPPORTED",
        }
    }
}

/// Per-block firmware transfer acknowledgement.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum TransferResult {
    Ok = 0,
    CrcFailed = 1,
    WriteFailed = 2,
    OutOfOrder = 3,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum VerifyResult {
    Ok = 0,
    AuthFailed = 1,
    HeaderIntegrityFailed = 2,
    ImageIntegrityFailed = 3,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum CalibrationState {
    Idle = 0,
    Running = 1,
    Done = 2,
    Failed = 3,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Response {
    #[prost(
        oneof = "ResponseKind",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25"
    )]
    pub kind: Option<ResponseKind>,
}

#[derive(Clone, PartialEq, prost::Oneof, Serialize, Deserialize)]
pub enum ResponseKind {
    #[prost(message, tag = "1")]
    HelloAck(HelloAck),
    #[prost(message, tag = "2")]
    Heartbeat(HeartbeatResponse),
    #[prost(message, tag = "3")]
    Health(HealthResponse),
    #[prost(message, tag = "4")]
    ReadErrorLog(ReadErrorLogResponse),
    #[prost(message, tag = "5")]
    ClearErrorLog(ClearErrorLogResponse),
    #[prost(message, tag = "6")]
    ReadCalibration(ReadCalibrationResponse),
    #[prost(message, tag = "7")]
    StartCalibration(StartCalibrationResponse),
    #[prost(message, tag = "8")]
    CalibrationStatus(CalibrationStatusResponse),
    #[prost(message, tag = "9")]
    ConfigureData(ConfigureDataResponse),
    #[prost(message, tag = "10")]
    ListData(ListDataResponse),
    /// Streamed: one envelope per chunk, all echoing the request sequence.
    #[prost(message, tag = "11")]
    GetData(GetDataResponse),
    #[prost(message, tag = "12")]
    DeleteData(DeleteDataResponse),
    #[prost(message, tag = "13")]
    StartCapture(StartCaptureResponse),
    #[prost(message, tag = "14")]
    SetDeviceName(SetDeviceNameResponse),
    #[prost(message, tag = "15")]
    NetworkConfig(NetworkConfigResponse),
    #[prost(message, tag = "16")]
    InstallCertificate(InstallCertificateResponse),
    #[prost(message, tag = "17")]
    GenerateCsr(GenerateCsrResponse),
    #[prost(message, tag = "18")]
    Reboot(RebootResponse),
    #[prost(message, tag = "19")]
    FactoryReset(FactoryResetResponse),
    #[prost(message, tag = "20")]
    TimeSync(TimeSyncResponse),
    #[prost(message, tag = "21")]
    FirmwarePrepare(FirmwarePrepareResponse),
    #[prost(message, tag = "22")]
    FirmwareTransfer(FirmwareTransferResponse),
    #[prost(message, tag = "23")]
    FirmwareVerify(FirmwareVerifyResponse),
    #[prost(message, tag = "24")]
    FirmwareApply(FirmwareApplyResponse),
    /// Device could not interpret the request at all.
    #[prost(message, tag = "25")]
    Error(ErrorResponse),
}

impl ResponseKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseKind::HelloAck(_) => "hello_ack",
            ResponseKind::Heartbeat(_) => "heartbeat",
            ResponseKind::Health(_) => "health",
            ResponseKind::ReadErrorLog(_) => "read_error_log",
            ResponseKind::ClearErrorLog(_) => "clear_error_log",
            ResponseKind::ReadCalibration(_) => "read_calibration",
            ResponseKind::StartCalibration(_) => "start_calibration",
            ResponseKind::CalibrationStatus(_) => "calibration_status",
            ResponseKind::ConfigureData(_) => "configure_data",
            ResponseKind::ListData(_) => "list_data",
            ResponseKind::GetData(_) => "get_data",
            ResponseKind::DeleteData(_) => "delete_data",
            ResponseKind::StartCapture(_) => "start_capture",
            ResponseKind::SetDeviceName(_) => "set_device_name",
            ResponseKind::NetworkConfig(_) => "network_config",
            ResponseKind::InstallCertificate(_) => "install_certificate",
            ResponseKind::GenerateCsr(_) => "generate_csr",
            ResponseKind::Reboot(_) => "reboot",
            ResponseKind::FactoryReset(_) => "factory_reset",
            ResponseKind::TimeSync(_) => "time_sync",
            ResponseKind::FirmwarePrepare(_) => "firmware_prepare",
            ResponseKind::FirmwareTransfer(_) => "firmware_transfer",
            ResponseKind::FirmwareVerify(_) => "firmware_verify",
            ResponseKind::FirmwareApply(_) => "firmware_apply",
            ResponseKind::Error(_) => "error",
        }
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HelloAck {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    #[prost(uint64, tag = "2")]
    pub server_time_ms: u64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub uptime_s: u64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(float, tag = "2")]
    pub cpu_percent: f32,
    #[prost(float, tag = "3")]
    pub memory_percent: f32,
    #[prost(float, tag = "4")]
    pub temperature_c: f32,
    #[prost(uint64, tag = "5")]
    pub storage_free_bytes: u64,
    #[prost(bool, tag = "6")]
    pub time_locked: bool,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    #[prost(uint64, tag = "1")]
    pub timestamp_ms: u64,
    #[prost(uint32, tag = "2")]
    pub code: u32,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ReadErrorLogResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<ErrorLogEntry>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ClearErrorLogResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint32, tag = "2")]
    pub cleared: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ReadCalibrationResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint32, tag = "2")]
    pub channel: u32,
    #[prost(double, tag = "3")]
    pub gain: f64,
    #[prost(double, tag = "4")]
    pub offset: f64,
    #[prost(uint64, tag = "5")]
    pub calibrated_at_ms: u64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct StartCalibrationResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint32, tag = "2")]
    pub channel: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct CalibrationStatusResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint32, tag = "2")]
    pub channel: u32,
    #[prost(enumeration = "CalibrationState", tag = "3")]
    pub state: i32,
    #[prost(uint32, tag = "4")]
    pub progress_percent: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ConfigureDataResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct DatasetInfo {
    #[prost(string, tag = "1")]
    pub dataset_id: String,
    #[prost(uint64, tag = "2")]
    pub start_time_ms: u64,
    #[prost(uint32, tag = "3")]
    pub duration_ms: u32,
    #[prost(uint64, tag = "4")]
    pub size_bytes: u64,
    #[prost(uint32, tag = "5")]
    pub total_chunks: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ListDataResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub datasets: Vec<DatasetInfo>,
}

/// One chunk of a dataset.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct GetDataResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub dataset_id: String,
    /// Zero-based
    #[prost(uint32, tag = "3")]
    pub chunk_index: u32,
    #[prost(uint32, tag = "4")]
    pub total_chunks: u32,
    #[prost(bytes = "vec", tag = "5")]
    pub data: Vec<u8>,
    #[prost(uint32, optional, tag = "6")]
    pub sample_rate_hz: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub channel_count: Option<u32>,
    #[prost(uint64, optional, tag = "8")]
    pub start_time_ms: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct DeleteDataResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct StartCaptureResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub dataset_id: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct SetDeviceNameResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct NetworkConfigResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct InstallCertificateResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct GenerateCsrResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub csr_pem: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct RebootResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FactoryResetResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct TimeSyncResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub device_time_ms: u64,
    /// Device clock minus server clock
    #[prost(int64, tag = "3")]
    pub offset_ms: i64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwarePrepareResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(bool, tag = "2")]
    pub ready: bool,
    #[prost(uint32, tag = "3")]
    pub accepted_block_size: u32,
    #[prost(uint32, tag = "4")]
    pub estimated_storage_ms: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwareTransferResponse {
    #[prost(uint32, tag = "1")]
    pub block_index: u32,
    #[prost(enumeration = "TransferResult", tag = "2")]
    pub result: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwareVerifyResponse {
    #[prost(enumeration = "VerifyResult", tag = "1")]
    pub result: i32,
    #[prost(string, tag = "2")]
    pub version: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwareApplyResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(bool, tag = "2")]
    pub scheduled: bool,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}
