use serde::{Deserialize, Serialize};

/// Firmware image kind named at Prepare.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    Application = 0,
    Bootloader = 1,
    Fpga = 2,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Request {
    #[prost(
        oneof = "RequestKind",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24"
    )]
    pub kind: Option<RequestKind>,
}

#[derive(Clone, PartialEq, prost::Oneof, Serialize, Deserialize)]
pub enum RequestKind {
    /// Device identification, first envelope on every connection.
    #[prost(message, tag = "1")]
    Hello(Hello),
    #[prost(message, tag = "2")]
    Heartbeat(HeartbeatRequest),
    #[prost(message, tag = "3")]
    Health(HealthRequest),
    #[prost(message, tag = "4")]
    ReadErrorLog(ReadErrorLogRequest),
    #[prost(message, tag = "5")]
    ClearErrorLog(ClearErrorLogRequest),
    #[prost(message, tag = "6")]
    ReadCalibration(ReadCalibrationRequest),
    #[prost(message, tag = "7")]
    StartCalibration(StartCalibrationRequest),
    #[prost(message, tag = "8")]
    CalibrationStatus(CalibrationStatusRequest),
    #[prost(message, tag = "9")]
    ConfigureData(ConfigureDataRequest),
    #[prost(message, tag = "10")]
    ListData(ListDataRequest),
    #[prost(message, tag = "11")]
    GetData(GetDataRequest),
    #[prost(message, tag = "12")]
    DeleteData(DeleteDataRequest),
    #[prost(message, tag = "13")]
    StartCapture(StartCaptureRequest),
    #[prost(message, tag = "14")]
    SetDeviceName(SetDeviceNameRequest),
    #[prost(message, tag = "15")]
    NetworkConfig(NetworkConfigRequest),
    #[prost(message, tag = "16")]
    InstallCertificate(InstallCertificateRequest),
    #[prost(message, tag = "17")]
    GenerateCsr(GenerateCsrRequest),
    #[prost(message, tag = "18")]
    Reboot(RebootRequest),
    #[prost(message, tag = "19")]
    FactoryReset(FactoryResetRequest),
    #[prost(message, tag = "20")]
    TimeSync(TimeSyncRequest),
    #[prost(message, tag = "21")]
    FirmwarePrepare(FirmwarePrepareRequest),
    #[prost(message, tag = "22")]
    FirmwareTransfer(FirmwareTransferRequest),
    #[prost(message, tag = "23")]
    FirmwareVerify(FirmwareVerifyRequest),
    #[prost(message, tag = "24")]
    FirmwareApply(FirmwareApplyRequest),
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::Hello(_) => "hello",
            RequestKind::Heartbeat(_) => "heartbeat",
            RequestKind::Health(_) => "health",
            RequestKind::ReadErrorLog(_) => "read_error_log",
            RequestKind::ClearErrorLog(_) => "clear_error_log",
            RequestKind::ReadCalibration(_) => "read_calibration",
            RequestKind::StartCalibration(_) => "start_calibration",
            RequestKind::CalibrationStatus(_) => "calibration_status",
            RequestKind::ConfigureData(_) => "configure_data",
            RequestKind::ListData(_) => "list_data",
            RequestKind::GetData(_) => "get_data",
            RequestKind::DeleteData(_) => "delete_data",
            RequestKind::StartCapture(_) => "start_capture",
            RequestKind::SetDeviceName(_) => "set_device_name",
            RequestKind::NetworkConfig(_) => "network_config",
            RequestKind::InstallCertificate(_) => "install_certificate",
            RequestKind::GenerateCsr(_) => "generate_csr",
            RequestKind::Reboot(_) => "reboot",
            RequestKind::FactoryReset(_) => "factory_reset",
            RequestKind::TimeSync(_) => "time_sync",
            RequestKind::FirmwarePrepare(_) => "firmware_prepare",
            RequestKind::FirmwareTransfer(_) => "firmware_transfer",
            RequestKind::FirmwareVerify(_) => "firmware_verify",
            RequestKind::FirmwareApply(_) => "firmware_apply",
        }
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Hello {
    #[prost(string, tag = "1")]
    pub model: String,
    #[prost(string, tag = "2")]
    pub serial_number: String,
    #[prost(string, tag = "3")]
    pub firmware_version: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthRequest {}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadErrorLogRequest {
    /// 0 = everything the device holds
    #[prost(uint32, tag = "1")]
    pub max_entries: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ClearErrorLogRequest {}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadCalibrationRequest {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StartCalibrationRequest {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
    #[prost(double, tag = "2")]
    pub reference_value: f64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationStatusRequest {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigureDataRequest {
    #[prost(uint32, tag = "1")]
    pub sample_rate_hz: u32,
    /// Bit n enables channel n
    #[prost(uint32, tag = "2")]
    pub channel_mask: u32,
    #[prost(uint32, tag = "3")]
    pub pre_trigger_ms: u32,
    #[prost(uint32, tag = "4")]
    pub post_trigger_ms: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ListDataRequest {
    #[prost(uint64, tag = "1")]
    pub since_ms: u64,
    #[prost(uint32, tag = "2")]
    pub limit: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct GetDataRequest {
    #[prost(string, tag = "1")]
    pub dataset_id: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteDataRequest {
    #[prost(string, tag = "1")]
    pub dataset_id: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StartCaptureRequest {
    #[prost(uint32, tag = "1")]
    pub duration_ms: u32,
    #[prost(string, tag = "2")]
    pub tag: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SetDeviceNameRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfigRequest {
    #[prost(bool, tag = "1")]
    pub dhcp: bool,
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(string, tag = "3")]
    pub netmask: String,
    #[prost(string, tag = "4")]
    pub gateway: String,
    #[prost(string, repeated, tag = "5")]
    pub dns_servers: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallCertificateRequest {
    #[prost(string, tag = "1")]
    pub certificate_pem: String,
    #[prost(string, tag = "2")]
    pub ca_chain_pem: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateCsrRequest {
    #[prost(string, tag = "1")]
    pub common_name: String,
    #[prost(string, tag = "2")]
    pub organization: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct RebootRequest {
    #[prost(uint32, tag = "1")]
    pub delay_s: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryResetRequest {
    #[prost(bool, tag = "1")]
    pub keep_network: bool,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncRequest {
    #[prost(uint64, tag = "1")]
    pub server_time_ms: u64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwarePrepareRequest {
    #[prost(uint64, tag = "1")]
    pub total_size: u64,
    /// Largest block the server wants to send; the device may lower it
    #[prost(uint32, tag = "2")]
    pub preferred_block_size: u32,
    #[prost(enumeration = "ImageType", tag = "3")]
    pub image_type: i32,
    #[prost(string, tag = "4")]
    pub version: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwareTransferRequest {
    #[prost(uint32, tag = "1")]
    pub block_index: u32,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    /// CRC-32 (IEEE) of `data`
    #[prost(uint32, tag = "4")]
    pub crc32: u32,
}

impl FirmwareTransferRequest {
    pub fn new(block_index: u32, offset: u64, data: Vec<u8>) -> Self {
        let crc32 = crc32fast::hash(&data);
        Self {
            block_index,
            offset,
            data,
            crc32,
        }
    }

    pub fn crc_matches(&self) -> bool {
        crc32fast::hash(&self.data) == self.crc32
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwareVerifyRequest {
    #[prost(string, tag = "1")]
    pub expected_version: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FirmwareApplyRequest {
    #[prost(uint32, tag = "1")]
    pub reboot_delay_s: u32,
}
