use super::*;

/// A device-bound request whose reply has exactly one expected shape.
pub trait Command: Sized + Send + 'static {
    type Response: DeviceStatus + Send + 'static;

    /// Operation name used in logs and error messages.
    const OPERATION: &'static str;

    fn into_request(self) -> RequestKind;

    /// Extracts the expected response, handing back anything else untouched.
    fn match_response(kind: ResponseKind) -> Result<Self::Response, ResponseKind>;
}

/// Normalised device-side outcome of a response.
pub trait DeviceStatus {
    fn is_ok(&self) -> bool;

    /// Name of the device status for user-facing messages.
    fn status_label(&self) -> String;
}

macro_rules! command {
    ($op:literal, $req:ident => $variant:ident($resp:ident)) => {
        impl Command for $req {
            type Response = $resp;
            const OPERATION: &'static str = $op;

            fn into_request(self) -> RequestKind {
                RequestKind::$variant(self)
            }

            fn match_response(kind: ResponseKind) -> Result<$resp, ResponseKind> {
                match kind {
                    ResponseKind::$variant(resp) => Ok(resp),
                    other => Err(other),
                }
            }
        }
    };
}

/// Label of a raw status value; values unknown to this build are never OK.
pub(crate) fn status_label(raw: i32) -> String {
    StatusCode::try_from(raw)
        .map(|status| status.label().to_string())
        .unwrap_or_else(|_| format!("UNKNOWN({raw})"))
}

macro_rules! status_field {
    ($($resp:ident),+ $(,)?) => {
        $(
            impl DeviceStatus for $resp {
                fn is_ok(&self) -> bool {
                    matches!(StatusCode::try_from(self.status), Ok(StatusCode::Ok))
                }

                fn status_label(&self) -> String {
                    status_label(self.status)
                }
            }
        )+
    };
}

command!("heartbeat", HeartbeatRequest => Heartbeat(HeartbeatResponse));
command!("health", HealthRequest => Health(HealthResponse));
command!("read_error_log", ReadErrorLogRequest => ReadErrorLog(ReadErrorLogResponse));
command!("clear_error_log", ClearErrorLogRequest => ClearErrorLog(ClearErrorLogResponse));
command!("read_calibration", ReadCalibrationRequest => ReadCalibration(ReadCalibrationResponse));
command!("start_calibration", StartCalibrationRequest => StartCalibration(StartCalibrationResponse));
command!("calibration_status", CalibrationStatusRequest => CalibrationStatus(CalibrationStatusResponse));
command!("configure_data", ConfigureDataRequest => ConfigureData(ConfigureDataResponse));
command!("list_data", ListDataRequest => ListData(ListDataResponse));
command!("get_data", GetDataRequest => GetData(GetDataResponse));
command!("delete_data", DeleteDataRequest => DeleteData(DeleteDataResponse));
command!("start_capture", StartCaptureRequest => StartCapture(StartCaptureResponse));
command!("set_device_name", SetDeviceNameRequest => SetDeviceName(SetDeviceNameResponse));
command!("network_config", NetworkConfigRequest => NetworkConfig(NetworkConfigResponse));
command!("install_certificate", InstallCertificateRequest => InstallCertificate(InstallCertificateResponse));
command!("generate_csr", GenerateCsrRequest => GenerateCsr(GenerateCsrResponse));
command!("reboot", RebootRequest => Reboot(RebootResponse));
command!("factory_reset", FactoryResetRequest => FactoryReset(FactoryResetResponse));
command!("time_sync", TimeSyncRequest => TimeSync(TimeSyncResponse));
command!("firmware_prepare", FirmwarePrepareRequest => FirmwarePrepare(FirmwarePrepareResponse));
command!("firmware_transfer", FirmwareTransferRequest => FirmwareTransfer(FirmwareTransferResponse));
command!("firmware_verify", FirmwareVerifyRequest => FirmwareVerify(FirmwareVerifyResponse));
command!("firmware_apply", FirmwareApplyRequest => FirmwareApply(FirmwareApplyResponse));

status_field!(
    HeartbeatResponse,
    HealthResponse,
    ReadErrorLogResponse,
    ClearErrorLogResponse,
    ReadCalibrationResponse,
    StartCalibrationResponse,
    CalibrationStatusResponse,
    ConfigureDataResponse,
    ListDataResponse,
    GetDataResponse,
    DeleteDataResponse,
    StartCaptureResponse,
    SetDeviceNameResponse,
    NetworkConfigResponse,
    InstallCertificateResponse,
    GenerateCsrResponse,
    RebootResponse,
    FactoryResetResponse,
    TimeSyncResponse,
    FirmwareApplyResponse,
);

impl DeviceStatus for ErrorResponse {
    fn is_ok(&self) -> bool {
        false
    }

    fn status_label(&self) -> String {
        status_label(self.code)
    }
}

impl DeviceStatus for FirmwarePrepareResponse {
    fn is_ok(&self) -> bool {
        matches!(StatusCode::try_from(self.status), Ok(StatusCode::Ok)) && self.ready
    }

    fn status_label(&self) -> String {
        if self.ready {
            status_label(self.status)
        } else {
            format!("{} (not ready)", status_label(self.status))
        }
    }
}

impl DeviceStatus for FirmwareTransferResponse {
    fn is_ok(&self) -> bool {
        matches!(TransferResult::try_from(self.result), Ok(TransferResult::Ok))
    }

    fn status_label(&self) -> String {
        match TransferResult::try_from(self.result) {
            Ok(result) => format!("{result:?}"),
            Err(_) => format!("UNKNOWN({})", self.result),
        }
    }
}

impl DeviceStatus for FirmwareVerifyResponse {
    fn is_ok(&self) -> bool {
        matches!(VerifyResult::try_from(self.result), Ok(VerifyResult::Ok))
    }

    fn status_label(&self) -> String {
        match VerifyResult::try_from(self.result) {
            Ok(result) => format!("{result:?}"),
            Err(_) => format!("UNKNOWN({})", self.result),
        }
    }
}
