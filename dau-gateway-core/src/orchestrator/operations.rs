use dau_gateway_error::CommandResult;
use dau_gateway_protocol::message::*;
use std::time::Duration;

use super::Orchestrator;

macro_rules! operation {
    ($(#[$doc:meta])* $name:ident($request:ty) within $timeout:ident) => {
        $(#[$doc])*
        pub async fn $name(
            &self,
            device_id: &str,
            request: $request,
        ) -> CommandResult<<$request as Command>::Response> {
            let timeout = Duration::from_millis(self.timeouts.$timeout);
            self.execute(device_id, request, timeout).await
        }
    };
}

impl Orchestrator {
    operation!(
        /// Liveness probe.
        heartbeat(HeartbeatRequest) within heartbeat_timeout_ms
    );
    operation!(health(HealthRequest) within default_timeout_ms);

    operation!(read_error_log(ReadErrorLogRequest) within log_timeout_ms);
    operation!(clear_error_log(ClearErrorLogRequest) within log_timeout_ms);

    operation!(read_calibration(ReadCalibrationRequest) within default_timeout_ms);
    operation!(start_calibration(StartCalibrationRequest) within default_timeout_ms);
    operation!(calibration_status(CalibrationStatusRequest) within default_timeout_ms);

    operation!(configure_data(ConfigureDataRequest) within data_timeout_ms);
    operation!(list_data(ListDataRequest) within data_timeout_ms);
    operation!(
        /// Resolves with the first chunk; the remaining chunks reach the
        /// forwarding pipeline only.
        get_data(GetDataRequest) within data_timeout_ms
    );
    operation!(delete_data(DeleteDataRequest) within data_timeout_ms);
    operation!(start_capture(StartCaptureRequest) within data_timeout_ms);

    operation!(set_device_name(SetDeviceNameRequest) within default_timeout_ms);
    operation!(network_config(NetworkConfigRequest) within default_timeout_ms);
    operation!(install_certificate(InstallCertificateRequest) within default_timeout_ms);
    operation!(generate_csr(GenerateCsrRequest) within default_timeout_ms);
    operation!(reboot(RebootRequest) within default_timeout_ms);
    operation!(factory_reset(FactoryResetRequest) within default_timeout_ms);
    operation!(time_sync(TimeSyncRequest) within default_timeout_ms);

    operation!(firmware_prepare(FirmwarePrepareRequest) within firmware_prepare_timeout_ms);
    operation!(firmware_transfer(FirmwareTransferRequest) within firmware_transfer_timeout_ms);
    operation!(firmware_verify(FirmwareVerifyRequest) within firmware_verify_timeout_ms);
    operation!(firmware_apply(FirmwareApplyRequest) within firmware_apply_timeout_ms);
}
