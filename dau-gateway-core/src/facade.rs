//! Caller-facing adaptation of orchestrator calls: every answer carries an
//! explicit success flag and a readable message.
use dau_gateway_error::{CommandError, CommandResult};
use dau_gateway_protocol::message::*;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    firmware::{FirmwareCoordinator, FirmwareError, FirmwareImage, FirmwareProgress},
    forwarding::{DataForwarder, DatasetProgress},
    inventory::DeviceInventory,
    orchestrator::Orchestrator,
    ptp::{LeaseInfo, PtpManager},
    registry::{ConnectionInfo, ConnectionRegistry},
};

#[derive(Debug, Clone, Serialize)]
pub struct FacadeResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Command failure behind an unsuccessful response, if any
    #[serde(skip)]
    pub error: Option<CommandError>,
}

impl<T> FacadeResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: "OK".into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn from_error(error: CommandError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            data: None,
            error: Some(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FacadeResponse<U> {
        FacadeResponse {
            success: self.success,
            message: self.message,
            data: self.data.map(f),
            error: self.error,
        }
    }
}

impl<T: DeviceStatus> FacadeResponse<T> {
    /// Device statuses other than OK become a failure naming the status; the
    /// response itself is still returned for inspection.
    pub fn from_result(operation: &str, device_id: &str, result: CommandResult<T>) -> Self {
        match result {
            Ok(response) if response.is_ok() => Self::ok(response),
            Ok(response) => Self {
                success: false,
                message: format!(
                    "{operation} on {device_id} returned {}",
                    response.status_label()
                ),
                data: Some(response),
                error: None,
            },
            Err(error) => Self::from_error(error),
        }
    }
}

impl<T: Serialize> FacadeResponse<T> {
    pub fn into_json(self) -> FacadeResponse<serde_json::Value> {
        let FacadeResponse {
            success,
            message,
            data,
            error,
        } = self;
        match data.map(serde_json::to_value).transpose() {
            Ok(data) => FacadeResponse {
                success,
                message,
                data,
                error,
            },
            Err(e) => FacadeResponse::failure(format!("response not serializable: {e}")),
        }
    }
}

/// One device operation addressed over the generic command endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeviceCommand {
    Heartbeat(HeartbeatRequest),
    Health(HealthRequest),
    ReadErrorLog(ReadErrorLogRequest),
    ClearErrorLog(ClearErrorLogRequest),
    ReadCalibration(ReadCalibrationRequest),
    StartCalibration(StartCalibrationRequest),
    CalibrationStatus(CalibrationStatusRequest),
    ConfigureData(ConfigureDataRequest),
    ListData(ListDataRequest),
    GetData(GetDataRequest),
    DeleteData(DeleteDataRequest),
    StartCapture(StartCaptureRequest),
    SetDeviceName(SetDeviceNameRequest),
    NetworkConfig(NetworkConfigRequest),
    InstallCertificate(InstallCertificateRequest),
    GenerateCsr(GenerateCsrRequest),
    Reboot(RebootRequest),
    FactoryReset(FactoryResetRequest),
    TimeSync(TimeSyncRequest),
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceHeartbeat {
    pub device_id: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_s: Option<u64>,
}

pub struct CommandFacade {
    orchestrator: Arc<Orchestrator>,
    firmware: Arc<FirmwareCoordinator>,
    inventory: Arc<dyn DeviceInventory>,
    registry: Option<Arc<ConnectionRegistry>>,
    ptp: Option<Arc<PtpManager>>,
    forwarder: Option<Arc<DataForwarder>>,
}

macro_rules! facade_operation {
    ($($name:ident($request:ty)),+ $(,)?) => {
        $(
            pub async fn $name(
                &self,
                device_id: &str,
                request: $request,
            ) -> FacadeResponse<<$request as Command>::Response> {
                let result = self.orchestrator.$name(device_id, request).await;
                FacadeResponse::from_result(<$request as Command>::OPERATION, device_id, result)
            }
        )+
    };
}

impl CommandFacade {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        firmware: Arc<FirmwareCoordinator>,
        inventory: Arc<dyn DeviceInventory>,
    ) -> Self {
        Self {
            orchestrator,
            firmware,
            inventory,
            registry: None,
            ptp: None,
            forwarder: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_ptp(mut self, ptp: Option<Arc<PtpManager>>) -> Self {
        self.ptp = ptp;
        self
    }

    pub fn with_forwarder(mut self, forwarder: Option<Arc<DataForwarder>>) -> Self {
        self.forwarder = forwarder;
        self
    }

    facade_operation!(
        heartbeat(HeartbeatRequest),
        health(HealthRequest),
        read_error_log(ReadErrorLogRequest),
        clear_error_log(ClearErrorLogRequest),
        read_calibration(ReadCalibrationRequest),
        start_calibration(StartCalibrationRequest),
        calibration_status(CalibrationStatusRequest),
        configure_data(ConfigureDataRequest),
        list_data(ListDataRequest),
        get_data(GetDataRequest),
        delete_data(DeleteDataRequest),
        start_capture(StartCaptureRequest),
        set_device_name(SetDeviceNameRequest),
        network_config(NetworkConfigRequest),
        install_certificate(InstallCertificateRequest),
        generate_csr(GenerateCsrRequest),
        reboot(RebootRequest),
        factory_reset(FactoryResetRequest),
        time_sync(TimeSyncRequest),
    );

    /// Runs any catalog operation and renders its response as JSON.
    pub async fn dispatch(&self, device_id: &str, command: DeviceCommand) -> FacadeResponse<serde_json::Value> {
        use DeviceCommand as C;
        match command {
            C::Heartbeat(r) => self.heartbeat(device_id, r).await.into_json(),
            C::Health(r) => self.health(device_id, r).await.into_json(),
            C::ReadErrorLog(r) => self.read_error_log(device_id, r).await.into_json(),
            C::ClearErrorLog(r) => self.clear_error_log(device_id, r).await.into_json(),
            C::ReadCalibration(r) => self.read_calibration(device_id, r).await.into_json(),
            C::StartCalibration(r) => self.start_calibration(device_id, r).await.into_json(),
            C::CalibrationStatus(r) => self.calibration_status(device_id, r).await.into_json(),
            C::ConfigureData(r) => self.configure_data(device_id, r).await.into_json(),
            C::ListData(r) => self.list_data(device_id, r).await.into_json(),
            C::GetData(r) => self.get_data(device_id, r).await.into_json(),
            C::DeleteData(r) => self.delete_data(device_id, r).await.into_json(),
            C::StartCapture(r) => self.start_capture(device_id, r).await.into_json(),
            C::SetDeviceName(r) => self.set_device_name(device_id, r).await.into_json(),
            C::NetworkConfig(r) => self.network_config(device_id, r).await.into_json(),
            C::InstallCertificate(r) => self.install_certificate(device_id, r).await.into_json(),
            C::GenerateCsr(r) => self.generate_csr(device_id, r).await.into_json(),
            C::Reboot(r) => self.reboot(device_id, r).await.into_json(),
            C::FactoryReset(r) => self.factory_reset(device_id, r).await.into_json(),
            C::TimeSync(r) => self.time_sync(device_id, r).await.into_json(),
        }
    }

    /// Heartbeats every inventory DAU concurrently.
    #[instrument(skip(self))]
    pub async fn heartbeat_all(&self) -> FacadeResponse<Vec<DeviceHeartbeat>> {
        let device_ids = match self.inventory.dau_device_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "inventory unavailable");
                return FacadeResponse::failure(format!("inventory unavailable: {e}"));
            }
        };

        let results = join_all(device_ids.iter().map(|device_id| async move {
            let response = self.heartbeat(device_id, HeartbeatRequest {}).await;
            DeviceHeartbeat {
                device_id: device_id.clone(),
                success: response.success,
                message: response.message,
                uptime_s: response.data.map(|hb| hb.uptime_s),
            }
        }))
        .await;

        let alive = results.iter().filter(|hb| hb.success).count();
        info!(alive, total = results.len(), "heartbeat sweep finished");
        FacadeResponse {
            success: true,
            message: format!("{alive} of {} devices responded", results.len()),
            data: Some(results),
            error: None,
        }
    }

    pub fn connected_devices(&self) -> Vec<ConnectionInfo> {
        self.registry
            .as_ref()
            .map(|registry| registry.connected_devices())
            .unwrap_or_default()
    }

    pub async fn firmware_update(
        &self,
        device_id: &str,
        image: FirmwareImage,
        reboot_delay_s: Option<u32>,
    ) -> FacadeResponse<FirmwareProgress> {
        match self.firmware.run_update(device_id, image, reboot_delay_s).await {
            Ok(progress) => FacadeResponse {
                success: true,
                message: format!("firmware {} scheduled on {device_id}", progress.version),
                data: Some(progress),
                error: None,
            },
            Err(FirmwareError::Command(e)) => FacadeResponse::from_error(e),
            Err(e) => FacadeResponse::failure(e.to_string()),
        }
    }

    pub fn firmware_progress(&self, device_id: &str) -> Option<FirmwareProgress> {
        self.firmware.progress(device_id)
    }

    pub fn ptp_leases(&self) -> Vec<LeaseInfo> {
        self.ptp.as_ref().map(|ptp| ptp.leases()).unwrap_or_default()
    }

    pub fn active_datasets(&self) -> Vec<DatasetProgress> {
        self.forwarder
            .as_ref()
            .map(|forwarder| forwarder.active_datasets())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inventory::StaticInventory,
        test_support::{init_tracing, spawn_device, MemoryLink},
    };
    use dau_gateway_models::settings::{Firmware, Orchestrator as Timeouts};

    fn facade(responder: impl FnMut(&str, &RequestKind) -> Vec<ResponseKind> + Send + 'static) -> CommandFacade {
        init_tracing();
        let (link, outbox) = MemoryLink::new();
        link.connect("dau-1");
        link.connect("dau-2");
        let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());
        spawn_device(link, outbox, responder);
        let firmware = Arc::new(FirmwareCoordinator::new(orchestrator.clone(), Firmware::default()));
        let inventory = Arc::new(StaticInventory::new(vec![
            "dau-1".into(),
            "dau-2".into(),
            "dau-3".into(),
        ]));
        CommandFacade::new(orchestrator, firmware, inventory)
    }

    fn heartbeat(status: StatusCode) -> Vec<ResponseKind> {
        vec![ResponseKind::Heartbeat(HeartbeatResponse {
            status: status as i32,
            uptime_s: 42,
        })]
    }

    #[tokio::test]
    async fn device_status_maps_to_success_flag() {
        let facade = facade(|device_id, _| match device_id {
            "dau-1" => heartbeat(StatusCode::Ok),
            _ => heartbeat(StatusCode::Busy),
        });

        let ok = facade.heartbeat("dau-1", HeartbeatRequest {}).await;
        assert!(ok.success);
        assert_eq!(ok.data.unwrap().uptime_s, 42);

        let busy = facade.heartbeat("dau-2", HeartbeatRequest {}).await;
        assert!(!busy.success);
        assert_eq!(busy.message, "heartbeat on dau-2 returned BUSY");
        assert!(busy.error.is_none());
    }

    #[tokio::test]
    async fn command_errors_are_typed() {
        let facade = facade(|_, _| heartbeat(StatusCode::Ok));
        let response = facade.health("dau-3", HealthRequest {}).await;
        assert!(!response.success);
        assert_eq!(response.error, Some(CommandError::Unavailable("dau-3".into())));
    }

    #[tokio::test]
    async fn heartbeat_all_covers_the_inventory() {
        let facade = facade(|_, _| heartbeat(StatusCode::Ok));
        let response = facade.heartbeat_all().await;
        assert!(response.success);
        assert_eq!(response.message, "2 of 3 devices responded");
        let beats = response.data.unwrap();
        assert_eq!(beats.len(), 3);
        assert!(beats[0].success && beats[1].success);
        assert!(!beats[2].success);
        assert_eq!(beats[2].device_id, "dau-3");
    }

    #[tokio::test]
    async fn json_commands_dispatch_by_op() {
        let facade = facade(|_, request| match request {
            RequestKind::SetDeviceName(req) => {
                assert_eq!(req.name, "north-tower");
                vec![ResponseKind::SetDeviceName(SetDeviceNameResponse {
                    status: StatusCode::Ok as i32,
                })]
            }
            _ => Vec::new(),
        });

        let command: DeviceCommand =
            serde_json::from_str(r#"{"op":"set_device_name","name":"north-tower"}"#).unwrap();
        let response = facade.dispatch("dau-1", command).await;
        assert!(response.success, "{}", response.message);
        assert_eq!(response.data.unwrap()["status"], 0);

        let heartbeat: DeviceCommand = serde_json::from_str(r#"{"op":"heartbeat"}"#).unwrap();
        assert!(matches!(heartbeat, DeviceCommand::Heartbeat(_)));
    }
}
