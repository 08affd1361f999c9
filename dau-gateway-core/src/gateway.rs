use async_trait::async_trait;
use dau_gateway_error::DauResult;
use dau_gateway_models::{settings::Settings, Gateway};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{info, instrument};

use crate::{
    facade::CommandFacade,
    firmware::FirmwareCoordinator,
    forwarding::{ArchiveClient, DataForwarder, GrpcArchiveClient},
    inventory::{DeviceInventory, StaticInventory},
    orchestrator::Orchestrator,
    ptp::PtpManager,
    registry::ConnectionRegistry,
    DeviceLink,
};

/// Wires the device backbone together: registry → orchestrator → firmware /
/// facade, plus the optional forwarding pipeline and PTP negotiator.
pub struct DauGateway {
    registry: Arc<ConnectionRegistry>,
    orchestrator: Arc<Orchestrator>,
    firmware: Arc<FirmwareCoordinator>,
    forwarder: Option<Arc<DataForwarder>>,
    ptp: Option<Arc<PtpManager>>,
    facade: Arc<CommandFacade>,
    drain_timeout: Duration,
    started: AtomicBool,
}

impl DauGateway {
    /// Builds every component from settings. Must run inside a tokio runtime.
    #[instrument(name = "gateway-init", skip_all)]
    pub fn init(settings: &Settings) -> DauResult<Arc<Self>> {
        let archive: Option<Arc<dyn ArchiveClient>> = if settings.archive.enabled {
            Some(Arc::new(GrpcArchiveClient::new(&settings.archive)?))
        } else {
            None
        };
        let inventory = Arc::new(StaticInventory::from(&settings.inventory));
        Ok(Self::with_collaborators(settings, archive, inventory))
    }

    /// Like [`DauGateway::init`] with explicit external collaborators.
    pub fn with_collaborators(
        settings: &Settings,
        archive: Option<Arc<dyn ArchiveClient>>,
        inventory: Arc<dyn DeviceInventory>,
    ) -> Arc<Self> {
        let server_id = settings.general.server_id.clone();
        let registry = ConnectionRegistry::new(server_id.clone(), settings.listener.clone());
        let link: Arc<dyn DeviceLink> = registry.clone();
        let orchestrator = Orchestrator::new(server_id.clone(), link, settings.orchestrator);
        let firmware = Arc::new(FirmwareCoordinator::new(
            orchestrator.clone(),
            settings.firmware,
        ));
        let forwarder = archive.map(|client| DataForwarder::new(client, settings.archive.clone()));
        let ptp = settings
            .ptp
            .enabled
            .then(|| PtpManager::new(&server_id, settings.ptp.clone()));
        let facade = Arc::new(
            CommandFacade::new(orchestrator.clone(), firmware.clone(), inventory)
                .with_registry(registry.clone())
                .with_ptp(ptp.clone())
                .with_forwarder(forwarder.clone()),
        );
        info!(
            %server_id,
            archive = forwarder.is_some(),
            ptp = ptp.is_some(),
            "gateway components created"
        );

        Arc::new(Self {
            registry,
            orchestrator,
            firmware,
            forwarder,
            ptp,
            facade,
            drain_timeout: settings.listener.shutdown_drain_timeout(),
            started: AtomicBool::new(false),
        })
    }

    pub fn facade(&self) -> Arc<CommandFacade> {
        Arc::clone(&self.facade)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn firmware(&self) -> &Arc<FirmwareCoordinator> {
        &self.firmware
    }

    pub fn ptp(&self) -> Option<&Arc<PtpManager>> {
        self.ptp.as_ref()
    }

    /// Device listener address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.registry.local_addr()
    }
}

#[async_trait]
impl Gateway for DauGateway {
    #[instrument(name = "gateway-start", skip_all)]
    async fn start(&self) -> DauResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // subscribe before the listener accepts anything
        if let Some(forwarder) = &self.forwarder {
            forwarder.start(self.registry.subscribe());
        }
        let addr = self.registry.start().await?;
        if let Some(ptp) = &self.ptp {
            ptp.start().await?;
        }
        info!(%addr, "gateway started");
        Ok(())
    }

    #[instrument(name = "gateway-stop", skip_all)]
    async fn stop(&self) -> DauResult<()> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(ptp) = &self.ptp {
            ptp.stop().await;
        }
        if let Some(forwarder) = &self.forwarder {
            forwarder.shutdown(self.drain_timeout).await;
        }
        self.orchestrator.shutdown();
        self.registry.shutdown().await;
        info!("gateway stopped");
        Ok(())
    }
}
