//! Four-phase firmware update: Prepare → Transfer → Verify → Apply.
use dashmap::{mapref::entry::Entry, DashMap};
use dau_gateway_error::CommandError;
use dau_gateway_models::settings::Firmware as FirmwareSettings;
use dau_gateway_protocol::message::{
    DeviceStatus, FirmwareApplyRequest, FirmwareApplyResponse, FirmwarePrepareRequest,
    FirmwarePrepareResponse, FirmwareTransferRequest, FirmwareVerifyRequest,
    FirmwareVerifyResponse, ImageType,
};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwarePhase {
    Idle,
    Prepared,
    Transferring,
    Verified,
    Applied,
    Aborted,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FirmwareError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("firmware update already in progress for {0}")]
    UpdateInProgress(String),
    #[error("firmware image is empty")]
    EmptyImage,
    #[error("device {device} is not ready for the update: {status}")]
    NotReady { device: String, status: String },
    #[error("device {0} accepted a block size of 0")]
    ZeroBlockSize(String),
    #[error("block {block_index} rejected by {device}: {result}")]
    BlockRejected {
        device: String,
        block_index: u32,
        result: String,
    },
    #[error("acknowledgement for block {got} while waiting for block {expected}")]
    BlockMismatch { expected: u32, got: u32 },
    #[error("verification failed on {device}: {result}")]
    VerifyFailed { device: String, result: String },
    #[error("apply rejected by {device}: {status}")]
    ApplyRejected { device: String, status: String },
    #[error("{operation} is not allowed in phase {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: FirmwarePhase,
    },
}

/// Image to install.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub version: String,
    pub image_type: ImageType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirmwareProgress {
    pub device_id: String,
    pub version: String,
    pub phase: FirmwarePhase,
    pub block_size: u32,
    pub blocks_acked: u32,
    pub total_blocks: u32,
    pub bytes_sent: u64,
    pub total_size: u64,
    pub percent: f32,
    /// Failure reason once aborted
    pub message: Option<String>,
}

type ActiveUpdates = DashMap<String, (u64, watch::Receiver<FirmwareProgress>)>;

pub struct FirmwareCoordinator {
    orchestrator: Arc<Orchestrator>,
    settings: FirmwareSettings,
    active: Arc<ActiveUpdates>,
    next_session_id: AtomicU64,
}

impl FirmwareCoordinator {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: FirmwareSettings) -> Self {
        Self {
            orchestrator,
            settings,
            active: Arc::new(DashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Opens a session for `device_id`. Only one session per device may exist.
    pub fn begin(&self, device_id: &str, image: FirmwareImage) -> Result<FirmwareSession, FirmwareError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let total_size = image.data.len() as u64;
        let (progress_tx, progress_rx) = watch::channel(FirmwareProgress {
            device_id: device_id.to_string(),
            version: image.version.clone(),
            phase: FirmwarePhase::Idle,
            block_size: 0,
            blocks_acked: 0,
            total_blocks: 0,
            bytes_sent: 0,
            total_size,
            percent: 0.0,
            message: None,
        });

        match self.active.entry(device_id.to_string()) {
            Entry::Occupied(_) => return Err(FirmwareError::UpdateInProgress(device_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert((session_id, progress_rx));
            }
        }

        Ok(FirmwareSession {
            session_id,
            device_id: device_id.to_string(),
            image,
            preferred_block_size: self.settings.preferred_block_size,
            orchestrator: Arc::clone(&self.orchestrator),
            active: Arc::clone(&self.active),
            phase: FirmwarePhase::Idle,
            block_size: 0,
            total_blocks: 0,
            blocks_acked: 0,
            bytes_sent: 0,
            progress: progress_tx,
        })
    }

    /// Runs all four phases. `reboot_delay_s` falls back to the configured default.
    #[instrument(name = "firmware-update", skip(self, image), fields(version = %image.version, size = image.data.len()))]
    pub async fn run_update(
        &self,
        device_id: &str,
        image: FirmwareImage,
        reboot_delay_s: Option<u32>,
    ) -> Result<FirmwareProgress, FirmwareError> {
        let mut session = self.begin(device_id, image)?;
        session.prepare().await?;
        session.transfer().await?;
        session.verify().await?;
        session
            .apply(reboot_delay_s.unwrap_or(self.settings.reboot_delay_s))
            .await?;
        Ok(session.progress())
    }

    /// Progress of the running update for `device_id`.
    pub fn progress(&self, device_id: &str) -> Option<FirmwareProgress> {
        self.active
            .get(device_id)
            .map(|entry| entry.value().1.borrow().clone())
    }

    pub fn active_updates(&self) -> Vec<FirmwareProgress> {
        self.active
            .iter()
            .map(|entry| entry.value().1.borrow().clone())
            .collect()
    }
}

/// One update attempt against one device. Dropping the session ends it.
pub struct FirmwareSession {
    session_id: u64,
    device_id: String,
    image: FirmwareImage,
    preferred_block_size: u32,
    orchestrator: Arc<Orchestrator>,
    active: Arc<ActiveUpdates>,
    phase: FirmwarePhase,
    block_size: u32,
    total_blocks: u32,
    blocks_acked: u32,
    bytes_sent: u64,
    progress: watch::Sender<FirmwareProgress>,
}

impl FirmwareSession {
    pub fn phase(&self) -> FirmwarePhase {
        self.phase
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn progress(&self) -> FirmwareProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FirmwareProgress> {
        self.progress.subscribe()
    }

    fn expect_phase(&self, operation: &'static str, expected: FirmwarePhase) -> Result<(), FirmwareError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(FirmwareError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    fn publish(&self, message: Option<String>) {
        let total_size = self.image.data.len() as u64;
        let percent = if total_size == 0 {
            0.0
        } else {
            (self.bytes_sent as f64 * 100.0 / total_size as f64) as f32
        };
        self.progress.send_replace(FirmwareProgress {
            device_id: self.device_id.clone(),
            version: self.image.version.clone(),
            phase: self.phase,
            block_size: self.block_size,
            blocks_acked: self.blocks_acked,
            total_blocks: self.total_blocks,
            bytes_sent: self.bytes_sent,
            total_size,
            percent,
            message,
        });
    }

    fn abort(&mut self, error: FirmwareError) -> FirmwareError {
        warn!(device_id = %self.device_id, phase = ?self.phase, error = %error, "firmware update aborted");
        self.phase = FirmwarePhase::Aborted;
        self.publish(Some(error.to_string()));
        error
    }

    /// Announces the image and negotiates the block size.
    pub async fn prepare(&mut self) -> Result<FirmwarePrepareResponse, FirmwareError> {
        self.expect_phase("prepare", FirmwarePhase::Idle)?;
        if self.image.data.is_empty() {
            return Err(self.abort(FirmwareError::EmptyImage));
        }

        let request = FirmwarePrepareRequest {
            total_size: self.image.data.len() as u64,
            preferred_block_size: self.preferred_block_size,
            image_type: self.image.image_type as i32,
            version: self.image.version.clone(),
        };
        let response = match self.orchestrator.firmware_prepare(&self.device_id, request).await {
            Ok(response) => response,
            Err(e) => return Err(self.abort(e.into())),
        };
        if !response.is_ok() {
            let status = response.status_label();
            return Err(self.abort(FirmwareError::NotReady {
                device: self.device_id.clone(),
                status,
            }));
        }
        if response.accepted_block_size == 0 {
            return Err(self.abort(FirmwareError::ZeroBlockSize(self.device_id.clone())));
        }

        self.block_size = self.preferred_block_size.min(response.accepted_block_size).max(1);
        self.total_blocks = self.image.data.len().div_ceil(self.block_size as usize) as u32;
        self.phase = FirmwarePhase::Prepared;
        self.publish(None);
        info!(
            device_id = %self.device_id,
            block_size = self.block_size,
            total_blocks = self.total_blocks,
            estimated_storage_ms = response.estimated_storage_ms,
            "firmware prepared"
        );
        Ok(response)
    }

    /// Sends every block in order, each only after the previous one is acknowledged.
    pub async fn transfer(&mut self) -> Result<(), FirmwareError> {
        self.expect_phase("transfer", FirmwarePhase::Prepared)?;
        self.phase = FirmwarePhase::Transferring;
        self.publish(None);

        let block_size = self.block_size as usize;
        for index in 0..self.total_blocks {
            let start = index as usize * block_size;
            let end = (start + block_size).min(self.image.data.len());
            let block = self.image.data[start..end].to_vec();
            let request = FirmwareTransferRequest::new(index, start as u64, block);

            let ack = match self.orchestrator.firmware_transfer(&self.device_id, request).await {
                Ok(ack) => ack,
                Err(e) => return Err(self.abort(e.into())),
            };
            if ack.block_index != index {
                return Err(self.abort(FirmwareError::BlockMismatch {
                    expected: index,
                    got: ack.block_index,
                }));
            }
            if !ack.is_ok() {
                let result = ack.status_label();
                return Err(self.abort(FirmwareError::BlockRejected {
                    device: self.device_id.clone(),
                    block_index: index,
                    result,
                }));
            }

            self.blocks_acked += 1;
            self.bytes_sent += (end - start) as u64;
            self.publish(None);
            debug!(device_id = %self.device_id, block = index, bytes_sent = self.bytes_sent, "block acknowledged");
        }
        Ok(())
    }

    /// Asks the device to check the received image.
    pub async fn verify(&mut self) -> Result<FirmwareVerifyResponse, FirmwareError> {
        self.expect_phase("verify", FirmwarePhase::Transferring)?;
        if self.blocks_acked != self.total_blocks {
            return Err(FirmwareError::InvalidPhase {
                operation: "verify",
                phase: self.phase,
            });
        }

        let request = FirmwareVerifyRequest {
            expected_version: self.image.version.clone(),
        };
        let response = match self.orchestrator.firmware_verify(&self.device_id, request).await {
            Ok(response) => response,
            Err(e) => return Err(self.abort(e.into())),
        };
        if !response.is_ok() {
            let result = response.status_label();
            return Err(self.abort(FirmwareError::VerifyFailed {
                device: self.device_id.clone(),
                result,
            }));
        }
        if response.version != self.image.version {
            warn!(
                device_id = %self.device_id,
                expected = %self.image.version,
                reported = %response.version,
                "device verified a different firmware version"
            );
        }

        self.phase = FirmwarePhase::Verified;
        self.publish(None);
        Ok(response)
    }

    /// Schedules the swap on the device. Does not wait for the reboot.
    pub async fn apply(&mut self, reboot_delay_s: u32) -> Result<FirmwareApplyResponse, FirmwareError> {
        self.expect_phase("apply", FirmwarePhase::Verified)?;

        let response = match self
            .orchestrator
            .firmware_apply(&self.device_id, FirmwareApplyRequest { reboot_delay_s })
            .await
        {
            Ok(response) => response,
            Err(e) => return Err(self.abort(e.into())),
        };
        if !response.is_ok() {
            let status = response.status_label();
            return Err(self.abort(FirmwareError::ApplyRejected {
                device: self.device_id.clone(),
                status,
            }));
        }

        self.phase = FirmwarePhase::Applied;
        self.publish(None);
        info!(device_id = %self.device_id, version = %self.image.version, reboot_delay_s, "firmware applied");
        Ok(response)
    }
}

impl Drop for FirmwareSession {
    fn drop(&mut self) {
        let session_id = self.session_id;
        self.active
            .remove_if(&self.device_id, |_, (id, _)| *id == session_id);
    }
}
