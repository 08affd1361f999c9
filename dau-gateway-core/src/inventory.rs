use async_trait::async_trait;
use dau_gateway_error::DauResult;
use dau_gateway_models::settings::Inventory as InventorySettings;

/// Source of the device ids the gateway targets. The device database lives
/// outside the gateway; this is the only question asked of it.
#[async_trait]
pub trait DeviceInventory: Send + Sync + 'static {
    async fn dau_device_ids(&self) -> DauResult<Vec<String>>;
}

/// Inventory answered from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    device_ids: Vec<String>,
}

impl StaticInventory {
    pub fn new(device_ids: Vec<String>) -> Self {
        let mut device_ids: Vec<String> = device_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        device_ids.sort();
        device_ids.dedup();
        Self { device_ids }
    }
}

impl From<&InventorySettings> for StaticInventory {
    fn from(settings: &InventorySettings) -> Self {
        Self::new(settings.dau_device_ids.clone())
    }
}

#[async_trait]
impl DeviceInventory for StaticInventory {
    async fn dau_device_ids(&self) -> DauResult<Vec<String>> {
        Ok(self.device_ids.clone())
    }
}
