use config::{Config, Environment, File};
use dau_gateway_error::DauResult;
use serde::{self, Deserialize};
use std::{ops::Deref, sync::Arc, time::Duration};

use crate::constants::{
    DEFAULT_SERVER_ID, ENV_PREFIX, LOG_DIR, PTP_CONFIG_PATH, PTP_EVENT_PORT, PTP_GENERAL_PORT,
    PTP_MAX_LEASE_SECS, PTP_MIN_LEASE_SECS,
};

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self(Arc::new(Inner::default()))
    }
}

impl Settings {
    /// Load settings from an optional TOML file, then `DAU__*` environment overrides.
    pub fn new(config_path: &str) -> DauResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("inventory.dau_device_ids")
                    .with_list_parse_key("ptp.daemon_args")
                    .with_list_parse_key("ptp.extra_global_options"),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    pub fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub orchestrator: Orchestrator,
    #[serde(default)]
    pub firmware: Firmware,
    #[serde(default)]
    pub ptp: Ptp,
    #[serde(default)]
    pub archive: Archive,
    #[serde(default)]
    pub inventory: Inventory,
    #[serde(default)]
    pub web: Web,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// Sender id stamped on every server-issued envelope header.
    #[serde(default = "General::server_id_default")]
    pub server_id: String,
    /// Initial log level (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default = "General::log_level_default")]
    pub log_level: String,
    /// Directory of the daily rolling log file.
    #[serde(default = "General::log_dir_default")]
    pub log_dir: String,
}

impl Default for General {
    fn default() -> Self {
        General {
            server_id: General::server_id_default(),
            log_level: General::log_level_default(),
            log_dir: General::log_dir_default(),
        }
    }
}

impl General {
    fn server_id_default() -> String {
        DEFAULT_SERVER_ID.into()
    }

    fn log_level_default() -> String {
        "info".into()
    }

    fn log_dir_default() -> String {
        LOG_DIR.into()
    }
}

/// Device-facing TCP listener.
#[derive(Debug, Clone, Deserialize)]
pub struct Listener {
    #[serde(default = "Listener::host_default")]
    pub host: String,
    #[serde(default = "Listener::port_default")]
    pub port: u16,
    /// Deadline for the first envelope of a fresh socket (identification)
    #[serde(default = "Listener::identification_timeout_ms_default")]
    pub identification_timeout_ms: u64,
    /// Largest envelope body accepted from the length prefix
    #[serde(default = "Listener::max_frame_len_default")]
    pub max_frame_len: usize,
    #[serde(default = "Listener::write_timeout_ms_default")]
    pub write_timeout_ms: u64,
    /// How long a reconnect waits for the superseded connection to drain
    #[serde(default = "Listener::supersede_drain_timeout_ms_default")]
    pub supersede_drain_timeout_ms: u64,
    #[serde(default = "Listener::shutdown_drain_timeout_ms_default")]
    pub shutdown_drain_timeout_ms: u64,
    #[serde(default = "Listener::tcp_nodelay_default")]
    pub tcp_nodelay: bool,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: Listener::host_default(),
            port: Listener::port_default(),
            identification_timeout_ms: Listener::identification_timeout_ms_default(),
            max_frame_len: Listener::max_frame_len_default(),
            write_timeout_ms: Listener::write_timeout_ms_default(),
            supersede_drain_timeout_ms: Listener::supersede_drain_timeout_ms_default(),
            shutdown_drain_timeout_ms: Listener::shutdown_drain_timeout_ms_default(),
            tcp_nodelay: Listener::tcp_nodelay_default(),
        }
    }
}

impl Listener {
    fn host_default() -> String {
        "0.0.0.0".into()
    }

    fn port_default() -> u16 {
        5000
    }

    fn identification_timeout_ms_default() -> u64 {
        10_000
    }

    fn max_frame_len_default() -> usize {
        16 * 1024 * 1024
    }

    fn write_timeout_ms_default() -> u64 {
        10_000
    }

    fn supersede_drain_timeout_ms_default() -> u64 {
        5_000
    }

    fn shutdown_drain_timeout_ms_default() -> u64 {
        5_000
    }

    fn tcp_nodelay_default() -> bool {
        true
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn identification_timeout(&self) -> Duration {
        Duration::from_millis(self.identification_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn supersede_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.supersede_drain_timeout_ms)
    }

    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_timeout_ms)
    }
}

/// Per-call timeouts of device commands, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Orchestrator {
    #[serde(default = "Orchestrator::heartbeat_timeout_ms_default")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "Orchestrator::default_timeout_ms_default")]
    pub default_timeout_ms: u64,
    #[serde(default = "Orchestrator::log_timeout_ms_default")]
    pub log_timeout_ms: u64,
    #[serde(default = "Orchestrator::data_timeout_ms_default")]
    pub data_timeout_ms: u64,
    #[serde(default = "Orchestrator::firmware_prepare_timeout_ms_default")]
    pub firmware_prepare_timeout_ms: u64,
    #[serde(default = "Orchestrator::firmware_transfer_timeout_ms_default")]
    pub firmware_transfer_timeout_ms: u64,
    #[serde(default = "Orchestrator::firmware_verify_timeout_ms_default")]
    pub firmware_verify_timeout_ms: u64,
    #[serde(default = "Orchestrator::firmware_apply_timeout_ms_default")]
    pub firmware_apply_timeout_ms: u64,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Orchestrator {
            heartbeat_timeout_ms: Orchestrator::heartbeat_timeout_ms_default(),
            default_timeout_ms: Orchestrator::default_timeout_ms_default(),
            log_timeout_ms: Orchestrator::log_timeout_ms_default(),
            data_timeout_ms: Orchestrator::data_timeout_ms_default(),
            firmware_prepare_timeout_ms: Orchestrator::firmware_prepare_timeout_ms_default(),
            firmware_transfer_timeout_ms: Orchestrator::firmware_transfer_timeout_ms_default(),
            firmware_verify_timeout_ms: Orchestrator::firmware_verify_timeout_ms_default(),
            firmware_apply_timeout_ms: Orchestrator::firmware_apply_timeout_ms_default(),
        }
    }
}

impl Orchestrator {
    fn heartbeat_timeout_ms_default() -> u64 {
        10_000
    }

    fn default_timeout_ms_default() -> u64 {
        15_000
    }

    fn log_timeout_ms_default() -> u64 {
        15_000
    }

    fn data_timeout_ms_default() -> u64 {
        20_000
    }

    fn firmware_prepare_timeout_ms_default() -> u64 {
        20_000
    }

    fn firmware_transfer_timeout_ms_default() -> u64 {
        10_000
    }

    fn firmware_verify_timeout_ms_default() -> u64 {
        20_000
    }

    fn firmware_apply_timeout_ms_default() -> u64 {
        10_000
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Firmware {
    /// Server-side block size preference; the device may lower it
    #[serde(default = "Firmware::preferred_block_size_default")]
    pub preferred_block_size: u32,
    #[serde(default = "Firmware::reboot_delay_s_default")]
    pub reboot_delay_s: u32,
}

impl Default for Firmware {
    fn default() -> Self {
        Firmware {
            preferred_block_size: Firmware::preferred_block_size_default(),
            reboot_delay_s: Firmware::reboot_delay_s_default(),
        }
    }
}

impl Firmware {
    fn preferred_block_size_default() -> u32 {
        4096
    }

    fn reboot_delay_s_default() -> u32 {
        5
    }
}

/// Unicast PTP lease negotiation and time-sync daemon supervision.
#[derive(Debug, Clone, Deserialize)]
pub struct Ptp {
    #[serde(default = "Ptp::enabled_default")]
    pub enabled: bool,
    #[serde(default = "Ptp::bind_host_default")]
    pub bind_host: String,
    #[serde(default = "Ptp::event_port_default")]
    pub event_port: u16,
    #[serde(default = "Ptp::general_port_default")]
    pub general_port: u16,
    /// Generated daemon configuration file
    #[serde(default = "Ptp::config_path_default")]
    pub config_path: String,
    /// Daemon executable; empty disables supervision
    #[serde(default = "Ptp::daemon_program_default")]
    pub daemon_program: String,
    #[serde(default = "Ptp::daemon_args_default")]
    pub daemon_args: Vec<String>,
    #[serde(default = "Ptp::sweep_interval_s_default")]
    pub sweep_interval_s: u64,
    #[serde(default = "Ptp::min_duration_s_default")]
    pub min_duration_s: u32,
    #[serde(default = "Ptp::max_duration_s_default")]
    pub max_duration_s: u32,
    #[serde(default)]
    pub domain_number: u8,
    #[serde(default = "Ptp::log_query_interval_default")]
    pub log_query_interval: i8,
    /// Extra `key value` lines appended to the `[global]` section
    #[serde(default)]
    pub extra_global_options: Vec<String>,
}

impl Default for Ptp {
    fn default() -> Self {
        Ptp {
            enabled: Ptp::enabled_default(),
            bind_host: Ptp::bind_host_default(),
            event_port: Ptp::event_port_default(),
            general_port: Ptp::general_port_default(),
            config_path: Ptp::config_path_default(),
            daemon_program: Ptp::daemon_program_default(),
            daemon_args: Ptp::daemon_args_default(),
            sweep_interval_s: Ptp::sweep_interval_s_default(),
            min_duration_s: Ptp::min_duration_s_default(),
            max_duration_s: Ptp::max_duration_s_default(),
            domain_number: 0,
            log_query_interval: Ptp::log_query_interval_default(),
            extra_global_options: Vec::new(),
        }
    }
}

impl Ptp {
    fn enabled_default() -> bool {
        false
    }

    fn bind_host_default() -> String {
        "0.0.0.0".into()
    }

    fn event_port_default() -> u16 {
        PTP_EVENT_PORT
    }

    fn general_port_default() -> u16 {
        PTP_GENERAL_PORT
    }

    fn config_path_default() -> String {
        PTP_CONFIG_PATH.into()
    }

    fn daemon_program_default() -> String {
        "ptp4l".into()
    }

    fn daemon_args_default() -> Vec<String> {
        vec!["-m".into()]
    }

    fn sweep_interval_s_default() -> u64 {
        30
    }

    fn min_duration_s_default() -> u32 {
        PTP_MIN_LEASE_SECS
    }

    fn max_duration_s_default() -> u32 {
        PTP_MAX_LEASE_SECS
    }

    fn log_query_interval_default() -> i8 {
        2
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_s.max(1))
    }
}

/// Downstream archival service.
#[derive(Debug, Clone, Deserialize)]
pub struct Archive {
    #[serde(default = "Archive::enabled_default")]
    pub enabled: bool,
    #[serde(default = "Archive::endpoint_default")]
    pub endpoint: String,
    #[serde(default = "Archive::connect_timeout_ms_default")]
    pub connect_timeout_ms: u64,
    /// Used when the device does not report a sample rate with the dataset
    #[serde(default = "Archive::default_sample_rate_hz_default")]
    pub default_sample_rate_hz: u32,
    #[serde(default = "Archive::default_channel_count_default")]
    pub default_channel_count: u32,
    #[serde(default = "Archive::stream_buffer_default")]
    pub stream_buffer: usize,
    /// Longest wait for room in one upload stream before that dataset is aborted
    #[serde(default = "Archive::send_timeout_ms_default")]
    pub send_timeout_ms: u64,
    /// An open dataset with no chunk for this long is aborted
    #[serde(default = "Archive::idle_timeout_ms_default")]
    pub idle_timeout_ms: u64,
}

impl Default for Archive {
    fn default() -> Self {
        Archive {
            enabled: Archive::enabled_default(),
            endpoint: Archive::endpoint_default(),
            connect_timeout_ms: Archive::connect_timeout_ms_default(),
            default_sample_rate_hz: Archive::default_sample_rate_hz_default(),
            default_channel_count: Archive::default_channel_count_default(),
            stream_buffer: Archive::stream_buffer_default(),
            send_timeout_ms: Archive::send_timeout_ms_default(),
            idle_timeout_ms: Archive::idle_timeout_ms_default(),
        }
    }
}

impl Archive {
    fn enabled_default() -> bool {
        false
    }

    fn endpoint_default() -> String {
        "http://127.0.0.1:50051".into()
    }

    fn connect_timeout_ms_default() -> u64 {
        5_000
    }

    fn default_sample_rate_hz_default() -> u32 {
        1000
    }

    fn default_channel_count_default() -> u32 {
        1
    }

    fn stream_buffer_default() -> usize {
        64
    }

    fn send_timeout_ms_default() -> u64 {
        5_000
    }

    fn idle_timeout_ms_default() -> u64 {
        60_000
    }

    #[inline]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Static answer of the inventory collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub dau_device_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Web {
    #[serde(default = "Web::enabled_default")]
    pub enabled: bool,
    #[serde(default = "Web::router_prefix_default")]
    pub router_prefix: String,
    #[serde(default = "Web::host_default")]
    pub host: String,
    #[serde(default = "Web::port_default")]
    pub port: u16,
    /// 0 = actix default (one worker per core)
    #[serde(default)]
    pub workers: usize,
}

impl Default for Web {
    fn default() -> Self {
        Web {
            enabled: Web::enabled_default(),
            router_prefix: Web::router_prefix_default(),
            host: Web::host_default(),
            port: Web::port_default(),
            workers: 0,
        }
    }
}

impl Web {
    fn enabled_default() -> bool {
        true
    }

    fn router_prefix_default() -> String {
        "/api".into()
    }

    fn host_default() -> String {
        "0.0.0.0".into()
    }

    fn port_default() -> u16 {
        5678
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::new("does-not-exist.toml").unwrap();
        assert_eq!(settings.listener.port, 5000);
        assert_eq!(settings.listener.identification_timeout_ms, 10_000);
        assert_eq!(settings.orchestrator.heartbeat_timeout_ms, 10_000);
        assert_eq!(settings.ptp.min_duration_s, 60);
        assert_eq!(settings.ptp.max_duration_s, 3600);
        assert_eq!(settings.ptp.sweep_interval(), Duration::from_secs(30));
        assert!(!settings.archive.enabled);
        assert_eq!(settings.archive.send_timeout(), Duration::from_secs(5));
        assert_eq!(settings.archive.idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[general]
server_id = "central-1"

[listener]
port = 6000

[archive]
idle_timeout_ms = 1500

[inventory]
dau_device_ids = ["dau-1", "dau-2"]
"#
        )
        .unwrap();

        let settings = Settings::new(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.general.server_id, "central-1");
        assert_eq!(settings.listener.port, 6000);
        assert_eq!(settings.inventory.dau_device_ids, vec!["dau-1", "dau-2"]);
        assert_eq!(settings.firmware.preferred_block_size, 4096);
        assert_eq!(settings.archive.idle_timeout_ms, 1500);
        assert_eq!(settings.archive.send_timeout_ms, 5000);
    }
}
