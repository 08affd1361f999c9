// Constants shared across the dau gateway crates

/// The default configuration file name for the application.
/// This constant is used to specify the default configuration file
/// that the application will attempt to load at startup.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "dau-gateway.toml";

/// Environment variable prefix for settings overrides (`DAU__LISTENER__PORT=5000`).
pub const ENV_PREFIX: &str = "DAU";

/// Sender id stamped on server-issued envelopes when none is configured.
pub const DEFAULT_SERVER_ID: &str = "dau-server";

pub const LOG_DIR: &str = "./logs";
pub const LOG_FILE_NAME: &str = "dau-gateway.log";

/// IEEE 1588 event port (Sync, Delay_Req).
pub const PTP_EVENT_PORT: u16 = 319;
/// IEEE 1588 general port (Announce, Signaling).
pub const PTP_GENERAL_PORT: u16 = 320;

/// Shortest and longest unicast lease the negotiator grants, in seconds.
pub const PTP_MIN_LEASE_SECS: u32 = 60;
pub const PTP_MAX_LEASE_SECS: u32 = 3600;

pub const PTP_CONFIG_PATH: &str = "/etc/linuxptp/dau-unicast.conf";
