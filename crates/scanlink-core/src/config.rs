//! Compile-time defaults and runtime timing configuration.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Firmware version reported in heartbeats and status.
pub const FIRMWARE_VERSION: &str = "3.3";

/// Location label attached to inventory scans.
pub const DEFAULT_LOCATION: &str = "Warehouse-Scanner";

/// Prefix for device ids derived from the hardware MAC.
pub const DEVICE_ID_PREFIX: &str = "ESP32-";

/// Default realtime-database base URL.
pub const DEFAULT_FIREBASE_URL: &str =
    "https://barcodescanesp32-default-rtdb.asia-southeast1.firebasedatabase.app";

/// Default web application base URL.
pub const DEFAULT_SERVER_URL: &str = "https://stokmanager.vercel.app";

// Non-volatile layout: two fixed slots inside a 1 KiB region.
pub const STORAGE_REGION_LEN: usize = 1024;
pub const RECORD_BLOCK_LEN: usize = 512;
pub const CREDENTIALS_SLOT_OFFSET: u32 = 0;
pub const SETTINGS_SLOT_OFFSET: u32 = 512;

/// Number of scans kept in memory.
pub const HISTORY_CAPACITY: usize = 20;

/// TCP port of the local control surface.
pub const CONTROL_PORT: u16 = 80;

/// Longest scanner line accepted; longer lines are dropped.
pub const MAX_LINE_LEN: usize = 256;

/// Attendance identifiers are plain digit strings within these bounds.
pub const ATTENDANCE_MIN_DIGITS: usize = 8;
pub const ATTENDANCE_MAX_DIGITS: usize = 12;

pub const LINK_CHECK_INTERVAL_MS: u64 = 10_000;
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const CONNECT_ATTEMPTS: u8 = 20;
pub const CONNECT_POLL_INTERVAL_MS: u64 = 500;
pub const SCAN_TIMEOUT_MS: u64 = 10_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 5_000;
pub const LOOP_IDLE_MS: u64 = 10;

/// Backend endpoints written into freshly synthesized settings.
///
/// The firmware overrides these from its build environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendDefaults {
    pub remote_base_url: &'static str,
    pub sync_base_url: &'static str,
    pub api_key: &'static str,
}

impl Default for BackendDefaults {
    fn default() -> Self {
        Self {
            remote_base_url: DEFAULT_FIREBASE_URL,
            sync_base_url: DEFAULT_SERVER_URL,
            api_key: "",
        }
    }
}

/// Interval and timeout configuration for the supervisor and sync paths.
///
/// Defaults match the constants above; the simulator can override them from
/// a JSON file to exercise the timing paths faster.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Timings {
    pub link_check_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub connect_attempts: u8,
    pub connect_poll_interval_ms: u64,
    pub scan_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub loop_idle_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            link_check_interval_ms: LINK_CHECK_INTERVAL_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            connect_attempts: CONNECT_ATTEMPTS,
            connect_poll_interval_ms: CONNECT_POLL_INTERVAL_MS,
            scan_timeout_ms: SCAN_TIMEOUT_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
            loop_idle_ms: LOOP_IDLE_MS,
        }
    }
}

impl Timings {
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub const fn loop_idle(&self) -> Duration {
        Duration::from_millis(self.loop_idle_ms)
    }
}
