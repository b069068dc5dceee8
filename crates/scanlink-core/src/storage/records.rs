//! The two persisted records and their field layouts.

use core::fmt::Write;

use heapless::String;
use serde::Serialize;

use super::{BlockReader, BlockWriter, PersistedRecord, bounded};
use crate::config::{
    BackendDefaults, CREDENTIALS_SLOT_OFFSET, DEVICE_ID_PREFIX, SETTINGS_SLOT_OFFSET,
};
use crate::scan_router::ScanMode;

/// Bumped whenever the settings layout changes. Older blocks are discarded.
pub const SETTINGS_SCHEMA_VERSION: u8 = 2;

const CREDENTIALS_MAGIC: u32 = u32::from_le_bytes(*b"SLC1");
const CREDENTIALS_VERSION: u8 = 1;
const SETTINGS_MAGIC: u32 = u32::from_le_bytes(*b"SLS1");

/// WiFi security type from a provisioning code.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    #[default]
    #[serde(rename = "WPA")]
    Wpa,
    #[serde(rename = "WEP")]
    Wep,
    #[serde(rename = "nopass")]
    Open,
}

impl Security {
    pub const fn as_str(self) -> &'static str {
        match self {
            Security::Wpa => "WPA",
            Security::Wep => "WEP",
            Security::Open => "nopass",
        }
    }

    /// Parse the `T:` field. Anything unrecognised degrades to WPA.
    pub fn from_field(value: &str) -> Self {
        if value.eq_ignore_ascii_case("WEP") {
            Security::Wep
        } else if value.eq_ignore_ascii_case("nopass") || value.eq_ignore_ascii_case("open") {
            Security::Open
        } else {
            Security::Wpa
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Security::Open => 0,
            Security::Wep => 1,
            Security::Wpa => 2,
        }
    }

    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Security::Open),
            1 => Some(Security::Wep),
            2 => Some(Security::Wpa),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub ssid: String<63>,
    pub password: String<63>,
    pub security: Security,
    pub valid: bool,
    pub checksum: u32,
}

impl NetworkCredentials {
    /// Blank credentials as found on first boot.
    pub fn empty() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            security: Security::Wpa,
            valid: false,
            checksum: 0,
        }
    }

    pub fn new(ssid: &str, password: &str, security: Security) -> Self {
        let ssid: String<63> = bounded(ssid);
        Self {
            valid: !ssid.is_empty(),
            ssid,
            password: bounded(password),
            security,
            checksum: 0,
        }
    }
}

impl PersistedRecord for NetworkCredentials {
    const NAME: &'static str = "credentials";
    const SLOT_OFFSET: u32 = CREDENTIALS_SLOT_OFFSET;
    const MAGIC: u32 = CREDENTIALS_MAGIC;
    const VERSION: u8 = CREDENTIALS_VERSION;

    fn encode_fields(&self, writer: &mut BlockWriter<'_>) {
        writer.put_bool(self.valid);
        writer.put_u8(self.security.to_u8());
        writer.put_str(&self.ssid);
        writer.put_str(&self.password);
    }

    fn decode_fields(reader: &mut BlockReader<'_>) -> Option<Self> {
        let valid = reader.get_bool()?;
        let security = Security::from_u8(reader.get_u8()?)?;
        let ssid = reader.get_str()?;
        let password = reader.get_str()?;
        Some(Self {
            ssid,
            password,
            security,
            valid,
            checksum: 0,
        })
    }

    fn is_valid(&self) -> bool {
        self.valid && !self.ssid.is_empty()
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub device_id: String<31>,
    pub remote_base_url: String<127>,
    pub sync_base_url: String<127>,
    pub api_key: String<63>,
    pub configured: bool,
    pub mode: ScanMode,
    pub schema_version: u8,
    pub checksum: u32,
}

impl DeviceSettings {
    /// First-boot settings for a device with the given hardware MAC.
    pub fn defaults_for(mac: &[u8; 6], backend: &BackendDefaults) -> Self {
        Self {
            device_id: device_id_from_mac(mac),
            remote_base_url: bounded(backend.remote_base_url),
            sync_base_url: bounded(backend.sync_base_url),
            api_key: bounded(backend.api_key),
            configured: true,
            mode: ScanMode::Inventory,
            schema_version: SETTINGS_SCHEMA_VERSION,
            checksum: 0,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.configured && !self.remote_base_url.is_empty()
    }

    pub fn has_sync_server(&self) -> bool {
        !self.sync_base_url.is_empty()
    }
}

/// `ESP32-` followed by the MAC in upper-case hex.
pub fn device_id_from_mac(mac: &[u8; 6]) -> String<31> {
    let mut id: String<31> = bounded(DEVICE_ID_PREFIX);
    for byte in mac {
        // 6 + 12 chars always fits
        let _ = write!(id, "{:02X}", byte);
    }
    id
}

impl PersistedRecord for DeviceSettings {
    const NAME: &'static str = "settings";
    const SLOT_OFFSET: u32 = SETTINGS_SLOT_OFFSET;
    const MAGIC: u32 = SETTINGS_MAGIC;
    const VERSION: u8 = SETTINGS_SCHEMA_VERSION;

    fn encode_fields(&self, writer: &mut BlockWriter<'_>) {
        writer.put_bool(self.configured);
        writer.put_u8(self.mode.to_u8());
        writer.put_str(&self.device_id);
        writer.put_str(&self.remote_base_url);
        writer.put_str(&self.sync_base_url);
        writer.put_str(&self.api_key);
    }

    fn decode_fields(reader: &mut BlockReader<'_>) -> Option<Self> {
        let configured = reader.get_bool()?;
        let mode = ScanMode::from_u8(reader.get_u8()?)?;
        Some(Self {
            configured,
            mode,
            device_id: reader.get_str()?,
            remote_base_url: reader.get_str()?,
            sync_base_url: reader.get_str()?,
            api_key: reader.get_str()?,
            schema_version: SETTINGS_SCHEMA_VERSION,
            checksum: 0,
        })
    }

    fn is_valid(&self) -> bool {
        self.configured && !self.device_id.is_empty()
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }
}
