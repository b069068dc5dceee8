use embassy_time::Instant;
use esp_hal::efuse::Efuse;

use scanlink_core::device::Platform;

pub struct EspPlatform {
    mac: [u8; 6],
}

impl EspPlatform {
    pub fn new() -> Self {
        Self {
            mac: Efuse::mac_address(),
        }
    }
}

impl Default for EspPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for EspPlatform {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    fn free_heap(&self) -> u32 {
        u32::try_from(esp_alloc::HEAP.free()).unwrap_or(u32::MAX)
    }

    fn hardware_id(&self) -> [u8; 6] {
        self.mac
    }
}
