//! Host stand-ins for the radio, the clock and the delay provider.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use embedded_hal_async::delay::DelayNs;
use scanlink_core::device::Platform;
use scanlink_core::link::{LinkError, WifiLink};
use scanlink_core::storage::NetworkCredentials;

/// Hosts have no meaningful heap figure; status reports this instead.
const NOMINAL_FREE_HEAP: u32 = 256 * 1024;

/// Whether the simulated access point is reachable. Shared with the console.
#[derive(Debug, Clone)]
pub struct AccessPoint(Arc<AtomicBool>);

impl AccessPoint {
    pub fn new(up: bool) -> Self {
        Self(Arc::new(AtomicBool::new(up)))
    }

    pub fn set_up(&self, up: bool) {
        self.0.store(up, Ordering::Relaxed);
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Associates on the first status poll after `begin` while the access point
/// is up, and drops the association as soon as it goes down.
pub struct SimLink {
    access_point: AccessPoint,
    pending: bool,
    associated: bool,
}

impl SimLink {
    pub fn new(access_point: AccessPoint) -> Self {
        Self {
            access_point,
            pending: false,
            associated: false,
        }
    }
}

impl WifiLink for SimLink {
    async fn begin(&mut self, credentials: &NetworkCredentials) -> Result<(), LinkError> {
        log::debug!("sim: joining {}", credentials.ssid.as_str());
        self.pending = true;
        self.associated = false;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if !self.access_point.is_up() {
            self.associated = false;
        } else if self.pending {
            self.pending = false;
            self.associated = true;
        }
        self.associated
    }

    async fn disconnect(&mut self) {
        self.pending = false;
        self.associated = false;
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.associated.then_some(Ipv4Addr::LOCALHOST)
    }

    fn rssi(&mut self) -> Option<i8> {
        self.associated.then_some(-48)
    }
}

pub struct HostPlatform {
    started: Instant,
    mac: [u8; 6],
}

impl HostPlatform {
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            started: Instant::now(),
            mac,
        }
    }
}

impl Platform for HostPlatform {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn free_heap(&self) -> u32 {
        NOMINAL_FREE_HEAP
    }

    fn hardware_id(&self) -> [u8; 6] {
        self.mac
    }
}

/// Sleeps the calling thread; the simulator is single-threaded like the
/// device loop.
pub struct HostDelay;

impl DelayNs for HostDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use scanlink_core::storage::Security;

    use super::*;

    #[test]
    fn test_link_follows_access_point() {
        let access_point = AccessPoint::new(true);
        let mut link = SimLink::new(access_point.clone());
        assert!(!link.is_connected());

        block_on(link.begin(&NetworkCredentials::new("Lab", "pw", Security::Wpa))).unwrap();
        assert!(link.is_connected());
        assert_eq!(link.local_ip(), Some(Ipv4Addr::LOCALHOST));

        access_point.set_up(false);
        assert!(!link.is_connected());
        assert_eq!(link.rssi(), None);

        // Coming back is not enough; the device has to rejoin.
        access_point.set_up(true);
        assert!(!link.is_connected());
        block_on(link.begin(&NetworkCredentials::new("Lab", "pw", Security::Wpa))).unwrap();
        assert!(link.is_connected());
    }

    #[test]
    fn test_begin_while_access_point_down_never_associates() {
        let mut link = SimLink::new(AccessPoint::new(false));
        block_on(link.begin(&NetworkCredentials::new("Lab", "", Security::Open))).unwrap();
        assert!(!link.is_connected());
        assert!(!link.is_connected());
    }
}
