//! The device aggregate.
//!
//! [`Device`] owns every piece of runtime state: the store, the two loaded
//! records, connectivity bookkeeping, the supervisor, the sync client and the
//! scan router. Platforms drive it through [`Device::poll_cycle`] and the
//! control handler in [`crate::control`] and never touch the parts directly.

use embedded_hal_async::delay::DelayNs;
use embedded_storage::Storage;
use log::{info, warn};

use crate::config::{BackendDefaults, Timings};
use crate::connectivity::{ConnectivityState, ConnectivitySupervisor, SupervisorAction};
use crate::http::HttpTransport;
use crate::link::WifiLink;
use crate::provisioning::{self, ProvisioningError};
use crate::remote_sync::{Delivery, HeartbeatStats, RemoteSync};
use crate::scan_router::{LineKind, ScanEventPublisher, ScanMode, ScanOutcome, ScanRouter, classify};
use crate::storage::{DeviceSettings, NetworkCredentials, PersistentStore, StoreError};

/// Clock, memory and identity of the host platform.
pub trait Platform {
    /// Milliseconds since power-on.
    fn now_ms(&self) -> u64;
    fn free_heap(&self) -> u32;
    /// Factory-assigned station MAC.
    fn hardware_id(&self) -> [u8; 6];
}

/// What happened to one input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Ignored,
    Provisioned { connected: bool },
    ProvisioningRejected(ProvisioningError),
    Scanned(ScanOutcome),
}

/// Summary of one poll cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub supervisor: SupervisorAction,
    pub line: Option<LineOutcome>,
    pub heartbeat: Option<Delivery>,
}

/// Platform adapters a device is assembled from.
pub struct Parts<S, L, D, H, P> {
    pub flash: S,
    /// Offset of the storage region inside `flash`.
    pub region_offset: u32,
    pub link: L,
    pub delay: D,
    pub http: H,
    pub platform: P,
}

pub struct Device<'a, S, L, D, H, P> {
    pub(crate) store: PersistentStore<S>,
    pub(crate) supervisor: ConnectivitySupervisor<L, D>,
    pub(crate) sync: RemoteSync<H>,
    pub(crate) router: ScanRouter<'a>,
    pub(crate) platform: P,
    pub(crate) credentials: NetworkCredentials,
    pub(crate) settings: DeviceSettings,
    pub(crate) conn: ConnectivityState,
    pub(crate) control_started: bool,
    pub(crate) restart_requested: bool,
}

impl<'a, S, L, D, H, P> Device<'a, S, L, D, H, P>
where
    S: Storage,
    S::Error: core::fmt::Debug,
    L: WifiLink,
    D: DelayNs,
    H: HttpTransport,
    P: Platform,
{
    /// Load both records, synthesizing settings when needed, and make the
    /// first connection attempt if credentials exist.
    pub async fn boot(
        parts: Parts<S, L, D, H, P>,
        events: ScanEventPublisher<'a>,
        timings: Timings,
        backend: BackendDefaults,
    ) -> Self {
        let Parts {
            flash,
            region_offset,
            link,
            delay,
            http,
            platform,
        } = parts;

        let mut store = PersistentStore::new(flash, region_offset);
        let credentials = match store.load::<NetworkCredentials>() {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                info!("device: not provisioned, scan a WIFI: code");
                NetworkCredentials::empty()
            }
            Err(e) => {
                warn!("device: credentials unreadable: {}", e);
                NetworkCredentials::empty()
            }
        };
        let mac = platform.hardware_id();
        let settings = store.load_or_init(|| DeviceSettings::defaults_for(&mac, &backend));
        info!(
            "device: {} booting in {} mode",
            settings.device_id.as_str(),
            settings.mode.as_str()
        );

        let mut device = Self {
            store,
            supervisor: ConnectivitySupervisor::new(link, delay, timings),
            sync: RemoteSync::new(http, timings),
            router: ScanRouter::new(events),
            conn: ConnectivityState::new(platform.now_ms()),
            platform,
            credentials,
            settings,
            control_started: false,
            restart_requested: false,
        };

        if device.credentials.valid
            && device
                .supervisor
                .connect(&device.credentials, &mut device.conn)
                .await
        {
            device.start_control_surface();
        }
        device
    }

    /// One iteration of the cooperative loop.
    ///
    /// The pending input line is always handled before the heartbeat check,
    /// so a scan arriving in the same cycle as a due heartbeat goes out
    /// first.
    pub async fn poll_cycle(&mut self, pending_line: Option<&str>) -> CycleReport {
        let now = self.platform.now_ms();
        let supervisor = self
            .supervisor
            .supervise(
                now,
                &mut self.conn,
                &self.credentials,
                &mut self.sync,
                &self.settings,
            )
            .await;
        if supervisor.link_established() {
            self.start_control_surface();
        }

        let line = match pending_line {
            Some(line) => Some(self.handle_line(line).await),
            None => None,
        };

        let heartbeat = self.maybe_heartbeat().await;

        CycleReport {
            supervisor,
            line,
            heartbeat,
        }
    }

    /// Route one line from the scanner.
    pub async fn handle_line(&mut self, raw: &str) -> LineOutcome {
        let line = raw.trim();
        match classify(line) {
            LineKind::Empty => LineOutcome::Ignored,
            LineKind::Provisioning => self.provision(line).await,
            LineKind::Scan => LineOutcome::Scanned(self.route_scan(line).await),
        }
    }

    async fn provision(&mut self, line: &str) -> LineOutcome {
        let mut credentials = match provisioning::parse(line) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("device: provisioning code ignored: {}", e);
                return LineOutcome::ProvisioningRejected(e);
            }
        };

        info!(
            "device: provisioned for {} ({})",
            credentials.ssid.as_str(),
            credentials.security.as_str()
        );
        if let Err(e) = self.store.save(&mut credentials) {
            warn!("device: credentials not persisted: {}", e);
        }
        self.credentials = credentials;

        let connected = self
            .supervisor
            .connect(&self.credentials, &mut self.conn)
            .await;
        if connected {
            self.start_control_surface();
        }
        LineOutcome::Provisioned { connected }
    }

    /// Latches on the first successful connection, whichever path made it.
    fn start_control_surface(&mut self) {
        if !self.control_started {
            info!("device: control surface starting");
            self.control_started = true;
        }
    }

    pub(crate) async fn route_scan(&mut self, code: &str) -> ScanOutcome {
        let now = self.platform.now_ms();
        let online = self.supervisor.is_online(&self.conn);
        self.router
            .route_scan(
                code,
                now,
                &self.settings,
                &mut self.conn,
                online,
                &mut self.sync,
                &mut self.supervisor,
            )
            .await
    }

    async fn maybe_heartbeat(&mut self) -> Option<Delivery> {
        let now = self.platform.now_ms();
        if !self.sync.heartbeat_due(now, &self.conn)
            || !self.supervisor.is_online(&self.conn)
            || !self.settings.has_remote()
        {
            return None;
        }

        let rssi = self.supervisor.link_mut().rssi();
        let ip = self.supervisor.link().local_ip();
        let stats = HeartbeatStats {
            free_heap: self.platform.free_heap(),
            ssid: self.credentials.ssid.as_str(),
            ip,
            rssi,
        };
        Some(
            self.sync
                .send_heartbeat(
                    &stats,
                    &self.settings,
                    now,
                    &mut self.conn,
                    &mut self.supervisor,
                )
                .await,
        )
    }

    /// Switch the scan mode and persist it. Applies from the next line.
    pub fn set_mode(&mut self, mode: ScanMode) -> Result<(), StoreError> {
        if self.settings.mode != mode {
            info!("device: mode {} -> {}", self.settings.mode.as_str(), mode.as_str());
        }
        self.settings.mode = mode;
        self.store.save(&mut self.settings)
    }

    /// Zero both records. The caller restarts the device afterwards.
    pub fn factory_reset(&mut self) -> Result<(), StoreError> {
        warn!("device: factory reset");
        self.store.wipe()?;
        self.restart_requested = true;
        Ok(())
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn credentials(&self) -> &NetworkCredentials {
        &self.credentials
    }

    pub fn connectivity(&self) -> &ConnectivityState {
        &self.conn
    }

    pub fn router(&self) -> &ScanRouter<'a> {
        &self.router
    }

    pub fn supervisor(&self) -> &ConnectivitySupervisor<L, D> {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ConnectivitySupervisor<L, D> {
        &mut self.supervisor
    }

    pub fn sync(&self) -> &RemoteSync<H> {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut RemoteSync<H> {
        &mut self.sync
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn store(&self) -> &PersistentStore<S> {
        &self.store
    }

    /// Whether the local control surface should be serving.
    pub fn control_started(&self) -> bool {
        self.control_started
    }

    /// Set once a factory reset has been acknowledged.
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::STORAGE_REGION_LEN;
    use crate::http::Method;
    use crate::scan_router::ScanEventChannel;
    use crate::storage::{MemoryFlash, Security};
    use crate::testing::{FakeHttp, FakeLink, ManualPlatform, NoopDelay};
    use embassy_futures::block_on;

    pub(crate) type TestDevice<'a> =
        Device<'a, MemoryFlash, FakeLink, NoopDelay, FakeHttp, ManualPlatform>;

    pub(crate) fn backend() -> BackendDefaults {
        BackendDefaults {
            remote_base_url: "http://db.local",
            sync_base_url: "",
            api_key: "",
        }
    }

    pub(crate) fn boot_with<'a>(
        channel: &'a ScanEventChannel,
        flash: MemoryFlash,
        link: FakeLink,
    ) -> TestDevice<'a> {
        let parts = Parts {
            flash,
            region_offset: 0,
            link,
            delay: NoopDelay,
            http: FakeHttp::new(),
            platform: ManualPlatform::new(),
        };
        block_on(Device::boot(
            parts,
            channel.publisher().unwrap(),
            Timings::default(),
            backend(),
        ))
    }

    /// Flash that already holds credentials for `MyNet`.
    pub(crate) fn provisioned_flash() -> MemoryFlash {
        let mut store = PersistentStore::new(MemoryFlash::new(STORAGE_REGION_LEN), 0);
        let mut creds = NetworkCredentials::new("MyNet", "secret", Security::Wpa);
        store.save(&mut creds).unwrap();
        store.flash().clone()
    }

    pub(crate) fn online_device(channel: &ScanEventChannel) -> TestDevice<'_> {
        boot_with(channel, provisioned_flash(), FakeLink::connects_after(0))
    }

    #[test]
    fn test_first_boot_synthesizes_settings() {
        let channel = ScanEventChannel::new();
        let device = boot_with(
            &channel,
            MemoryFlash::new(STORAGE_REGION_LEN),
            FakeLink::connects_after(0),
        );

        assert_eq!(device.settings().device_id.as_str(), "ESP32-246F28010203");
        assert!(!device.credentials().valid);
        assert!(!device.control_started());
        assert_eq!(device.supervisor().link().begin_calls, 0);

        // Settings were persisted, credentials were not
        let mut store = PersistentStore::new(device.store().flash().clone(), 0);
        assert!(store.load::<DeviceSettings>().unwrap().is_some());
        assert!(store.load::<NetworkCredentials>().unwrap().is_none());
    }

    #[test]
    fn test_boot_with_credentials_connects() {
        let channel = ScanEventChannel::new();
        let device = online_device(&channel);

        assert!(device.connectivity().link_up);
        assert!(device.control_started());
        assert_eq!(device.supervisor().link().last_ssid, "MyNet");
    }

    #[test]
    fn test_provisioning_persists_and_connects() {
        let channel = ScanEventChannel::new();
        let mut device = boot_with(
            &channel,
            MemoryFlash::new(STORAGE_REGION_LEN),
            FakeLink::connects_after(1),
        );

        let outcome = block_on(device.handle_line("WIFI:S:Office;T:WPA;P:pw;;\r\n"));

        assert_eq!(outcome, LineOutcome::Provisioned { connected: true });
        assert!(device.control_started());
        assert_eq!(device.connectivity().scan_count, 0);
        assert!(device.router().history().is_empty());

        let mut store = PersistentStore::new(device.store().flash().clone(), 0);
        let saved: NetworkCredentials = store.load().unwrap().unwrap();
        assert_eq!(saved.ssid.as_str(), "Office");
    }

    #[test]
    fn test_malformed_provisioning_keeps_credentials() {
        let channel = ScanEventChannel::new();
        let mut device = online_device(&channel);

        let outcome = block_on(device.handle_line("WIFI:T:WPA;P:x;;"));

        assert_eq!(
            outcome,
            LineOutcome::ProvisioningRejected(ProvisioningError::MissingSsid)
        );
        assert_eq!(device.credentials().ssid.as_str(), "MyNet");
        assert!(device.router().history().is_empty());
    }

    #[test]
    fn test_blank_line_ignored() {
        let channel = ScanEventChannel::new();
        let mut device = online_device(&channel);
        assert_eq!(block_on(device.handle_line("  \r\n")), LineOutcome::Ignored);
        assert_eq!(device.connectivity().scan_count, 0);
    }

    #[test]
    fn test_poll_cycle_handles_input_before_heartbeat() {
        let channel = ScanEventChannel::new();
        let mut device = online_device(&channel);
        device.platform_mut().advance(1_000);

        // Heartbeat is due straight after connecting
        let report = block_on(device.poll_cycle(Some("8991234567890")));

        assert!(matches!(report.line, Some(LineOutcome::Scanned(_))));
        assert_eq!(report.heartbeat, Some(Delivery::Delivered));

        let requests = &device.sync().transport().requests;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::Post);
        assert!(requests[0].url.ends_with("/scans.json"));
        assert_eq!(requests[1].method, Method::Put);
        assert!(requests[1].body.contains("\"scanCount\":1"));
    }

    #[test]
    fn test_heartbeat_waits_for_interval() {
        let channel = ScanEventChannel::new();
        let mut device = online_device(&channel);

        let first = block_on(device.poll_cycle(None));
        assert_eq!(first.heartbeat, Some(Delivery::Delivered));

        device.platform_mut().advance(10_000);
        let second = block_on(device.poll_cycle(None));
        assert_eq!(second.heartbeat, None);

        device.platform_mut().advance(20_000);
        let third = block_on(device.poll_cycle(None));
        assert_eq!(third.heartbeat, Some(Delivery::Delivered));
    }

    #[test]
    fn test_late_access_point_starts_control_surface() {
        let channel = ScanEventChannel::new();
        let mut device = boot_with(&channel, provisioned_flash(), FakeLink::never_connects());
        assert!(!device.control_started());

        device.supervisor_mut().link_mut().set_connects_after(0);
        device.platform_mut().advance(10_000);
        let report = block_on(device.poll_cycle(None));

        assert_eq!(
            report.supervisor,
            SupervisorAction::StillDown { reconnected: true }
        );
        assert!(device.connectivity().link_up);
        assert!(device.control_started());
    }

    #[test]
    fn test_no_heartbeat_while_offline() {
        let channel = ScanEventChannel::new();
        let mut device = boot_with(&channel, provisioned_flash(), FakeLink::never_connects());

        let report = block_on(device.poll_cycle(Some("ITEM")));

        assert_eq!(report.heartbeat, None);
        assert_eq!(report.line, Some(LineOutcome::Scanned(ScanOutcome::Offline)));
        assert!(device.sync().transport().requests.is_empty());
    }

    #[test]
    fn test_transport_failure_triggers_recovery_next_cycle() {
        let channel = ScanEventChannel::new();
        let mut device = online_device(&channel);
        block_on(device.poll_cycle(None));

        // Link drops silently; the next scan gets no response
        device.supervisor_mut().link_mut().drop_link();
        device.supervisor_mut().link_mut().set_never_connects();
        device
            .sync_mut()
            .transport_mut()
            .push_failure(crate::http::TransportError::Connect);
        device.platform_mut().advance(1_000);
        block_on(device.poll_cycle(Some("ITEM-9")));
        assert!(!device.connectivity().link_up);
        assert!(!device.connectivity().reported_online);

        // Recheck re-armed the supervisor, so it runs inside its interval
        device.platform_mut().advance(1_000);
        let report = block_on(device.poll_cycle(None));
        assert_eq!(report.supervisor, SupervisorAction::Lost { reconnected: false });
    }

    #[test]
    fn test_set_mode_persists() {
        let channel = ScanEventChannel::new();
        let mut device = online_device(&channel);

        device.set_mode(ScanMode::Attendance).unwrap();

        let mut store = PersistentStore::new(device.store().flash().clone(), 0);
        let saved: DeviceSettings = store.load().unwrap().unwrap();
        assert_eq!(saved.mode, ScanMode::Attendance);
    }

    #[test]
    fn test_factory_reset_wipes_and_requests_restart() {
        let channel = ScanEventChannel::new();
        let mut device = online_device(&channel);

        device.factory_reset().unwrap();

        assert!(device.restart_requested());
        let mut store = PersistentStore::new(device.store().flash().clone(), 0);
        assert!(store.load::<NetworkCredentials>().unwrap().is_none());
        assert!(store.load::<DeviceSettings>().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_settings_recovered_at_boot() {
        let channel = ScanEventChannel::new();
        let mut flash = provisioned_flash();
        {
            let mut store = PersistentStore::new(flash.clone(), 0);
            let mut settings = DeviceSettings::defaults_for(&[9; 6], &backend());
            settings.mode = ScanMode::Attendance;
            store.save(&mut settings).unwrap();
            flash = store.flash().clone();
        }
        flash.bytes_mut()[512 + 20] ^= 0xFF;

        let device = boot_with(&channel, flash, FakeLink::connects_after(0));

        // Defaults from this board's MAC, not the corrupted block
        assert_eq!(device.settings().mode, ScanMode::Inventory);
        assert_eq!(device.settings().device_id.as_str(), "ESP32-246F28010203");
        assert!(device.credentials().valid);
    }
}
