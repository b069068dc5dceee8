//! Payload construction and delivery to the backends.
//!
//! Two backends are involved. The realtime database (`remote_base_url`)
//! receives every scan, heartbeat and offline notice. The web application
//! (`sync_base_url`), when configured, receives a mirror of each scan in the
//! shape its API routes expect.
//!
//! Every call is classified the same way: a 2xx response is delivered, any
//! other status is a rejection (backend reachable, nothing else changes) and
//! no response at all is a transport failure (clears `reported_online` and
//! forces a link re-check). A URL the transport cannot use is a configuration
//! problem and leaves connectivity alone, like a rejection.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::net::Ipv4Addr;

use embassy_time::Duration;
use log::{debug, info, warn};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::config::{DEFAULT_LOCATION, FIRMWARE_VERSION, Timings};
use crate::connectivity::{ConnectivityState, LinkMonitor};
use crate::http::{HttpTransport, Method, Request, TransportError};
use crate::scan_router::ScanMode;
use crate::storage::DeviceSettings;

const JSON_HEADERS: &[(&str, &str)] = &[("Content-Type", "application/json")];

/// Serializes as `{".sv":"timestamp"}`, filled in by the database on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimestamp;

impl Serialize for ServerTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(".sv", "timestamp")?;
        map.end()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InventoryScan<'a> {
    barcode: &'a str,
    device_id: &'a str,
    location: &'static str,
    mode: ScanMode,
    #[serde(rename = "type")]
    kind: &'static str,
    processed: bool,
    timestamp: ServerTimestamp,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceScan<'a> {
    nim: &'a str,
    device_id: &'a str,
    mode: ScanMode,
    #[serde(rename = "type")]
    kind: &'static str,
    scanned: bool,
    timestamp: ServerTimestamp,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatDoc<'a> {
    device_id: &'a str,
    status: &'static str,
    version: &'static str,
    uptime: u64,
    free_heap: u32,
    scan_count: u64,
    mode: ScanMode,
    ssid: &'a str,
    ip_address: String,
    rssi: Option<i8>,
    last_heartbeat: ServerTimestamp,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OfflineDoc<'a> {
    device_id: &'a str,
    status: &'static str,
    version: &'static str,
    scan_count: u64,
    mode: ScanMode,
    last_seen: ServerTimestamp,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MirrorInventory<'a> {
    barcode: &'a str,
    device_id: &'a str,
    timestamp: u64,
    location: &'static str,
    mode: ScanMode,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MirrorAttendance<'a> {
    nim: &'a str,
    device_id: &'a str,
}

/// Outcome of a single outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The backend answered with a non-2xx status.
    Rejected(u16),
    /// No response was obtained.
    Unreachable(TransportError),
    /// The configured URL cannot be used by this transport. Nothing was sent.
    Misconfigured(TransportError),
    /// Not attempted (backend not configured or link down).
    Skipped,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

/// Outcomes for both destinations of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanDelivery {
    /// Realtime database.
    pub remote: Delivery,
    /// Web application mirror.
    pub local: Delivery,
}

impl ScanDelivery {
    pub const SKIPPED: Self = Self {
        remote: Delivery::Skipped,
        local: Delivery::Skipped,
    };

    pub fn any_delivered(&self) -> bool {
        self.remote.is_delivered() || self.local.is_delivered()
    }
}

/// Device statistics reported with each heartbeat.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatStats<'a> {
    pub free_heap: u32,
    pub ssid: &'a str,
    pub ip: Option<Ipv4Addr>,
    pub rssi: Option<i8>,
}

pub struct RemoteSync<H> {
    http: H,
    timings: Timings,
}

impl<H: HttpTransport> RemoteSync<H> {
    pub fn new(http: H, timings: Timings) -> Self {
        Self { http, timings }
    }

    pub fn transport(&self) -> &H {
        &self.http
    }

    pub fn transport_mut(&mut self) -> &mut H {
        &mut self.http
    }

    pub fn heartbeat_due(&self, now_ms: u64, conn: &ConnectivityState) -> bool {
        conn.last_heartbeat_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.timings.heartbeat_interval_ms)
    }

    /// Send one scan to the database and, if configured, the web application.
    pub async fn send_scan<M: LinkMonitor>(
        &mut self,
        payload: &str,
        mode: ScanMode,
        settings: &DeviceSettings,
        now_ms: u64,
        conn: &mut ConnectivityState,
        monitor: &mut M,
    ) -> ScanDelivery {
        let device_id = settings.device_id.as_str();
        let timeout = self.timings.scan_timeout();

        let remote = if settings.has_remote() {
            let (path, body) = match mode {
                ScanMode::Inventory => (
                    "scans.json",
                    encode(&InventoryScan {
                        barcode: payload,
                        device_id,
                        location: DEFAULT_LOCATION,
                        mode,
                        kind: "inventory_scan",
                        processed: false,
                        timestamp: ServerTimestamp,
                    }),
                ),
                ScanMode::Attendance => (
                    "attendance.json",
                    encode(&AttendanceScan {
                        nim: payload,
                        device_id,
                        mode,
                        kind: "attendance_scan",
                        scanned: true,
                        timestamp: ServerTimestamp,
                    }),
                ),
            };
            let url = database_url(settings, path);
            self.call(Method::Post, &url, &body, timeout, now_ms, conn, monitor)
                .await
        } else {
            Delivery::Skipped
        };

        let local = if !settings.has_sync_server() {
            Delivery::Skipped
        } else if !conn.link_up {
            debug!("sync: link down, mirror skipped");
            Delivery::Skipped
        } else {
            let (path, body) = match mode {
                ScanMode::Inventory => (
                    "api/barcode-scan",
                    encode(&MirrorInventory {
                        barcode: payload,
                        device_id,
                        timestamp: conn.uptime_ms(now_ms),
                        location: DEFAULT_LOCATION,
                        mode,
                        kind: "inventory_scan",
                    }),
                ),
                ScanMode::Attendance => (
                    "api/attendance",
                    encode(&MirrorAttendance {
                        nim: payload,
                        device_id,
                    }),
                ),
            };
            let url = join_url(settings.sync_base_url.as_str(), path);
            self.call(Method::Post, &url, &body, timeout, now_ms, conn, monitor)
                .await
        };

        info!(
            "sync: {} scan {}: remote {:?}, local {:?}",
            mode.as_str(),
            payload,
            remote,
            local
        );
        ScanDelivery { remote, local }
    }

    /// Publish the online document. The attempt time is recorded whatever
    /// the outcome.
    pub async fn send_heartbeat<M: LinkMonitor>(
        &mut self,
        stats: &HeartbeatStats<'_>,
        settings: &DeviceSettings,
        now_ms: u64,
        conn: &mut ConnectivityState,
        monitor: &mut M,
    ) -> Delivery {
        conn.last_heartbeat_ms = Some(now_ms);

        let body = encode(&HeartbeatDoc {
            device_id: settings.device_id.as_str(),
            status: "online",
            version: FIRMWARE_VERSION,
            uptime: conn.uptime_ms(now_ms),
            free_heap: stats.free_heap,
            scan_count: conn.scan_count,
            mode: settings.mode,
            ssid: stats.ssid,
            ip_address: format!("{}", stats.ip.unwrap_or(Ipv4Addr::UNSPECIFIED)),
            rssi: stats.rssi,
            last_heartbeat: ServerTimestamp,
        });
        let url = device_doc_url(settings);
        let timeout = self.timings.heartbeat_timeout();

        let outcome = self
            .call(Method::Put, &url, &body, timeout, now_ms, conn, monitor)
            .await;
        debug!("sync: heartbeat {:?}", outcome);
        outcome
    }

    /// Best-effort offline notice. Never triggers a re-check.
    pub async fn mark_offline(
        &mut self,
        settings: &DeviceSettings,
        conn: &mut ConnectivityState,
    ) -> Delivery {
        let body = encode(&OfflineDoc {
            device_id: settings.device_id.as_str(),
            status: "offline",
            version: FIRMWARE_VERSION,
            scan_count: conn.scan_count,
            mode: settings.mode,
            last_seen: ServerTimestamp,
        });
        let url = device_doc_url(settings);
        let request = Request {
            method: Method::Put,
            url: &url,
            headers: JSON_HEADERS,
            body: &body,
            timeout: self.timings.heartbeat_timeout(),
        };

        let outcome = classify(self.http.request(&request).await);
        if let Delivery::Unreachable(_) = outcome {
            conn.reported_online = false;
        }
        debug!("sync: offline notice {:?}", outcome);
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn call<M: LinkMonitor>(
        &mut self,
        method: Method,
        url: &str,
        body: &[u8],
        timeout: Duration,
        now_ms: u64,
        conn: &mut ConnectivityState,
        monitor: &mut M,
    ) -> Delivery {
        let request = Request {
            method,
            url,
            headers: JSON_HEADERS,
            body,
            timeout,
        };

        let outcome = classify(self.http.request(&request).await);
        match outcome {
            Delivery::Delivered => conn.reported_online = true,
            Delivery::Rejected(status) => {
                warn!("sync: {} {} rejected with {}", method.as_str(), url, status);
            }
            Delivery::Misconfigured(e) => {
                warn!("sync: {} {} not sent: {}", method.as_str(), url, e);
            }
            Delivery::Unreachable(e) => {
                warn!("sync: {} {} failed: {}", method.as_str(), url, e);
                conn.reported_online = false;
                monitor.recheck(now_ms, conn);
            }
            Delivery::Skipped => {}
        }
        outcome
    }
}

fn classify(result: Result<crate::http::Response, TransportError>) -> Delivery {
    match result {
        Ok(response) if response.is_success() => Delivery::Delivered,
        Ok(response) => Delivery::Rejected(response.status),
        Err(e) if e.is_configuration() => Delivery::Misconfigured(e),
        Err(e) => Delivery::Unreachable(e),
    }
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    // Plain structs of strings and integers; serialization cannot fail
    serde_json::to_vec(value).unwrap_or_default()
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn database_url(settings: &DeviceSettings, path: &str) -> String {
    let mut url = join_url(settings.remote_base_url.as_str(), path);
    if !settings.api_key.is_empty() {
        url.push_str("?auth=");
        url.push_str(settings.api_key.as_str());
    }
    url
}

fn device_doc_url(settings: &DeviceSettings) -> String {
    let path = format!("devices/{}.json", settings.device_id.as_str());
    database_url(settings, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendDefaults;
    use crate::storage::bounded;
    use crate::testing::{CountingMonitor, FakeHttp};
    use embassy_futures::block_on;
    use serde_json::Value;

    fn settings() -> DeviceSettings {
        let mut settings = DeviceSettings::defaults_for(
            &[0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22],
            &BackendDefaults {
                remote_base_url: "http://db.local/",
                sync_base_url: "",
                api_key: "",
            },
        );
        settings.configured = true;
        settings
    }

    fn online() -> ConnectivityState {
        let mut conn = ConnectivityState::new(1_000);
        conn.link_up = true;
        conn
    }

    fn stats() -> HeartbeatStats<'static> {
        HeartbeatStats {
            free_heap: 120_000,
            ssid: "MyNet",
            ip: Some(Ipv4Addr::new(192, 168, 1, 50)),
            rssi: Some(-61),
        }
    }

    #[test]
    fn test_server_timestamp_shape() {
        let json = serde_json::to_string(&ServerTimestamp).unwrap();
        assert_eq!(json, r#"{".sv":"timestamp"}"#);
    }

    #[test]
    fn test_inventory_scan_payload() {
        let mut sync = RemoteSync::new(FakeHttp::new(), Timings::default());
        let mut conn = online();
        let mut monitor = CountingMonitor::default();

        let result = block_on(sync.send_scan(
            "8991234567890",
            ScanMode::Inventory,
            &settings(),
            5_000,
            &mut conn,
            &mut monitor,
        ));

        assert_eq!(result.remote, Delivery::Delivered);
        assert_eq!(result.local, Delivery::Skipped);
        let request = &sync.transport().requests[0];
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "http://db.local/scans.json");
        assert_eq!(request.timeout_ms, 10_000);

        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["barcode"], "8991234567890");
        assert_eq!(body["deviceId"], "ESP32-AABBCC001122");
        assert_eq!(body["location"], "Warehouse-Scanner");
        assert_eq!(body["mode"], "inventory");
        assert_eq!(body["type"], "inventory_scan");
        assert_eq!(body["processed"], false);
        assert_eq!(body["timestamp"][".sv"], "timestamp");
    }

    #[test]
    fn test_attendance_scan_payload_and_auth() {
        let mut sync = RemoteSync::new(FakeHttp::new(), Timings::default());
        let mut conn = online();
        let mut monitor = CountingMonitor::default();
        let mut settings = settings();
        settings.api_key = bounded("k3y");

        block_on(sync.send_scan(
            "10222005",
            ScanMode::Attendance,
            &settings,
            5_000,
            &mut conn,
            &mut monitor,
        ));

        let request = &sync.transport().requests[0];
        assert_eq!(request.url, "http://db.local/attendance.json?auth=k3y");
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["nim"], "10222005");
        assert_eq!(body["mode"], "attendance");
        assert_eq!(body["type"], "attendance_scan");
        assert_eq!(body["scanned"], true);
    }

    #[test]
    fn test_mirror_posts_to_web_application() {
        let mut sync = RemoteSync::new(FakeHttp::new(), Timings::default());
        let mut conn = online();
        let mut monitor = CountingMonitor::default();
        let mut settings = settings();
        settings.sync_base_url = bounded("http://app.local");

        let result = block_on(sync.send_scan(
            "ABC-1",
            ScanMode::Inventory,
            &settings,
            6_000,
            &mut conn,
            &mut monitor,
        ));

        assert_eq!(result.local, Delivery::Delivered);
        let mirror = &sync.transport().requests[1];
        assert_eq!(mirror.url, "http://app.local/api/barcode-scan");
        let body: Value = serde_json::from_str(&mirror.body).unwrap();
        assert_eq!(body["barcode"], "ABC-1");
        assert_eq!(body["timestamp"], 5_000);
    }

    #[test]
    fn test_heartbeat_payload_and_timestamp() {
        let mut sync = RemoteSync::new(FakeHttp::new(), Timings::default());
        let mut conn = online();
        conn.scan_count = 7;
        let mut monitor = CountingMonitor::default();

        let result = block_on(sync.send_heartbeat(&stats(), &settings(), 31_000, &mut conn, &mut monitor));

        assert_eq!(result, Delivery::Delivered);
        assert!(conn.reported_online);
        assert_eq!(conn.last_heartbeat_ms, Some(31_000));

        let request = &sync.transport().requests[0];
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.url, "http://db.local/devices/ESP32-AABBCC001122.json");
        assert_eq!(request.timeout_ms, 5_000);
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["status"], "online");
        assert_eq!(body["version"], "3.3");
        assert_eq!(body["uptime"], 30_000);
        assert_eq!(body["scanCount"], 7);
        assert_eq!(body["ipAddress"], "192.168.1.50");
        assert_eq!(body["rssi"], -61);
        assert_eq!(body["lastHeartbeat"][".sv"], "timestamp");
    }

    #[test]
    fn test_heartbeat_transport_failure_clears_online_and_rechecks() {
        let mut http = FakeHttp::new();
        http.push_failure(TransportError::Timeout);
        let mut sync = RemoteSync::new(http, Timings::default());
        let mut conn = online();
        conn.reported_online = true;
        let mut monitor = CountingMonitor::default();

        let result = block_on(sync.send_heartbeat(&stats(), &settings(), 40_000, &mut conn, &mut monitor));

        assert_eq!(result, Delivery::Unreachable(TransportError::Timeout));
        assert!(!conn.reported_online);
        assert_eq!(monitor.rechecks, 1);
        // Attempt time still advances
        assert_eq!(conn.last_heartbeat_ms, Some(40_000));
    }

    #[test]
    fn test_heartbeat_rejection_changes_nothing() {
        let mut http = FakeHttp::new();
        http.push_status(401);
        let mut sync = RemoteSync::new(http, Timings::default());
        let mut conn = online();
        conn.reported_online = true;
        let mut monitor = CountingMonitor::default();

        let result = block_on(sync.send_heartbeat(&stats(), &settings(), 40_000, &mut conn, &mut monitor));

        assert_eq!(result, Delivery::Rejected(401));
        assert!(conn.reported_online);
        assert_eq!(monitor.rechecks, 0);
    }

    #[test]
    fn test_unusable_url_leaves_connectivity_alone() {
        let mut http = FakeHttp::new();
        http.push_failure(TransportError::UnsupportedScheme);
        http.push_failure(TransportError::InvalidUrl);
        let mut sync = RemoteSync::new(http, Timings::default());
        let mut conn = online();
        conn.reported_online = true;
        let mut monitor = CountingMonitor::default();

        let result = block_on(sync.send_heartbeat(&stats(), &settings(), 40_000, &mut conn, &mut monitor));
        assert_eq!(
            result,
            Delivery::Misconfigured(TransportError::UnsupportedScheme)
        );

        let result = block_on(sync.send_scan(
            "X",
            ScanMode::Inventory,
            &settings(),
            41_000,
            &mut conn,
            &mut monitor,
        ));
        assert_eq!(
            result.remote,
            Delivery::Misconfigured(TransportError::InvalidUrl)
        );

        assert!(conn.reported_online);
        assert!(conn.link_up);
        assert_eq!(monitor.rechecks, 0);
    }

    #[test]
    fn test_heartbeat_scan_count_beyond_u32() {
        let mut sync = RemoteSync::new(FakeHttp::new(), Timings::default());
        let mut conn = online();
        conn.scan_count = u64::from(u32::MAX) + 1;
        let mut monitor = CountingMonitor::default();

        block_on(sync.send_heartbeat(&stats(), &settings(), 31_000, &mut conn, &mut monitor));

        let body: Value = serde_json::from_str(&sync.transport().requests[0].body).unwrap();
        assert_eq!(body["scanCount"], 4_294_967_296_u64);
    }

    #[test]
    fn test_mark_offline_ignores_failure() {
        let mut http = FakeHttp::new();
        http.push_failure(TransportError::Connect);
        let mut sync = RemoteSync::new(http, Timings::default());
        let mut conn = online();
        conn.reported_online = true;

        let result = block_on(sync.mark_offline(&settings(), &mut conn));

        assert_eq!(result, Delivery::Unreachable(TransportError::Connect));
        assert!(!conn.reported_online);
        let body: Value = serde_json::from_str(&sync.transport().requests[0].body).unwrap();
        assert_eq!(body["status"], "offline");
        assert_eq!(body["lastSeen"][".sv"], "timestamp");
    }

    #[test]
    fn test_mirror_skipped_after_link_lost() {
        let mut http = FakeHttp::new();
        http.push_failure(TransportError::Connect);
        let mut sync = RemoteSync::new(http, Timings::default());
        let mut conn = online();
        let mut monitor = CountingMonitor::reporting_down();
        let mut settings = settings();
        settings.sync_base_url = bounded("http://app.local");

        let result = block_on(sync.send_scan(
            "X",
            ScanMode::Inventory,
            &settings,
            0,
            &mut conn,
            &mut monitor,
        ));

        assert_eq!(result.local, Delivery::Skipped);
        assert_eq!(sync.transport().requests.len(), 1);
    }

    #[test]
    fn test_heartbeat_due() {
        let sync = RemoteSync::new(FakeHttp::new(), Timings::default());
        let mut conn = online();
        assert!(sync.heartbeat_due(0, &conn));
        conn.last_heartbeat_ms = Some(10_000);
        assert!(!sync.heartbeat_due(39_999, &conn));
        assert!(sync.heartbeat_due(40_000, &conn));
    }

    #[test]
    fn test_unconfigured_remote_is_skipped() {
        let mut sync = RemoteSync::new(FakeHttp::new(), Timings::default());
        let mut conn = online();
        let mut monitor = CountingMonitor::default();
        let mut settings = settings();
        settings.remote_base_url.clear();

        let result = block_on(sync.send_scan(
            "X",
            ScanMode::Inventory,
            &settings,
            0,
            &mut conn,
            &mut monitor,
        ));
        assert_eq!(result, ScanDelivery::SKIPPED);
        assert!(sync.transport().requests.is_empty());
    }
}
