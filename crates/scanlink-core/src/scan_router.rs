//! Mode-aware handling of scanned lines.
//!
//! A trimmed line is either a provisioning code (handled by the device, never
//! recorded) or a scan. Scans are recorded, counted and dispatched according
//! to the mode in force when they arrive:
//!
//! - **Inventory**: any payload goes to the inventory endpoint.
//! - **Attendance**: the payload must be 8 to 12 ASCII digits. Anything else
//!   is recorded as undelivered and no call is made.
//!
//! Outcomes are published on a [`ScanEventChannel`] for whoever is listening
//! (status LED, display, the simulator console).

use alloc::string::{String, ToString};

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    pubsub::{PubSubChannel, Publisher},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ATTENDANCE_MAX_DIGITS, ATTENDANCE_MIN_DIGITS};
use crate::connectivity::{ConnectivityState, LinkMonitor};
use crate::history::{ScanHistory, ScanRecord};
use crate::http::HttpTransport;
use crate::provisioning::is_provisioning_code;
use crate::remote_sync::{RemoteSync, ScanDelivery};
use crate::storage::DeviceSettings;

/// Channel capacity for scan events.
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Number of subscribers that can listen to scan events.
pub const EVENT_SUBSCRIBERS: usize = 2;

/// Just the router.
pub const EVENT_PUBLISHERS: usize = 1;

pub type ScanEventChannel = PubSubChannel<
    CriticalSectionRawMutex,
    ScanEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

pub type ScanEventPublisher<'a> = Publisher<
    'a,
    CriticalSectionRawMutex,
    ScanEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Inventory,
    Attendance,
}

impl ScanMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ScanMode::Inventory => "inventory",
            ScanMode::Attendance => "attendance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inventory" => Some(ScanMode::Inventory),
            "attendance" => Some(ScanMode::Attendance),
            _ => None,
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            ScanMode::Inventory => 0,
            ScanMode::Attendance => 1,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ScanMode::Inventory),
            1 => Some(ScanMode::Attendance),
            _ => None,
        }
    }
}

/// Events published for every scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A scan was appended to history.
    Recorded { code: String, mode: ScanMode },
    /// At least one backend accepted the scan.
    Delivered { code: String, mode: ScanMode },
    /// No backend accepted the scan.
    Failed { code: String, mode: ScanMode },
    /// The payload was not a valid attendance code; nothing was sent.
    Rejected { code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Empty,
    Provisioning,
    Scan,
}

/// Classify an already trimmed line.
pub fn classify(line: &str) -> LineKind {
    if line.is_empty() {
        LineKind::Empty
    } else if is_provisioning_code(line) {
        LineKind::Provisioning
    } else {
        LineKind::Scan
    }
}

/// 8 to 12 ASCII digits.
pub fn is_valid_attendance_code(code: &str) -> bool {
    (ATTENDANCE_MIN_DIGITS..=ATTENDANCE_MAX_DIGITS).contains(&code.len())
        && code.bytes().all(|b| b.is_ascii_digit())
}

/// Result of routing one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Sent (or attempted) to the backends.
    Dispatched(ScanDelivery),
    /// Link down; recorded but not sent.
    Offline,
    /// Attendance payload failed validation.
    InvalidAttendance,
}

impl ScanOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, ScanOutcome::Dispatched(d) if d.any_delivered())
    }
}

pub struct ScanRouter<'a> {
    history: ScanHistory,
    last_scan: Option<String>,
    publisher: ScanEventPublisher<'a>,
}

impl<'a> ScanRouter<'a> {
    pub fn new(publisher: ScanEventPublisher<'a>) -> Self {
        Self {
            history: ScanHistory::default(),
            last_scan: None,
            publisher,
        }
    }

    pub fn history(&self) -> &ScanHistory {
        &self.history
    }

    pub fn last_scan(&self) -> Option<&str> {
        self.last_scan.as_deref()
    }

    /// Record and dispatch one scan under the current mode.
    ///
    /// `online` gates the remote calls; the scan is recorded either way.
    #[allow(clippy::too_many_arguments)]
    pub async fn route_scan<H, M>(
        &mut self,
        code: &str,
        now_ms: u64,
        settings: &DeviceSettings,
        conn: &mut ConnectivityState,
        online: bool,
        sync: &mut RemoteSync<H>,
        monitor: &mut M,
    ) -> ScanOutcome
    where
        H: HttpTransport,
        M: LinkMonitor,
    {
        let mode = settings.mode;
        self.last_scan = Some(code.to_string());
        conn.scan_count = conn.scan_count.wrapping_add(1);
        let index = self.history.push(ScanRecord {
            payload: code.to_string(),
            timestamp_ms: conn.uptime_ms(now_ms),
            device_id: settings.device_id.as_str().to_string(),
            mode,
            delivered_locally: false,
            delivered_remotely: false,
        });
        self.publish(ScanEvent::Recorded {
            code: code.to_string(),
            mode,
        });

        if mode == ScanMode::Attendance && !is_valid_attendance_code(code) {
            warn!("router: rejected attendance code {}", code);
            self.publish(ScanEvent::Rejected {
                code: code.to_string(),
            });
            return ScanOutcome::InvalidAttendance;
        }

        if !online {
            info!("router: offline, {} scan {} kept locally", mode.as_str(), code);
            self.publish(ScanEvent::Failed {
                code: code.to_string(),
                mode,
            });
            return ScanOutcome::Offline;
        }

        let delivery = sync
            .send_scan(code, mode, settings, now_ms, conn, monitor)
            .await;

        if let Some(record) = self.history.get_mut(index) {
            record.delivered_remotely = delivery.remote.is_delivered();
            record.delivered_locally = delivery.local.is_delivered();
        }

        let event = if delivery.any_delivered() {
            ScanEvent::Delivered {
                code: code.to_string(),
                mode,
            }
        } else {
            ScanEvent::Failed {
                code: code.to_string(),
                mode,
            }
        };
        self.publish(event);

        ScanOutcome::Dispatched(delivery)
    }

    fn publish(&self, event: ScanEvent) {
        self.publisher.publish_immediate(event);
    }
}
