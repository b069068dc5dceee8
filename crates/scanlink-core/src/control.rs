//! Local HTTP control surface.
//!
//! Routing and JSON bodies only; the platform owns the socket. Every
//! response carries open CORS headers and any known path answers an
//! `OPTIONS` preflight.
//!
//! | method     | path              | action                                   |
//! |------------|-------------------|------------------------------------------|
//! | GET        | `/`               | static index                             |
//! | GET        | `/api/status`     | device, link and backend status          |
//! | GET        | `/api/scan`       | most recent scan                         |
//! | GET        | `/api/history`    | bounded scan history                     |
//! | POST       | `/api/config`     | update backend URLs / key, persist       |
//! | GET, POST  | `/api/mode`       | read or switch the scan mode, persist    |
//! | POST       | `/api/attendance` | route a code through the attendance path |
//! | POST       | `/reset`          | wipe both records, then restart          |

use alloc::string::String;
use alloc::vec::Vec;
use alloc::format;
use core::net::Ipv4Addr;

use embedded_hal_async::delay::DelayNs;
use embedded_storage::Storage;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::config::FIRMWARE_VERSION;
use crate::device::{Device, Platform};
use crate::history::ScanRecord;
use crate::http::{HttpTransport, encode_response};
use crate::link::WifiLink;
use crate::remote_sync::Delivery;
use crate::scan_router::{ScanMode, ScanOutcome, is_valid_attendance_code};
use crate::storage::{StoreError, fitted};

const JSON: &str = "application/json";
const HTML: &str = "text/html; charset=utf-8";

const INDEX_HTML: &str = "<!doctype html>\
<html><head><title>scanlink</title></head><body>\
<h1>scanlink</h1>\
<ul>\
<li><a href=\"/api/status\">/api/status</a></li>\
<li><a href=\"/api/scan\">/api/scan</a></li>\
<li><a href=\"/api/history\">/api/history</a></li>\
<li><a href=\"/api/mode\">/api/mode</a></li>\
</ul></body></html>";

const ROUTES: &[&str] = &[
    "/",
    "/api/status",
    "/api/scan",
    "/api/history",
    "/api/config",
    "/api/mode",
    "/api/attendance",
    "/reset",
];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("invalid request body")]
    BadBody,
    #[error("unknown mode")]
    BadMode,
    #[error("device is not in attendance mode")]
    WrongMode,
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("storage failure")]
    Storage(StoreError),
}

impl ControlError {
    pub const fn status(self) -> u16 {
        match self {
            ControlError::BadBody | ControlError::BadMode => 400,
            ControlError::WrongMode => 409,
            ControlError::NotFound => 404,
            ControlError::MethodNotAllowed => 405,
            ControlError::Storage(_) => 500,
        }
    }
}

impl From<StoreError> for ControlError {
    fn from(e: StoreError) -> Self {
        ControlError::Storage(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// The platform should restart once this response is flushed.
    pub restart: bool,
}

impl ControlResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        Self {
            status,
            content_type: JSON,
            body: serde_json::to_vec(value).unwrap_or_default(),
            restart: false,
        }
    }

    fn error(error: ControlError) -> Self {
        Self::json(
            error.status(),
            &Ack {
                success: false,
                message: &format!("{}", error),
            },
        )
    }

    fn preflight() -> Self {
        Self {
            status: 204,
            content_type: JSON,
            body: Vec::new(),
            restart: false,
        }
    }

    /// Full HTTP/1.1 response bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_response(self.status, self.content_type, &self.body)
    }
}

#[derive(Serialize)]
struct Ack<'a> {
    success: bool,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot<'a> {
    pub device_id: &'a str,
    pub version: &'static str,
    pub wifi_connected: bool,
    pub online: bool,
    pub ssid: &'a str,
    pub ip_address: String,
    pub rssi: Option<i8>,
    pub last_scan: Option<&'a str>,
    pub server_url: &'a str,
    pub firebase_url: &'a str,
    pub api_key_set: bool,
    pub uptime: u64,
    pub free_heap: u32,
    pub scan_count: u64,
    pub mode: ScanMode,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LastScan<'a> {
    status: &'static str,
    barcode: &'a str,
    mode: ScanMode,
    timestamp: u64,
    delivered_locally: bool,
    delivered_remotely: bool,
}

#[derive(Serialize)]
struct History<'a> {
    count: usize,
    capacity: usize,
    scans: Vec<&'a ScanRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigUpdate {
    server_url: Option<String>,
    firebase_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ModeBody {
    mode: ScanMode,
}

#[derive(Deserialize)]
struct AttendanceRequest {
    code: String,
    #[serde(default)]
    test: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceReply<'a> {
    success: bool,
    code: &'a str,
    valid: bool,
    test: bool,
    delivered_remotely: bool,
    delivered_locally: bool,
    message: &'static str,
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
    /// Answer one control request.
    pub async fn handle_control(&mut self, method: &str, path: &str, body: &[u8]) -> ControlResponse {
        let result = match (method, path) {
            ("OPTIONS", path) if ROUTES.contains(&path) => Ok(ControlResponse::preflight()),
            ("GET", "/") => Ok(ControlResponse {
                status: 200,
                content_type: HTML,
                body: INDEX_HTML.as_bytes().to_vec(),
                restart: false,
            }),
            ("GET", "/api/status") => Ok(self.status_response()),
            ("GET", "/api/scan") => Ok(self.last_scan_response()),
            ("GET", "/api/history") => Ok(self.history_response()),
            ("POST", "/api/config") => self.update_config(body),
            ("GET", "/api/mode") => Ok(ControlResponse::json(
                200,
                &ModeBody {
                    mode: self.settings.mode,
                },
            )),
            ("POST", "/api/mode") => self.switch_mode(body),
            ("POST", "/api/attendance") => self.attendance(body).await,
            ("POST", "/reset") => self.reset(),
            (_, path) if ROUTES.contains(&path) => Err(ControlError::MethodNotAllowed),
            _ => Err(ControlError::NotFound),
        };

        result.unwrap_or_else(|e| {
            warn!("control: {} {} -> {}", method, path, e);
            ControlResponse::error(e)
        })
    }

    pub fn status(&mut self) -> StatusSnapshot<'_> {
        let now = self.platform.now_ms();
        let rssi = self.supervisor.link_mut().rssi();
        let ip = self.supervisor.link().local_ip();
        StatusSnapshot {
            device_id: self.settings.device_id.as_str(),
            version: FIRMWARE_VERSION,
            wifi_connected: self.conn.link_up,
            online: self.conn.reported_online,
            ssid: self.credentials.ssid.as_str(),
            ip_address: format!("{}", ip.unwrap_or(Ipv4Addr::UNSPECIFIED)),
            rssi,
            last_scan: self.router.last_scan(),
            server_url: self.settings.sync_base_url.as_str(),
            firebase_url: self.settings.remote_base_url.as_str(),
            api_key_set: !self.settings.api_key.is_empty(),
            uptime: self.conn.uptime_ms(now),
            free_heap: self.platform.free_heap(),
            scan_count: self.conn.scan_count,
            mode: self.settings.mode,
        }
    }

    fn status_response(&mut self) -> ControlResponse {
        let snapshot = self.status();
        ControlResponse::json(200, &snapshot)
    }

    fn last_scan_response(&self) -> ControlResponse {
        match self.router.history().latest() {
            Some(record) => ControlResponse::json(
                200,
                &LastScan {
                    status: "ok",
                    barcode: &record.payload,
                    mode: record.mode,
                    timestamp: record.timestamp_ms,
                    delivered_locally: record.delivered_locally,
                    delivered_remotely: record.delivered_remotely,
                },
            ),
            None => ControlResponse::json(
                200,
                &Ack {
                    success: false,
                    message: "no scan yet",
                },
            ),
        }
    }

    fn history_response(&self) -> ControlResponse {
        let history = self.router.history();
        ControlResponse::json(
            200,
            &History {
                count: history.len(),
                capacity: history.capacity(),
                scans: history.entries().iter().collect(),
            },
        )
    }

    fn update_config(&mut self, body: &[u8]) -> Result<ControlResponse, ControlError> {
        let update: ConfigUpdate =
            serde_json::from_slice(body).map_err(|_| ControlError::BadBody)?;

        // Validate every field before touching the live settings
        let server_url = update
            .server_url
            .as_deref()
            .map(|url| fitted(url.trim()).ok_or(ControlError::BadBody))
            .transpose()?;
        let firebase_url = update
            .firebase_url
            .as_deref()
            .map(|url| fitted(url.trim()).ok_or(ControlError::BadBody))
            .transpose()?;
        let api_key = update
            .api_key
            .as_deref()
            .map(|key| fitted(key.trim()).ok_or(ControlError::BadBody))
            .transpose()?;

        if let Some(url) = server_url {
            self.settings.sync_base_url = url;
        }
        if let Some(url) = firebase_url {
            self.settings.remote_base_url = url;
        }
        if let Some(key) = api_key {
            self.settings.api_key = key;
        }
        self.store.save(&mut self.settings)?;
        info!("control: configuration updated");

        Ok(ControlResponse::json(
            200,
            &Ack {
                success: true,
                message: "configuration saved",
            },
        ))
    }

    fn switch_mode(&mut self, body: &[u8]) -> Result<ControlResponse, ControlError> {
        let request: ModeBody = serde_json::from_slice(body).map_err(|_| ControlError::BadMode)?;
        self.set_mode(request.mode)?;
        Ok(ControlResponse::json(200, &ModeBody { mode: request.mode }))
    }

    async fn attendance(&mut self, body: &[u8]) -> Result<ControlResponse, ControlError> {
        let request: AttendanceRequest =
            serde_json::from_slice(body).map_err(|_| ControlError::BadBody)?;
        if self.settings.mode != ScanMode::Attendance {
            return Err(ControlError::WrongMode);
        }

        let code = request.code.trim();
        if code.is_empty() {
            return Err(ControlError::BadBody);
        }
        let valid = is_valid_attendance_code(code);
        let outcome = self.route_scan(code).await;

        let (remote, local) = match outcome {
            ScanOutcome::Dispatched(d) => (d.remote, d.local),
            _ => (Delivery::Skipped, Delivery::Skipped),
        };
        let message = match outcome {
            ScanOutcome::InvalidAttendance => "invalid attendance code",
            ScanOutcome::Offline => "recorded, device offline",
            ScanOutcome::Dispatched(_) if outcome.delivered() => "attendance recorded",
            ScanOutcome::Dispatched(_) => "delivery failed",
        };

        Ok(ControlResponse::json(
            200,
            &AttendanceReply {
                success: outcome.delivered(),
                code,
                valid,
                test: request.test,
                delivered_remotely: remote.is_delivered(),
                delivered_locally: local.is_delivered(),
                message,
            },
        ))
    }

    fn reset(&mut self) -> Result<ControlResponse, ControlError> {
        self.factory_reset()?;
        let mut response = ControlResponse::json(
            200,
            &Ack {
                success: true,
                message: "configuration wiped, restarting",
            },
        );
        response.restart = true;
        Ok(response)
    }
}
