//! Test doubles for the capability traits.

use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use core::net::Ipv4Addr;

use embedded_hal_async::delay::DelayNs;

use crate::connectivity::{ConnectivityState, LinkMonitor};
use crate::device::Platform;
use crate::http::{HttpTransport, Method, Request, Response, TransportError};
use crate::link::{LinkError, WifiLink};
use crate::storage::NetworkCredentials;

/// Link that associates a fixed number of status polls after `begin`.
pub struct FakeLink {
    connect_after: Option<u32>,
    polls_since_begin: u32,
    pending: bool,
    associated: bool,
    pub begin_calls: u32,
    pub status_polls: u32,
    pub disconnect_calls: u32,
    pub last_ssid: String,
}

impl FakeLink {
    pub fn connects_after(polls: u32) -> Self {
        Self::with(Some(polls))
    }

    pub fn never_connects() -> Self {
        Self::with(None)
    }

    fn with(connect_after: Option<u32>) -> Self {
        Self {
            connect_after,
            polls_since_begin: 0,
            pending: false,
            associated: false,
            begin_calls: 0,
            status_polls: 0,
            disconnect_calls: 0,
            last_ssid: String::new(),
        }
    }

    /// Drop the association; it only comes back after another `begin`.
    pub fn drop_link(&mut self) {
        self.associated = false;
        self.pending = false;
    }

    pub fn set_never_connects(&mut self) {
        self.connect_after = None;
    }

    pub fn set_connects_after(&mut self, polls: u32) {
        self.connect_after = Some(polls);
    }
}

impl WifiLink for FakeLink {
    async fn begin(&mut self, credentials: &NetworkCredentials) -> Result<(), LinkError> {
        self.begin_calls += 1;
        self.last_ssid = credentials.ssid.as_str().into();
        self.polls_since_begin = 0;
        self.pending = true;
        self.associated = false;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.status_polls += 1;
        if !self.associated && self.pending {
            if self
                .connect_after
                .is_some_and(|n| self.polls_since_begin >= n)
            {
                self.associated = true;
                self.pending = false;
            } else {
                self.polls_since_begin += 1;
            }
        }
        self.associated
    }

    async fn disconnect(&mut self) {
        self.disconnect_calls += 1;
        self.drop_link();
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.associated.then_some(Ipv4Addr::new(192, 168, 4, 20))
    }

    fn rssi(&mut self) -> Option<i8> {
        self.associated.then_some(-55)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: String,
    pub timeout_ms: u64,
}

/// Scripted transport. Answers 200 once the script runs out.
#[derive(Default)]
pub struct FakeHttp {
    script: VecDeque<Result<Response, TransportError>>,
    pub requests: Vec<RecordedRequest>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&mut self, status: u16) {
        self.script.push_back(Ok(Response {
            status,
            body: Vec::new(),
        }));
    }

    pub fn push_failure(&mut self, error: TransportError) {
        self.script.push_back(Err(error));
    }
}

impl HttpTransport for FakeHttp {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        self.requests.push(RecordedRequest {
            method: request.method,
            url: request.url.into(),
            body: String::from_utf8_lossy(request.body).into_owned(),
            timeout_ms: request.timeout.as_millis(),
        });
        self.script.pop_front().unwrap_or(Ok(Response {
            status: 200,
            body: b"{}".to_vec(),
        }))
    }
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Counts out-of-band rechecks and reports a fixed link status.
pub struct CountingMonitor {
    pub rechecks: u32,
    up: bool,
}

impl Default for CountingMonitor {
    fn default() -> Self {
        Self {
            rechecks: 0,
            up: true,
        }
    }
}

impl CountingMonitor {
    pub fn reporting_down() -> Self {
        Self {
            rechecks: 0,
            up: false,
        }
    }
}

impl LinkMonitor for CountingMonitor {
    fn recheck(&mut self, _now_ms: u64, conn: &mut ConnectivityState) -> bool {
        self.rechecks += 1;
        conn.link_up = self.up;
        self.up
    }
}

/// Clock and identity under test control.
pub struct ManualPlatform {
    pub now_ms: u64,
    pub free_heap: u32,
    pub mac: [u8; 6],
}

impl ManualPlatform {
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            free_heap: 200_000,
            mac: [0x24, 0x6F, 0x28, 0x01, 0x02, 0x03],
        }
    }

    pub fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
    }
}

impl Platform for ManualPlatform {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn free_heap(&self) -> u32 {
        self.free_heap
    }

    fn hardware_id(&self) -> [u8; 6] {
        self.mac
    }
}
