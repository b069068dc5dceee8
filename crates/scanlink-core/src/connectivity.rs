//! Connect/reconnect state machine over a [`WifiLink`].
//!
//! The supervisory check is throttled to its interval and driven from the
//! poll cycle. A failed outbound call can force an early sample through
//! [`LinkMonitor::recheck`].

use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

use crate::config::Timings;
use crate::http::HttpTransport;
use crate::link::WifiLink;
use crate::remote_sync::RemoteSync;
use crate::storage::{DeviceSettings, NetworkCredentials, PersistedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Process-wide connectivity bookkeeping. Lives for one boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
    pub link_up: bool,
    /// Whether the last remote heartbeat or scan attempt reached the backend.
    pub reported_online: bool,
    /// `None` until the first supervisory check, or after a forced re-arm.
    pub last_link_check_ms: Option<u64>,
    /// Time of the last heartbeat attempt. `None` makes a heartbeat due now.
    pub last_heartbeat_ms: Option<u64>,
    pub boot_ms: u64,
    pub scan_count: u64,
}

impl ConnectivityState {
    pub const fn new(boot_ms: u64) -> Self {
        Self {
            link_up: false,
            reported_online: false,
            last_link_check_ms: None,
            last_heartbeat_ms: None,
            boot_ms,
            scan_count: 0,
        }
    }

    pub fn uptime_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.boot_ms)
    }
}

/// Out-of-band link sampling, used when an outbound call gets no response.
pub trait LinkMonitor {
    /// Sample the link immediately. Returns whether it is up.
    fn recheck(&mut self, now_ms: u64, conn: &mut ConnectivityState) -> bool;
}

/// What one call to [`ConnectivitySupervisor::supervise`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Called again within the check interval.
    Throttled,
    Steady,
    /// First positive sample after a gap.
    Restored,
    /// Link dropped since the last check.
    Lost { reconnected: bool },
    /// Link was already down.
    StillDown { reconnected: bool },
}

impl SupervisorAction {
    /// The link is up now after being down or never up.
    pub const fn link_established(self) -> bool {
        matches!(
            self,
            SupervisorAction::Restored
                | SupervisorAction::Lost { reconnected: true }
                | SupervisorAction::StillDown { reconnected: true }
        )
    }
}

pub struct ConnectivitySupervisor<L, D> {
    link: L,
    delay: D,
    timings: Timings,
    state: LinkState,
}

impl<L, D> ConnectivitySupervisor<L, D>
where
    L: WifiLink,
    D: DelayNs,
{
    pub fn new(link: L, delay: D, timings: Timings) -> Self {
        Self {
            link,
            delay,
            timings,
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Whether outbound calls should be attempted at all.
    pub fn is_online(&self, conn: &ConnectivityState) -> bool {
        self.state == LinkState::Connected && conn.link_up
    }

    /// Bounded connect attempt. Runs to completion once started.
    pub async fn connect(
        &mut self,
        credentials: &NetworkCredentials,
        conn: &mut ConnectivityState,
    ) -> bool {
        if !credentials.is_valid() {
            debug!("wifi: no usable credentials");
            self.state = LinkState::Disconnected;
            conn.link_up = false;
            return false;
        }

        info!("wifi: connecting to {}", credentials.ssid.as_str());
        self.state = LinkState::Connecting;

        if let Err(e) = self.link.begin(credentials).await {
            warn!("wifi: could not start association: {}", e);
            self.state = LinkState::Disconnected;
            conn.link_up = false;
            return false;
        }

        let poll_interval_ms =
            u32::try_from(self.timings.connect_poll_interval_ms).unwrap_or(u32::MAX);
        for attempt in 1..=self.timings.connect_attempts {
            self.delay.delay_ms(poll_interval_ms).await;
            if self.link.is_connected() {
                info!(
                    "wifi: connected after {} polls, ip {:?}",
                    attempt,
                    self.link.local_ip()
                );
                self.state = LinkState::Connected;
                conn.link_up = true;
                conn.last_heartbeat_ms = None;
                return true;
            }
        }

        warn!(
            "wifi: gave up after {} polls",
            self.timings.connect_attempts
        );
        self.link.disconnect().await;
        self.state = LinkState::Disconnected;
        conn.link_up = false;
        false
    }

    /// Throttled supervisory check.
    ///
    /// A lost link is reported to the backend on a best-effort basis before
    /// one reconnect burst is made.
    pub async fn supervise<H: HttpTransport>(
        &mut self,
        now_ms: u64,
        conn: &mut ConnectivityState,
        credentials: &NetworkCredentials,
        sync: &mut RemoteSync<H>,
        settings: &DeviceSettings,
    ) -> SupervisorAction {
        let interval = self.timings.link_check_interval_ms;
        if conn
            .last_link_check_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < interval)
        {
            return SupervisorAction::Throttled;
        }
        conn.last_link_check_ms = Some(now_ms);

        if self.link.is_connected() {
            if conn.link_up && self.state == LinkState::Connected {
                return SupervisorAction::Steady;
            }
            info!("wifi: link restored");
            self.state = LinkState::Connected;
            conn.link_up = true;
            conn.last_heartbeat_ms = None;
            return SupervisorAction::Restored;
        }

        let was_connected = self.state == LinkState::Connected;
        self.state = LinkState::Disconnected;
        conn.link_up = false;

        if was_connected {
            warn!("wifi: link lost");
            if settings.has_remote() {
                // Result deliberately dropped; the link is most likely gone
                let _ = sync.mark_offline(settings, conn).await;
            }
            let reconnected = self.connect(credentials, conn).await;
            SupervisorAction::Lost { reconnected }
        } else {
            let reconnected = self.connect(credentials, conn).await;
            SupervisorAction::StillDown { reconnected }
        }
    }
}

impl<L, D> LinkMonitor for ConnectivitySupervisor<L, D>
where
    L: WifiLink,
    D: DelayNs,
{
    fn recheck(&mut self, _now_ms: u64, conn: &mut ConnectivityState) -> bool {
        let up = self.link.is_connected();
        if !up {
            debug!("wifi: recheck found link down");
            conn.link_up = false;
            // Let the next supervisory check run straight away
            conn.last_link_check_ms = None;
        }
        up
    }
}
