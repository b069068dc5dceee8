//! Statics shared between the firmware tasks.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_sync::pubsub::PubSubChannel;
use embassy_time::Delay;
use esp_storage::FlashStorage;
use heapless::String;
use log::{info, warn};

use scanlink_core::config::{
    BackendDefaults, DEFAULT_FIREBASE_URL, DEFAULT_SERVER_URL, MAX_LINE_LEN,
};
use scanlink_core::device::Device;
use scanlink_core::scan_router::{ScanEvent, ScanEventChannel};

use crate::http_client::TcpHttpClient;
use crate::platform::EspPlatform;
use crate::wifi::EspWifiLink;

/// Completed scanner lines waiting for the main loop.
pub const LINE_QUEUE_DEPTH: usize = 4;

/// Scan outcomes, published by the router.
pub static SCAN_EVENTS: ScanEventChannel = PubSubChannel::new();

pub static SCANNED_LINES: Channel<CriticalSectionRawMutex, String<MAX_LINE_LEN>, LINE_QUEUE_DEPTH> =
    Channel::new();

pub type FirmwareDevice =
    Device<'static, FlashStorage<'static>, EspWifiLink, Delay, TcpHttpClient, EspPlatform>;

/// The device is driven by the main loop and the control server.
pub type GlobalDevice = AsyncMutex<CriticalSectionRawMutex, FirmwareDevice>;

/// Backend defaults baked in at build time, see `build.rs`.
pub const fn backend_defaults() -> BackendDefaults {
    BackendDefaults {
        remote_base_url: match option_env!("SCANLINK_DEFAULT_FIREBASE_URL") {
            Some(url) => url,
            None => DEFAULT_FIREBASE_URL,
        },
        sync_base_url: match option_env!("SCANLINK_DEFAULT_SERVER_URL") {
            Some(url) => url,
            None => DEFAULT_SERVER_URL,
        },
        api_key: match option_env!("SCANLINK_DEFAULT_API_KEY") {
            Some(key) => key,
            None => "",
        },
    }
}

/// Logs every scan outcome; stands in for a status indicator.
#[embassy_executor::task]
pub async fn scan_events_task() {
    let Ok(mut subscriber) = SCAN_EVENTS.subscriber() else {
        warn!("events: no subscriber slot left");
        return;
    };
    loop {
        match subscriber.next_message_pure().await {
            ScanEvent::Recorded { code, mode } => info!("events: {} scan {}", mode.as_str(), code),
            ScanEvent::Delivered { code, .. } => info!("events: {} delivered", code),
            ScanEvent::Failed { code, .. } => warn!("events: {} not delivered", code),
            ScanEvent::Rejected { code } => warn!("events: {} is not an attendance code", code),
        }
    }
}
