//! Station link over esp-radio.
//!
//! `begin` applies the client configuration and kicks off association; the
//! link counts as connected once the radio is associated and DHCP has
//! handed the stack an address.

use core::net::Ipv4Addr;

use embassy_net::Stack;
use esp_radio::wifi::{AuthMethod, ClientConfig, ModeConfig, WifiController};
use log::{debug, warn};

use scanlink_core::link::{LinkError, WifiLink};
use scanlink_core::storage::{NetworkCredentials, Security};

pub struct EspWifiLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl EspWifiLink {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }
}

fn auth_method(security: Security) -> AuthMethod {
    match security {
        Security::Open => AuthMethod::None,
        Security::Wep => AuthMethod::Wep,
        Security::Wpa => AuthMethod::Wpa2Personal,
    }
}

impl WifiLink for EspWifiLink {
    async fn begin(&mut self, credentials: &NetworkCredentials) -> Result<(), LinkError> {
        let client = ClientConfig::default()
            .with_ssid(credentials.ssid.as_str().into())
            .with_password(credentials.password.as_str().into())
            .with_auth_method(auth_method(credentials.security));

        if matches!(self.controller.is_connected(), Ok(true)) {
            let _ = self.controller.disconnect_async().await;
        }

        self.controller
            .set_config(&ModeConfig::Client(client))
            .map_err(|e| {
                warn!("wifi: station config rejected: {:?}", e);
                LinkError::Config
            })?;

        if !matches!(self.controller.is_started(), Ok(true)) {
            self.controller.start_async().await.map_err(|e| {
                warn!("wifi: start failed: {:?}", e);
                LinkError::Start
            })?;
        }

        self.controller.connect().map_err(|e| {
            warn!("wifi: connect request failed: {:?}", e);
            LinkError::Association
        })
    }

    fn is_connected(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.stack.is_config_up()
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.controller.disconnect_async().await {
            debug!("wifi: disconnect: {:?}", e);
        }
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.stack.config_v4().map(|config| config.address.address())
    }

    fn rssi(&mut self) -> Option<i8> {
        self.controller
            .rssi()
            .ok()
            .and_then(|rssi| i8::try_from(rssi).ok())
    }
}
