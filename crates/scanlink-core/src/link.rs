//! WiFi link capability.

use core::net::Ipv4Addr;

use thiserror_no_std::Error;

use crate::storage::NetworkCredentials;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("radio rejected the configuration")]
    Config,
    #[error("radio failed to start")]
    Start,
    #[error("association failed")]
    Association,
}

/// Station-mode WiFi interface.
///
/// `begin` starts an association attempt and returns without waiting for it
/// to finish; progress is observed by polling `is_connected`.
pub trait WifiLink {
    fn begin(
        &mut self,
        credentials: &NetworkCredentials,
    ) -> impl Future<Output = Result<(), LinkError>>;

    /// Current link status, including an assigned address.
    fn is_connected(&mut self) -> bool;

    fn disconnect(&mut self) -> impl Future<Output = ()>;

    fn local_ip(&self) -> Option<Ipv4Addr>;

    /// Signal strength of the current association in dBm.
    fn rssi(&mut self) -> Option<i8>;
}
