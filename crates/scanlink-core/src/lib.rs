//! Hardware-independent core library for scanlink
//!
//! This crate contains all platform-agnostic logic for the scanlink barcode
//! scanner bridge: the checksummed configuration store, WiFi provisioning
//! code parsing, the connectivity supervisor, remote synchronisation, the
//! mode-aware scan router and the local HTTP control surface.
//!
//! Hardware is reached only through capability traits ([`link::WifiLink`],
//! [`http::HttpTransport`], [`device::Platform`] and
//! [`embedded_storage::Storage`]), so the crate compiles on both embedded
//! targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod checksum;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod device;
pub mod history;
pub mod http;
pub mod line;
pub mod link;
pub mod provisioning;
pub mod remote_sync;
pub mod scan_router;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
