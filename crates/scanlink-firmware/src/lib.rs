//! ESP32-S3 firmware-specific modules for scanlink
//!
//! This crate binds the hardware-independent logic in `scanlink_core` to the
//! ESP32-S3: the esp-radio station link, a TCP HTTP client on embassy-net,
//! the UART scanner reader, the control surface listener and on-chip flash.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod control_server;
pub mod error;
pub mod http_client;
pub mod platform;
pub mod scanner;
pub mod wifi;
