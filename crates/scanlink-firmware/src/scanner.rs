//! UART scanner reader.
//!
//! The scanner types codes as ASCII lines. Completed lines are queued for the
//! main loop, which drains at most one per cycle.

use esp_hal::Async;
use esp_hal::uart::Uart;
use heapless::String;
use log::{debug, warn};

use scanlink_core::config::MAX_LINE_LEN;
use scanlink_core::line::{LineAssembler, LineEvent};

use crate::app_state::SCANNED_LINES;

/// Scanner modules ship configured for 9600 baud.
pub const SCANNER_BAUD: u32 = 9600;

fn to_line(bytes: &[u8]) -> Option<String<MAX_LINE_LEN>> {
    let text = core::str::from_utf8(bytes).ok()?;
    String::try_from(text).ok()
}

#[embassy_executor::task]
pub async fn scanner_task(mut uart: Uart<'static, Async>) {
    let mut assembler = LineAssembler::<MAX_LINE_LEN>::new();
    let mut rx = [0u8; 64];

    loop {
        let n = match uart.read_async(&mut rx).await {
            Ok(n) => n,
            Err(e) => {
                warn!("scanner: uart read failed: {:?}", e);
                continue;
            }
        };

        for &byte in &rx[..n] {
            let line = match assembler.push_byte(byte) {
                LineEvent::Complete(bytes) => to_line(bytes),
                LineEvent::Overflow => {
                    warn!("scanner: line longer than {} bytes dropped", MAX_LINE_LEN);
                    continue;
                }
                LineEvent::None => continue,
            };
            match line {
                Some(line) => {
                    debug!("scanner: {}", line.as_str());
                    SCANNED_LINES.send(line).await;
                }
                None => warn!("scanner: non-text line dropped"),
            }
        }
    }
}
