//! WiFi provisioning codes.
//!
//! The scanner reads the standard WiFi QR format:
//! `WIFI:S:<ssid>;T:<WPA|WEP|nopass>;P:<password>;H:<true|false>;;`
//!
//! Field order is free, `T` defaults to WPA and `P` to empty. Inside values a
//! backslash escapes `;`, `:`, `,` and `\`. A missing closing `;;` is
//! tolerated and the last field runs to the end of the input.

use heapless::String;
use log::{debug, warn};
use thiserror_no_std::Error;

use crate::storage::{NetworkCredentials, Security};

pub const PROVISIONING_PREFIX: &str = "WIFI:";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("not a provisioning code")]
    NotProvisioningCode,
    #[error("provisioning code has no SSID")]
    MissingSsid,
}

/// Whether a trimmed scanner line should be handled as a provisioning code.
pub fn is_provisioning_code(line: &str) -> bool {
    line.starts_with(PROVISIONING_PREFIX)
}

/// Decode a provisioning code into (not yet persisted) credentials.
pub fn parse(code: &str) -> Result<NetworkCredentials, ProvisioningError> {
    let body = code
        .trim()
        .strip_prefix(PROVISIONING_PREFIX)
        .ok_or(ProvisioningError::NotProvisioningCode)?;

    let mut ssid: String<63> = String::new();
    let mut password: String<63> = String::new();
    let mut security = Security::Wpa;

    for field in Fields::new(body) {
        if field.is_empty() {
            continue;
        }
        let Some((key, raw)) = field.split_once(':') else {
            debug!("provisioning: skipping field without key");
            continue;
        };
        match key {
            "S" => ssid = unescape(raw, "ssid"),
            "P" => password = unescape(raw, "password"),
            "T" => security = Security::from_field(&unescape::<16>(raw, "security")),
            // Hidden-network flag; the link scans for the SSID either way
            "H" => {}
            other => debug!("provisioning: ignoring field {}", other),
        }
    }

    if ssid.is_empty() {
        return Err(ProvisioningError::MissingSsid);
    }

    Ok(NetworkCredentials {
        ssid,
        password,
        security,
        valid: true,
        checksum: 0,
    })
}

/// Splits on `;` that are not preceded by a backslash escape.
struct Fields<'a> {
    rest: Option<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(body: &'a str) -> Self {
        Self { rest: Some(body) }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        let bytes = rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b';' => {
                    self.rest = Some(&rest[i + 1..]);
                    return Some(&rest[..i]);
                }
                _ => i += 1,
            }
        }
        self.rest = None;
        if rest.is_empty() { None } else { Some(rest) }
    }
}

fn unescape<const N: usize>(raw: &str, label: &str) -> String<N> {
    let mut out = String::new();
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        let ch = if ch == '\\' {
            match chars.next() {
                Some(escaped) => escaped,
                None => break,
            }
        } else {
            ch
        };
        if out.push(ch).is_err() {
            warn!("provisioning: {} longer than {} bytes, truncated", label, N);
            break;
        }
    }
    out
}
