//! Command-line options and console input.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "scanlink-simulator")]
#[command(about = "Run the scanlink device on the desktop")]
pub struct Options {
    /// Flash image; created erased when missing.
    #[arg(long, default_value = "scanlink-flash.bin")]
    pub flash: PathBuf,
    /// Control surface port on localhost.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    /// JSON file overriding interval and timeout settings.
    #[arg(long)]
    pub timings: Option<PathBuf>,
    /// Simulated station MAC, which determines the device id.
    #[arg(long, value_parser = parse_mac, default_value = "02:00:00:5c:a1:01")]
    pub mac: [u8; 6],
}

/// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-...` or twelve bare hex digits.
pub fn parse_mac(text: &str) -> Result<[u8; 6], String> {
    let invalid = || format!("invalid MAC address {text:?}");
    let digits: String = text.chars().filter(|c| !matches!(c, ':' | '-')).collect();
    if digits.len() != 12 || !digits.is_ascii() {
        return Err(invalid());
    }

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(mac)
}

/// One line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Forwarded to the device as if the scanner sent it.
    Line(String),
    /// `!link up` / `!link down`: toggle the simulated access point.
    Link(bool),
    Status,
    Quit,
    Unknown(String),
}

pub fn parse_console(line: &str) -> ConsoleInput {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.trim().strip_prefix('!') else {
        return ConsoleInput::Line(line.to_string());
    };

    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["link", "up"] => ConsoleInput::Link(true),
        ["link", "down"] => ConsoleInput::Link(false),
        ["status"] => ConsoleInput::Status,
        ["quit"] | ["exit"] => ConsoleInput::Quit,
        _ => ConsoleInput::Unknown(command.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, clap::Error> {
        Options::try_parse_from(std::iter::once("scanlink-simulator").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_without_arguments() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.flash, PathBuf::from("scanlink-flash.bin"));
        assert_eq!(options.port, 8080);
        assert_eq!(options.timings, None);
        assert_eq!(options.mac, [0x02, 0x00, 0x00, 0x5C, 0xA1, 0x01]);
    }

    #[test]
    fn test_all_options() {
        let options = parse(&[
            "--flash",
            "/tmp/img.bin",
            "--port",
            "9000",
            "--timings",
            "fast.json",
            "--mac",
            "24:6f:28:01:02:03",
        ])
        .unwrap();

        assert_eq!(options.flash, PathBuf::from("/tmp/img.bin"));
        assert_eq!(options.port, 9000);
        assert_eq!(options.timings, Some(PathBuf::from("fast.json")));
        assert_eq!(options.mac, [0x24, 0x6F, 0x28, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse(&["--port"]).is_err());
        assert!(parse(&["--port", "http"]).is_err());
        assert!(parse(&["--mac", "aa:bb"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }

    #[test]
    fn test_parse_mac_forms() {
        let expected = [0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22];
        assert_eq!(parse_mac("aa:bb:cc:00:11:22").unwrap(), expected);
        assert_eq!(parse_mac("AA-BB-CC-00-11-22").unwrap(), expected);
        assert_eq!(parse_mac("aabbcc001122").unwrap(), expected);
        assert!(parse_mac("aa:bb:cc").is_err());
        assert!(parse_mac("zz:bb:cc:00:11:22").is_err());
    }

    #[test]
    fn test_console_commands() {
        assert_eq!(parse_console("!link down\n"), ConsoleInput::Link(false));
        assert_eq!(parse_console("  !link   up"), ConsoleInput::Link(true));
        assert_eq!(parse_console("!status"), ConsoleInput::Status);
        assert_eq!(parse_console("!quit"), ConsoleInput::Quit);
        assert_eq!(
            parse_console("!reboot now"),
            ConsoleInput::Unknown("reboot now".into())
        );
    }

    #[test]
    fn test_console_lines_pass_through() {
        assert_eq!(
            parse_console("8991234567890\r\n"),
            ConsoleInput::Line("8991234567890".into())
        );
        assert_eq!(
            parse_console("WIFI:S:Lab;P:pw;;"),
            ConsoleInput::Line("WIFI:S:Lab;P:pw;;".into())
        );
        assert_eq!(parse_console(""), ConsoleInput::Line(String::new()));
    }
}
