//! Desktop simulator for the scanlink barcode scanner bridge.
//!
//! Runs the real `scanlink_core::device::Device` on the host: configuration
//! lives in a flash image file, stdin stands in for the scanner, outbound
//! calls go out through `reqwest` and the control surface listens on
//! localhost.
//!
//! # Console
//!
//! | Input          | Action                                   |
//! |----------------|------------------------------------------|
//! | any text       | Delivered as a scanner line               |
//! | `!link down`   | Take the simulated access point away     |
//! | `!link up`     | Bring it back                            |
//! | `!status`      | Print the status document                |
//! | `!quit`        | Exit (so does end of input)              |
//!
//! A factory reset from the control surface restarts the device in place.

mod cli;
mod control;
mod flash;
mod host;
mod transport;

use std::fs;
use std::io::BufRead;
use std::net::TcpStream;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use embassy_futures::block_on;
use log::{info, warn};

use scanlink_core::config::{BackendDefaults, Timings};
use scanlink_core::device::{Device, Parts};
use scanlink_core::http::parse_request;
use scanlink_core::scan_router::{ScanEvent, ScanEventChannel};

use cli::{ConsoleInput, Options, parse_console};
use control::{ControlListener, read_request, send, unparsed_reply};
use flash::FileFlash;
use host::{AccessPoint, HostDelay, HostPlatform, SimLink};
use transport::ReqwestTransport;

static SCAN_EVENTS: ScanEventChannel = ScanEventChannel::new();

type SimDevice = Device<'static, FileFlash, SimLink, HostDelay, ReqwestTransport, HostPlatform>;

enum Exit {
    Quit,
    Restart,
}

fn load_timings(path: Option<&Path>) -> anyhow::Result<Timings> {
    let Some(path) = path else {
        return Ok(Timings::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn spawn_console() -> Receiver<ConsoleInput> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(parse_console(&line)).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_event(event: &ScanEvent) {
    match event {
        ScanEvent::Recorded { code, mode } => println!("[{}] {}", mode.as_str(), code),
        ScanEvent::Delivered { code, .. } => println!("  delivered {code}"),
        ScanEvent::Failed { code, .. } => println!("  NOT delivered {code}"),
        ScanEvent::Rejected { code } => println!("  rejected {code}: not an attendance code"),
    }
}

/// Answer one control connection. Returns whether the device asked to
/// restart.
async fn serve(stream: &mut TcpStream, device: &mut SimDevice) -> anyhow::Result<bool> {
    let buf = read_request(stream)?;
    let (bytes, restart) = match parse_request(&buf) {
        Ok(Some(request)) => {
            let response = device
                .handle_control(request.method, request.path, request.body)
                .await;
            (response.to_bytes(), response.restart)
        }
        Ok(None) => (unparsed_reply(&buf), false),
        Err(e) => {
            warn!("control: {e}");
            (unparsed_reply(&buf), false)
        }
    };
    send(stream, &bytes)?;
    Ok(restart)
}

/// Boot the device and drive it until it quits or asks for a restart.
async fn run(
    options: &Options,
    timings: Timings,
    console: &Receiver<ConsoleInput>,
    access_point: &AccessPoint,
    control: &ControlListener,
) -> anyhow::Result<Exit> {
    let flash = FileFlash::open(&options.flash)?;
    info!("simulator: flash image {}", flash.path().display());
    let publisher = SCAN_EVENTS
        .publisher()
        .map_err(|_| anyhow!("scan event publisher already taken"))?;
    let mut events = SCAN_EVENTS
        .subscriber()
        .map_err(|_| anyhow!("no scan event subscriber slot left"))?;

    let mut device: SimDevice = Device::boot(
        Parts {
            flash,
            region_offset: 0,
            link: SimLink::new(access_point.clone()),
            delay: HostDelay,
            http: ReqwestTransport::new()?,
            platform: HostPlatform::new(options.mac),
        },
        publisher,
        timings,
        BackendDefaults::default(),
    )
    .await;
    info!(
        "simulator: device {} up, control surface on http://{}",
        device.settings().device_id.as_str(),
        control.local_addr()?
    );

    loop {
        // Connections queue in the backlog until the first successful join.
        if device.control_started() {
            if let Some(mut stream) = control.accept()? {
                match serve(&mut stream, &mut device).await {
                    Ok(true) => return Ok(Exit::Restart),
                    Ok(false) => {}
                    Err(e) => warn!("control: {e:#}"),
                }
            }
        }

        let line = match console.try_recv() {
            Ok(ConsoleInput::Line(line)) => Some(line),
            Ok(ConsoleInput::Link(up)) => {
                access_point.set_up(up);
                info!("simulator: access point {}", if up { "up" } else { "down" });
                None
            }
            Ok(ConsoleInput::Status) => {
                println!("{}", serde_json::to_string_pretty(&device.status())?);
                None
            }
            Ok(ConsoleInput::Unknown(command)) => {
                warn!("simulator: unknown command !{command}");
                None
            }
            Ok(ConsoleInput::Quit) | Err(TryRecvError::Disconnected) => return Ok(Exit::Quit),
            Err(TryRecvError::Empty) => None,
        };

        device.poll_cycle(line.as_deref()).await;
        while let Some(event) = events.try_next_message_pure() {
            print_event(&event);
        }
        if device.restart_requested() {
            return Ok(Exit::Restart);
        }

        thread::sleep(Duration::from_millis(timings.loop_idle_ms));
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse();
    let timings = load_timings(options.timings.as_deref())?;
    let control = ControlListener::bind(options.port)?;
    let access_point = AccessPoint::new(true);
    let console = spawn_console();

    loop {
        match block_on(run(&options, timings, &console, &access_point, &control))? {
            Exit::Quit => return Ok(()),
            Exit::Restart => info!("simulator: restarting"),
        }
    }
}
