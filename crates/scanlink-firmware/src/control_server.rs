//! Local control surface listener.
//!
//! Serves one connection at a time. Each request is parsed in full, handed to
//! the device under its mutex and answered before the socket is closed.

use alloc::vec::Vec;

use embassy_net::tcp::TcpSocket;
use embassy_net::{IpListenEndpoint, Stack};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;
use log::{info, warn};

use scanlink_core::config::CONTROL_PORT;
use scanlink_core::http::{MAX_REQUEST_LEN, encode_response, parse_request};

use crate::app_state::GlobalDevice;
use crate::error::FirmwareError;

const SOCKET_BUF_LEN: usize = 2048;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const START_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bytes to send back and whether to restart afterwards.
struct Reply {
    bytes: Vec<u8>,
    restart: bool,
}

impl Reply {
    fn plain(status: u16, message: &str) -> Self {
        Self {
            bytes: encode_response(status, "text/plain", message.as_bytes()),
            restart: false,
        }
    }
}

#[embassy_executor::task]
pub async fn control_server_task(stack: Stack<'static>, device: &'static GlobalDevice) {
    // The surface only comes up after the first successful connection.
    while !device.lock().await.control_started() {
        Timer::after(START_POLL_INTERVAL).await;
    }
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        info!(
            "control: listening on {}:{}",
            config.address.address(),
            CONTROL_PORT
        );
    }

    let mut rx_buffer = [0u8; SOCKET_BUF_LEN];
    let mut tx_buffer = [0u8; SOCKET_BUF_LEN];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);

    loop {
        socket.set_timeout(Some(CONNECTION_TIMEOUT));
        if let Err(e) = socket
            .accept(IpListenEndpoint {
                addr: None,
                port: CONTROL_PORT,
            })
            .await
        {
            warn!("control: accept failed: {:?}", e);
            continue;
        }

        let restart = match serve(&mut socket, device).await {
            Ok(restart) => restart,
            Err(e) => {
                warn!("control: {}", e);
                false
            }
        };

        let _ = socket.flush().await;
        Timer::after(Duration::from_millis(20)).await;
        socket.close();
        Timer::after(Duration::from_millis(20)).await;
        socket.abort();

        if restart {
            info!("control: restarting");
            Timer::after(Duration::from_millis(100)).await;
            esp_hal::system::software_reset();
        }
    }
}

async fn serve(socket: &mut TcpSocket<'_>, device: &GlobalDevice) -> Result<bool, FirmwareError> {
    let reply = read_and_dispatch(socket, device).await?;
    socket
        .write_all(&reply.bytes)
        .await
        .map_err(|_| FirmwareError::Write)?;
    Ok(reply.restart)
}

async fn read_and_dispatch(
    socket: &mut TcpSocket<'_>,
    device: &GlobalDevice,
) -> Result<Reply, FirmwareError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];

    loop {
        let n = socket
            .read(&mut chunk)
            .await
            .map_err(|_| FirmwareError::Read)?;
        if n == 0 {
            return Err(FirmwareError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);

        match parse_request(&buf) {
            Ok(Some(request)) => {
                let response = device
                    .lock()
                    .await
                    .handle_control(request.method, request.path, request.body)
                    .await;
                return Ok(Reply {
                    bytes: response.to_bytes(),
                    restart: response.restart,
                });
            }
            Ok(None) if buf.len() < MAX_REQUEST_LEN => {}
            Ok(None) => return Ok(Reply::plain(413, "request too large")),
            Err(e) => {
                warn!("control: bad request: {}", e);
                return Ok(Reply::plain(400, "bad request"));
            }
        }
    }
}
