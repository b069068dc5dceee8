//! Control surface over a non-blocking `std::net` listener.
//!
//! The main loop polls [`ControlListener::accept`] once per cycle, matching
//! the device's own single-threaded service order.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use anyhow::Context;
use log::debug;
use scanlink_core::http::{MAX_REQUEST_LEN, encode_response, parse_request};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub fn bind(port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("binding control port {port}"))?;
        listener
            .set_nonblocking(true)
            .context("configuring control listener")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// A waiting connection, if any.
    pub fn accept(&self) -> anyhow::Result<Option<TcpStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!("control: connection from {peer}");
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("accepting control connection"),
        }
    }
}

/// Read until a full request is buffered, the peer stops sending or the size
/// cap is reached.
pub fn read_request(stream: &mut impl Read) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).context("reading control request")?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if !matches!(parse_request(&buf), Ok(None)) || buf.len() >= MAX_REQUEST_LEN {
            break;
        }
    }
    Ok(buf)
}

/// Response for a buffer that did not yield a complete request.
pub fn unparsed_reply(buf: &[u8]) -> Vec<u8> {
    if buf.len() >= MAX_REQUEST_LEN {
        encode_response(413, "text/plain", b"request too large")
    } else {
        encode_response(400, "text/plain", b"bad request")
    }
}

pub fn send(stream: &mut impl Write, bytes: &[u8]) -> anyhow::Result<()> {
    stream.write_all(bytes).context("writing control response")?;
    stream.flush()?;
    Ok(())
}
