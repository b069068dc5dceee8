//! Plain-HTTP client on embassy-net.
//!
//! One connection per request, closed by the server after the response.
//! `https` URLs fail with [`TransportError::UnsupportedScheme`].

use alloc::vec;
use core::net::Ipv4Addr;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_time::with_timeout;
use embedded_io_async::Write;
use log::debug;

use scanlink_core::http::{
    HttpTransport, Request, Response, ResponseBuffer, TransportError, encode_request, parse_url,
};

const SOCKET_BUF_LEN: usize = 2048;
const READ_CHUNK_LEN: usize = 512;

pub struct TcpHttpClient {
    stack: Stack<'static>,
}

impl TcpHttpClient {
    pub fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddress, TransportError> {
        if let Ok(address) = host.parse::<Ipv4Addr>() {
            return Ok(IpAddress::Ipv4(address));
        }
        let addresses = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                debug!("http: dns lookup for {} failed: {:?}", host, e);
                TransportError::Dns
            })?;
        addresses.first().copied().ok_or(TransportError::Dns)
    }

    async fn exchange(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        let url = parse_url(request.url)?;
        if url.tls {
            return Err(TransportError::UnsupportedScheme);
        }
        let address = self.resolve(url.host).await?;

        let mut rx_buffer = vec![0u8; SOCKET_BUF_LEN];
        let mut tx_buffer = vec![0u8; SOCKET_BUF_LEN];
        let mut socket = TcpSocket::new(self.stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(request.timeout));

        socket
            .connect((address, url.port))
            .await
            .map_err(|_| TransportError::Connect)?;

        let result = transfer(&mut socket, &encode_request(request, &url)).await;
        socket.close();
        socket.abort();
        result
    }
}

async fn transfer(socket: &mut TcpSocket<'_>, outgoing: &[u8]) -> Result<Response, TransportError> {
    socket
        .write_all(outgoing)
        .await
        .map_err(|_| TransportError::Io)?;
    socket.flush().await.map_err(|_| TransportError::Io)?;

    let mut buffer = ResponseBuffer::new();
    let mut chunk = [0u8; READ_CHUNK_LEN];
    loop {
        let n = socket
            .read(&mut chunk)
            .await
            .map_err(|_| TransportError::Io)?;
        if n == 0 || buffer.extend(&chunk[..n])? {
            break;
        }
    }
    buffer.into_response()
}

impl HttpTransport for TcpHttpClient {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        with_timeout(request.timeout, self.exchange(request))
            .await
            .unwrap_or(Err(TransportError::Timeout))
    }
}
