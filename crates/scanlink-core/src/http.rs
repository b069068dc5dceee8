//! HTTP capability and the small amount of HTTP/1.1 framing the device needs.
//!
//! Outbound calls go through [`HttpTransport`]. The firmware implements it
//! with a plain TCP client built on [`parse_url`], [`encode_request`] and
//! [`ResponseBuffer`]. The control surface server side uses [`parse_request`]
//! and [`encode_response`].

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use embassy_time::Duration;
use thiserror_no_std::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Options,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Options => "OPTIONS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }
}

/// No HTTP response was obtained.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("could not connect")]
    Connect,
    #[error("name resolution failed")]
    Dns,
    #[error("request timed out")]
    Timeout,
    #[error("i/o error")]
    Io,
    #[error("unsupported url scheme")]
    UnsupportedScheme,
    #[error("invalid url")]
    InvalidUrl,
    #[error("malformed response")]
    MalformedResponse,
}

impl TransportError {
    /// The URL itself is unusable; no network traffic happened.
    pub const fn is_configuration(self) -> bool {
        matches!(
            self,
            TransportError::UnsupportedScheme | TransportError::InvalidUrl
        )
    }
}

pub struct Request<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: &'a [u8],
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP client.
///
/// Any HTTP status, including errors, is `Ok`. `Err` is reserved for calls
/// that produced no response at all.
pub trait HttpTransport {
    fn request(
        &mut self,
        request: &Request<'_>,
    ) -> impl Future<Output = Result<Response, TransportError>>;
}

// ----------------------------------------------------------------------------
// Client framing
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedUrl<'a> {
    pub tls: bool,
    pub host: &'a str,
    pub port: u16,
    /// Path plus query, always starting with `/`.
    pub target: &'a str,
}

pub fn parse_url(url: &str) -> Result<ParsedUrl<'_>, TransportError> {
    let (tls, rest) = if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else {
        return Err(TransportError::UnsupportedScheme);
    };

    let split = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, target) = rest.split_at(split);
    let target = if target.is_empty() { "/" } else { target };
    if target.starts_with('?') {
        return Err(TransportError::InvalidUrl);
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>().map_err(|_| TransportError::InvalidUrl)?,
        ),
        None => (authority, if tls { 443 } else { 80 }),
    };
    if host.is_empty() {
        return Err(TransportError::InvalidUrl);
    }

    Ok(ParsedUrl {
        tls,
        host,
        port,
        target,
    })
}

/// Serialize a request head and body for an HTTP/1.0-style single-shot call.
pub fn encode_request(request: &Request<'_>, url: &ParsedUrl<'_>) -> Vec<u8> {
    let mut head = String::new();
    let _ = write!(
        head,
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Length: {}\r\n",
        request.method.as_str(),
        url.target,
        url.host,
        request.body.len()
    );
    for (name, value) in request.headers {
        let _ = write!(head, "{}: {}\r\n", name, value);
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(request.body);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    /// Offset of the first body byte.
    pub body_start: usize,
    pub content_length: Option<usize>,
}

/// Parse a response head once the blank line has arrived. `Ok(None)` means
/// more bytes are needed.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<ResponseHead>, TransportError> {
    let Some(end) = find_header_end(buf) else {
        return Ok(None);
    };
    let head = core::str::from_utf8(&buf[..end]).map_err(|_| TransportError::MalformedResponse)?;
    let status_line = head.lines().next().ok_or(TransportError::MalformedResponse)?;
    let mut parts = status_line.split_ascii_whitespace();
    let version = parts.next().ok_or(TransportError::MalformedResponse)?;
    if !version.starts_with("HTTP/") {
        return Err(TransportError::MalformedResponse);
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(TransportError::MalformedResponse)?;
    let content_length =
        parse_content_length(head).map_err(|_| TransportError::MalformedResponse)?;

    Ok(Some(ResponseHead {
        status,
        body_start: end + 4,
        content_length,
    }))
}

/// Upper bound on a buffered response. Backends answer with small JSON
/// documents; anything beyond this is cut off.
pub const MAX_RESPONSE_LEN: usize = 16 * 1024;

/// Accumulates response bytes until the head and the announced body are in.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    buf: Vec<u8>,
    head: Option<ResponseHead>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the connection. Returns `true` once no more are
    /// needed; without a `Content-Length` that only happens at the size cap,
    /// so the caller reads until end of stream.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<bool, TransportError> {
        self.buf.extend_from_slice(bytes);
        if self.head.is_none() {
            self.head = parse_response_head(&self.buf)?;
        }
        match self.head {
            Some(_) if self.buf.len() >= MAX_RESPONSE_LEN => Ok(true),
            Some(ResponseHead {
                body_start,
                content_length: Some(len),
                ..
            }) => {
                let end = body_start
                    .checked_add(len)
                    .ok_or(TransportError::MalformedResponse)?;
                Ok(self.buf.len() >= end)
            }
            Some(_) => Ok(false),
            None if self.buf.len() >= MAX_RESPONSE_LEN => Err(TransportError::MalformedResponse),
            None => Ok(false),
        }
    }

    pub fn into_response(self) -> Result<Response, TransportError> {
        let head = self.head.ok_or(TransportError::MalformedResponse)?;
        let mut buf = self.buf;
        let mut body = buf.split_off(head.body_start);
        if let Some(len) = head.content_length {
            body.truncate(len);
        }
        Ok(Response {
            status: head.status,
            body,
        })
    }
}

// ----------------------------------------------------------------------------
// Server framing
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestParseError {
    #[error("bad request line")]
    RequestLine,
    #[error("header is not utf-8")]
    Encoding,
    #[error("invalid content-length")]
    ContentLength,
}

/// Largest control request accepted, head included.
pub const MAX_REQUEST_LEN: usize = 4096;

/// Parse a buffered control request. Returns `Ok(None)` until the head and
/// the full `Content-Length` body are present.
pub fn parse_request(buf: &[u8]) -> Result<Option<IncomingRequest<'_>>, RequestParseError> {
    let Some(end) = find_header_end(buf) else {
        return Ok(None);
    };
    let head = core::str::from_utf8(&buf[..end]).map_err(|_| RequestParseError::Encoding)?;
    let (method, target) = parse_request_line(head).ok_or(RequestParseError::RequestLine)?;
    let length = parse_content_length(head)
        .map_err(|_| RequestParseError::ContentLength)?
        .unwrap_or(0);

    let body_start = end + 4;
    let body_end = body_start
        .checked_add(length)
        .filter(|&body_end| body_end <= MAX_REQUEST_LEN)
        .ok_or(RequestParseError::ContentLength)?;
    let Some(body) = buf.get(body_start..body_end) else {
        return Ok(None);
    };

    Ok(Some(IncomingRequest {
        method,
        path: target_path(target),
        body,
    }))
}

pub const fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Frame a control response. Every response carries open CORS headers.
pub fn encode_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut head = String::new();
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Connection: close\r\n\r\n",
        status,
        reason_phrase(status),
        content_type,
        body.len()
    );
    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_request_line(head: &str) -> Option<(&str, &str)> {
    let first_line = head.lines().next()?;
    let mut parts = first_line.split_ascii_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let _version = parts.next()?;
    Some((method, target))
}

fn parse_content_length(head: &str) -> Result<Option<usize>, ()> {
    let mut content_length = None;

    for line in head.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let parsed = value.trim().parse::<usize>().map_err(|_| ())?;
        if content_length.is_some() {
            return Err(());
        }
        content_length = Some(parsed);
    }

    Ok(content_length)
}

fn target_path(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}
