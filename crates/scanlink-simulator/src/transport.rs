//! Outbound HTTP for the simulator, over a blocking `reqwest` client.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use scanlink_core::http::{HttpTransport, Method, Request, Response, TransportError};

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().no_proxy().build()?,
        })
    }

    fn exchange(&self, request: &Request<'_>) -> Result<Response, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Options => reqwest::Method::OPTIONS,
        };

        let mut builder = self
            .client
            .request(method, request.url)
            .timeout(Duration::from_millis(request.timeout.as_millis()))
            .body(request.body.to_vec());
        for (name, value) in request.headers {
            builder = builder.header(*name, *value);
        }

        let response = builder.send().map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| classify(&e))?.to_vec();
        Ok(Response { status, body })
    }
}

/// Map a client error onto the cases the device distinguishes.
fn classify(e: &reqwest::Error) -> TransportError {
    debug!("http: {e}");
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect
    } else if e.is_builder() {
        TransportError::InvalidUrl
    } else if e.is_body() || e.is_decode() {
        TransportError::MalformedResponse
    } else {
        TransportError::Io
    }
}

impl HttpTransport for ReqwestTransport {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        self.exchange(request)
    }
}
