//! Bundled reqwest-based transport.
//!
//! Redirects are surfaced rather than followed here: the engine records the
//! `Location` target and pays for the hop out of the request's retry
//! budget, so automatic redirect handling stays disabled on the client.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use super::{RawResponse, ResponseBody, Transport, TransportError};
use crate::config::TransportConfig;
use crate::request::{Method, Request};

/// [`Transport`] implementation over a shared reqwest client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(config.headers.clone())
            .redirect(reqwest::redirect::Policy::none());

        if !config.connect_timeout.is_zero() {
            builder = builder.connect_timeout(config.connect_timeout);
        }
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|error| TransportError::Io(std::io::Error::other(error)))?;
        Ok(Self { client })
    }

    fn reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Trace => reqwest::Method::TRACE,
            Method::Patch => reqwest::Method::PATCH,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(
        &self,
        request: &Request,
        extra_headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let target = request.url().to_owned();
        let url = Url::parse(&target).map_err(|_| TransportError::MalformedUrl {
            url: target.clone(),
        })?;

        let mut builder = self
            .client
            .request(Self::reqwest_method(request.method()), url)
            .headers(request.headers().clone());

        if let Some(body) = request.body() {
            if let Some(content_type) = request.body_content_type() {
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    builder = builder.header(CONTENT_TYPE, value);
                }
            }
            builder = builder.body(body);
        }

        // Conditional headers win over per-request headers.
        builder = builder.headers(extra_headers.clone());

        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify_send_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let length = response.content_length();
        debug!(url = %target, status = status.as_u16(), "transport attempt complete");

        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        Ok(RawResponse {
            status,
            headers,
            body: Some(ResponseBody::new(reader, length)),
        })
    }
}

fn classify_send_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        if error.is_connect() {
            TransportError::ConnectTimeout
        } else {
            TransportError::Timeout
        }
    } else if error.is_builder() {
        TransportError::MalformedUrl {
            url: error
                .url()
                .map(|url| url.to_string())
                .unwrap_or_default(),
        }
    } else {
        TransportError::Io(std::io::Error::other(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_default_config() {
        assert!(HttpTransport::new().is_ok());
    }

    #[tokio::test]
    async fn malformed_targets_are_rejected_before_any_io() {
        let ids = crate::request::IdentifierSource::new();
        let request = Request::get("not a url at all", &ids);
        let transport = HttpTransport::new().unwrap();

        let result = transport
            .perform(&request, &HeaderMap::new(), Duration::from_secs(1))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::MalformedUrl { url }) if url == "not a url at all"
        ));
    }
}
