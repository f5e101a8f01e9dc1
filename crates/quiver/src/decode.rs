//! # Payload decoding
//!
//! Response parsing is a capability implemented per payload shape and
//! dispatched by the caller. [`complete`] composes decoding with freshness
//! parsing to build the delivery envelope.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::cache::freshness::parse_cache_headers;
use crate::error::DecodeError;
use crate::headers;
use crate::request::Request;
use crate::response::{NetworkResponse, Response};

/// Turns a raw terminal response into a typed result.
pub trait ResponseDecoder: Send + Sync {
    type Output;

    fn decode(&self, response: &NetworkResponse) -> Result<Self::Output, DecodeError>;
}

/// Raw payload passthrough.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesDecoder;

impl ResponseDecoder for BytesDecoder {
    type Output = Bytes;

    fn decode(&self, response: &NetworkResponse) -> Result<Bytes, DecodeError> {
        Ok(response.data.clone())
    }
}

/// Text decoding honoring the response charset. UTF-8 and ISO-8859-1 are
/// supported; anything else is a decode failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringDecoder;

impl ResponseDecoder for StringDecoder {
    type Output = String;

    fn decode(&self, response: &NetworkResponse) -> Result<String, DecodeError> {
        let charset = headers::parse_charset(&response.headers);
        if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
            String::from_utf8(response.data.to_vec())
                .map_err(|_| DecodeError::Charset { charset })
        } else if charset.eq_ignore_ascii_case("iso-8859-1")
            || charset.eq_ignore_ascii_case("latin1")
        {
            Ok(response.data.iter().map(|&byte| byte as char).collect())
        } else {
            Err(DecodeError::Charset { charset })
        }
    }
}

/// JSON decoding into any deserializable type.
pub struct JsonDecoder<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseDecoder for JsonDecoder<T> {
    type Output = T;

    fn decode(&self, response: &NetworkResponse) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(&response.data)?)
    }
}

/// Build the delivery envelope for a terminal response: decode the payload
/// and, when the request opts into caching, derive the entry that should
/// refresh the store. Decode failures become a `Decode` error envelope.
pub fn complete<D: ResponseDecoder>(
    request: &Request,
    response: &NetworkResponse,
    decoder: &D,
) -> Response<D::Output> {
    match decoder.decode(response) {
        Ok(result) => {
            let cache_entry = if request.should_cache() {
                parse_cache_headers(response)
            } else {
                None
            };
            Response::success(result, cache_entry)
        }
        Err(error) => Response::error(error.into()),
    }
}
