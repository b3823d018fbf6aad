//! Correlation ids for outgoing requests.
//!
//! A [`RequestId`] travels with a [`RequestConfig`](crate::request::RequestConfig)
//! and is forwarded to the server as `x-request-id`. It never takes part in
//! cache key derivation, so retries that carry a fresh id still land on the
//! same cache slot.

use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Header used to forward the correlation id to the server.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Opaque per-request identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a new random request ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Attempts to read a request ID from a header value.
    ///
    /// Returns `None` if the header value is not valid UTF-8.
    pub fn from_header(header: &HeaderValue) -> Option<Self> {
        header.to_str().ok().map(|s| Self(s.to_owned()))
    }

    /// Renders the id as a header value, if it is representable.
    pub fn to_header(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_distinct_uuids() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
        assert!(Uuid::parse_str(id1.as_str()).is_ok());
    }

    #[test]
    fn header_round_trip() {
        let id = RequestId::from("retry-7");
        let header = id.to_header().expect("ascii id is a valid header");
        assert_eq!(RequestId::from_header(&header), Some(id));
    }

    #[test]
    fn non_visible_ascii_is_not_a_header() {
        let id = RequestId::from("line\nbreak");
        assert!(id.to_header().is_none());
    }

    #[test]
    fn display_and_string_conversions() {
        let id = RequestId::from("test-id".to_string());
        assert_eq!(format!("{id}"), "test-id");
        let converted: String = id.into();
        assert_eq!(converted, "test-id");
    }
}
