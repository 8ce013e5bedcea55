use crate::body::{self, DispatchBody};
use crate::errors::Error;
use crate::request_id::RequestId;
use bytes::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::http::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};

pub type DispatchResponse = Response<DispatchBody>;

pub struct ResponseBuilder {
    status: StatusCode,
    body: Option<Bytes>,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new(status_code: StatusCode) -> Self {
        ResponseBuilder {
            status: status_code,
            body: None,
            headers: Default::default(),
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn merge_headers<H, K, V>(mut self, headers: H) -> Self
    where
        H: IntoIterator<Item = (K, V)>,
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        for (key, value) in headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(value))
            {
                self.headers.insert(name, value);
            }
        }
        self
    }

    pub fn build(self) -> DispatchResponse {
        let body = match self.body {
            Some(payload) => body::full(payload),
            None => body::empty(),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
    }
}

/// JSON failure response: `{"code": <id>, "message": "<rendered>"}`.
/// The message never contains the raw request identifier.
pub fn error_response(error: &Error, id: RequestId) -> DispatchResponse {
    let payload = serde_json::json!({
        "code": error.code().id,
        "message": id.redact(&error.to_string()),
    })
    .to_string();
    let length = payload.len().to_string();

    ResponseBuilder::new(error.status())
        .header(CONTENT_TYPE.as_str(), "application/json")
        .header(CONTENT_LENGTH.as_str(), &length)
        .body(payload)
        .build()
}
