//! Hop-by-hop header handling for forwarded requests and responses.

use hyper::header::{HeaderName, HOST};
use hyper::HeaderMap;

static HOP_BY_HOP: [HeaderName; 8] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailer"),
    HeaderName::from_static("transfer-encoding"),
    HeaderName::from_static("upgrade"),
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

/// Headers to send upstream: hop-by-hop headers, anything listed in
/// `Connection`, and `Host` are dropped.
pub fn upstream_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = strip_hop_by_hop(headers);
    forwarded.remove(HOST);
    forwarded
}

/// Headers to send back to the client.
pub fn downstream_response_headers(headers: &HeaderMap) -> HeaderMap {
    strip_hop_by_hop(headers)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    let mut kept = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) && !listed.contains(name) {
            kept.append(name.clone(), value.clone());
        }
    }
    kept
}
