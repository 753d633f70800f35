//! Header propagation between the caller and the engines
//!
//! Each inbound header name is looked up once in a static table. Session
//! headers the engine expects exactly once are set from the first inbound
//! value; connection-scoped headers are dropped; everything else (cookies,
//! trace context, client tags) is appended value by value.

use crate::presto::{CATALOG_HEADER, SCHEMA_HEADER, TIME_ZONE_HEADER, USER_HEADER};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPolicy {
    /// Set once from the first inbound value
    Singular,
    /// Every inbound value appended in order
    Multi,
    /// Never forwarded
    Drop,
}

const STATEMENT_HEADER_POLICY: &[(&str, HeaderPolicy)] = &[
    (USER_HEADER, HeaderPolicy::Singular),
    (CATALOG_HEADER, HeaderPolicy::Singular),
    (SCHEMA_HEADER, HeaderPolicy::Singular),
    (TIME_ZONE_HEADER, HeaderPolicy::Singular),
    ("content-type", HeaderPolicy::Singular),
    ("host", HeaderPolicy::Drop),
    ("content-length", HeaderPolicy::Drop),
    // engines must answer in identity encoding so pages can be parsed
    ("accept-encoding", HeaderPolicy::Drop),
];

/// Connection-scoped headers (RFC 9110 section 7.6.1)
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Propagation policy for one header on the statement path
pub fn policy_for(name: &HeaderName) -> HeaderPolicy {
    if is_hop_by_hop(name) {
        return HeaderPolicy::Drop;
    }
    STATEMENT_HEADER_POLICY
        .iter()
        .find(|(key, _)| name.as_str().eq_ignore_ascii_case(key))
        .map(|(_, policy)| *policy)
        .unwrap_or(HeaderPolicy::Multi)
}

/// Build the header set sent to both engines for one statement
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.keys_len());
    for name in inbound.keys() {
        match policy_for(name) {
            HeaderPolicy::Singular => {
                if let Some(value) = inbound.get(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
            HeaderPolicy::Multi => {
                for value in inbound.get_all(name) {
                    out.append(name.clone(), value.clone());
                }
            }
            HeaderPolicy::Drop => {}
        }
    }
    out
}

/// Copy engine response headers to the caller.
///
/// `Content-Length` is skipped; it is recomputed from the identical body.
pub fn copy_response_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if is_hop_by_hop(name) || name == axum::http::header::CONTENT_LENGTH {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Request headers forwarded by the passthrough proxy
pub fn passthrough_request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.keys_len());
    for (name, value) in inbound {
        if is_hop_by_hop(name) || name == axum::http::header::HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Append the caller's address to any `X-Forwarded-For` chain already present
pub fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let mut chain: Vec<String> = headers
        .get_all(FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_owned)
        .collect();
    chain.push(peer.to_string());

    if let Ok(value) = HeaderValue::from_str(&chain.join(", ")) {
        headers.insert(HeaderName::from_static(FORWARDED_FOR), value);
    }
}
