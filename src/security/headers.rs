//! Security response headers and client address resolution.
//!
//! # Design Decisions
//! - `X-Forwarded-For` is only honored when the TCP peer is a configured
//!   trusted proxy; otherwise the peer address is the client
//! - Forwarded hops are read right to left; the first hop that is not a
//!   trusted proxy is the client. Anything left of it is client-supplied

use std::net::{IpAddr, SocketAddr};

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Layers adding the standard hardening headers to every response.
pub fn security_header_layers() -> Vec<SetResponseHeaderLayer<HeaderValue>> {
    let headers: [(HeaderName, &'static str); 6] = [
        (header::X_FRAME_OPTIONS, "DENY"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_XSS_PROTECTION, "1; mode=block"),
        (header::CONTENT_SECURITY_POLICY, "default-src 'none'; frame-ancestors 'none'"),
        (header::REFERRER_POLICY, "no-referrer"),
        (
            header::STRICT_TRANSPORT_SECURITY,
            "max-age=31536000; includeSubDomains",
        ),
    ];
    headers
        .into_iter()
        .map(|(name, value)| {
            SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value))
        })
        .collect()
}

/// The address a request should be attributed to.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trusted_proxies: &[IpAddr]) -> IpAddr {
    let peer_ip = peer.ip();
    if !trusted_proxies.contains(&peer_ip) {
        return peer_ip;
    }

    // Later header lines were appended by later proxies.
    let hops = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .rev()
        .flat_map(|value| value.to_str().unwrap_or_default().rsplit(','));

    let mut client = peer_ip;
    for hop in hops {
        let Ok(ip) = hop.trim().parse::<IpAddr>() else {
            break;
        };
        client = ip;
        if !trusted_proxies.contains(&ip) {
            break;
        }
    }
    client
}
