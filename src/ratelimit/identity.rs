//! Client identity resolution
//!
//! Precedence: first hop of `x-forwarded-for`, then `x-real-ip`, then the
//! transport peer address, then the `unknown` sentinel.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Identity used when nothing else is available
pub const UNKNOWN_CLIENT: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Resolve the rate-limit identity of a request
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first_hop) = header_value(headers, FORWARDED_FOR)
        .and_then(|chain| chain.split(',').map(str::trim).find(|hop| !hop.is_empty()))
    {
        return first_hop.to_string();
    }

    if let Some(real_ip) = header_value(headers, REAL_IP).map(str::trim) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.0.0.9:51234".parse().unwrap())
    }

    #[test]
    fn test_forwarded_chain_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        headers.insert(REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_identity(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_before_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_identity(&headers, peer()), "198.51.100.2");
    }

    #[test]
    fn test_empty_forwarded_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" , "));
        assert_eq!(client_identity(&headers, peer()), "10.0.0.9");
    }

    #[test]
    fn test_unknown_sentinel() {
        assert_eq!(client_identity(&HeaderMap::new(), None), UNKNOWN_CLIENT);
    }
}
