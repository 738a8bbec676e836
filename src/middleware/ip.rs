use axum::http::HeaderMap;
use std::net::IpAddr;

/// Extract the client IP from proxy headers, falling back to the transport
/// address when provided. `X-Forwarded-For` may carry a chain; the first
/// entry is the original client.
pub fn extract_ip_from_headers(headers: &HeaderMap, fallback: Option<IpAddr>) -> IpAddr {
    if let Some(h) = headers.get("x-forwarded-for").and_then(|hv| hv.to_str().ok()) {
        if let Some(first) = h.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    if let Some(h) = headers.get("x-real-ip").and_then(|hv| hv.to_str().ok()) {
        if let Ok(ip) = h.parse::<IpAddr>() {
            return ip;
        }
    }
    if let Some(ip) = fallback {
        return ip;
    }
    IpAddr::from([127, 0, 0, 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_chain_takes_first() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(extract_ip_from_headers(&headers, None).to_string(), "203.0.113.9");
    }

    #[test]
    fn test_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(extract_ip_from_headers(&headers, None).to_string(), "198.51.100.4");
    }

    #[test]
    fn test_transport_and_loopback_fallbacks() {
        let headers = HeaderMap::new();
        let transport: IpAddr = "192.0.2.7".parse().unwrap();
        assert_eq!(extract_ip_from_headers(&headers, Some(transport)), transport);
        assert_eq!(extract_ip_from_headers(&headers, None).to_string(), "127.0.0.1");
    }
}
