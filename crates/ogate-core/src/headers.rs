use http::{HeaderMap, HeaderName, HeaderValue};
use ogate_common::Headers;

/// RFC 7230 §6.1 hop-by-hop headers, excluded in both directions.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

pub fn strip_hop_by_hop(headers: &mut Headers) {
    headers.retain(|(name, _)| !is_hop_by_hop(name));
}

/// Client headers -> upstream header list, dropping hop-by-hop plus the
/// fields the proxy owns (host, routing auth, body framing, encoding).
pub fn outbound_headers(client: &HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (name, value) in client {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str) {
            continue;
        }
        if matches!(
            name_str,
            "host" | "authorization" | "content-length" | "accept-encoding"
        ) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.push((name_str.to_string(), value.to_string()));
        }
    }
    out
}

/// Upstream header list -> client response headers. Hop-by-hop is always
/// stripped; content-length and content-encoding are dropped too because
/// the buffered path re-frames (and possibly re-compresses) the body and
/// the streaming path has already decompressed upstream bytes.
pub fn inbound_header_map(upstream: &Headers) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream {
        if is_hop_by_hop(name) {
            continue;
        }
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("content-encoding")
        {
            continue;
        }
        let Ok(name) = name.parse::<HeaderName>() else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            continue;
        };
        out.append(name, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped_both_ways() {
        let mut client = HeaderMap::new();
        client.insert("connection", HeaderValue::from_static("keep-alive"));
        client.insert("te", HeaderValue::from_static("trailers"));
        client.insert("x-custom", HeaderValue::from_static("1"));
        let out = outbound_headers(&client);
        assert_eq!(out, vec![("x-custom".to_string(), "1".to_string())]);

        let upstream = vec![
            ("Transfer-Encoding".to_string(), "chunked".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        let map = inbound_header_map(&upstream);
        assert!(map.get("transfer-encoding").is_none());
        assert_eq!(map.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn proxy_owned_fields_do_not_leak_upstream() {
        let mut client = HeaderMap::new();
        client.insert("authorization", HeaderValue::from_static("Bearer sk-user"));
        client.insert("host", HeaderValue::from_static("gateway.local"));
        client.insert("accept-encoding", HeaderValue::from_static("zstd"));
        assert!(outbound_headers(&client).is_empty());
    }

    #[test]
    fn content_framing_headers_are_dropped_inbound() {
        let upstream = vec![
            ("content-length".to_string(), "42".to_string()),
            ("content-encoding".to_string(), "gzip".to_string()),
        ];
        assert!(inbound_header_map(&upstream).is_empty());
    }
}
