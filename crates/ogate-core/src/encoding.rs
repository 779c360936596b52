use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder};

/// Content codings the gateway can produce for buffered responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
}

impl Encoding {
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Encoding::Identity => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Deflate => Some("deflate"),
        }
    }
}

/// Pick the best supported coding from an Accept-Encoding header. Follows
/// q-values with `*` as a wildcard for unlisted codings; ties break toward
/// gzip, then deflate, then identity. An absent or empty header means
/// identity.
pub fn negotiate(accept_encoding: Option<&str>) -> Encoding {
    let Some(raw) = accept_encoding else {
        return Encoding::Identity;
    };
    if raw.trim().is_empty() {
        return Encoding::Identity;
    }

    let mut gzip_q = None;
    let mut deflate_q = None;
    let mut identity_q = None;
    let mut wildcard_q = None;

    for item in raw.split(',') {
        let mut parts = item.split(';');
        let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let mut q = 1.0f32;
        for param in parts {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
                q = value.trim().parse().unwrap_or(0.0);
            }
        }
        match name.as_str() {
            "gzip" => gzip_q = Some(q),
            "deflate" => deflate_q = Some(q),
            "identity" => identity_q = Some(q),
            "*" => wildcard_q = Some(q),
            _ => {}
        }
    }

    let gzip = gzip_q.or(wildcard_q).unwrap_or(0.0);
    let deflate = deflate_q.or(wildcard_q).unwrap_or(0.0);
    // Unlisted identity stays eligible but never outranks a coding the
    // client asked for.
    let identity = identity_q.or(wildcard_q).unwrap_or(0.0);

    let mut best = (Encoding::Identity, identity);
    // Listed in ascending preference so the later entry wins a tie.
    for candidate in [(Encoding::Deflate, deflate), (Encoding::Gzip, gzip)] {
        if candidate.1 > best.1 || (candidate.1 == best.1 && candidate.1 > 0.0) {
            best = candidate;
        }
    }
    if best.1 <= 0.0 {
        return Encoding::Identity;
    }
    best.0
}

/// Compress a buffered body with the negotiated coding. Returns the input
/// untouched for identity or when compression fails.
pub fn compress(encoding: Encoding, body: Bytes) -> (Bytes, Encoding) {
    match encoding {
        Encoding::Identity => (body, Encoding::Identity),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            if encoder.write_all(&body).is_err() {
                return (body, Encoding::Identity);
            }
            match encoder.finish() {
                Ok(out) => (Bytes::from(out), Encoding::Gzip),
                Err(_) => (body, Encoding::Identity),
            }
        }
        Encoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            if encoder.write_all(&body).is_err() {
                return (body, Encoding::Identity);
            }
            match encoder.finish() {
                Ok(out) => (Bytes::from(out), Encoding::Deflate),
                Err(_) => (body, Encoding::Identity),
            }
        }
    }
}
