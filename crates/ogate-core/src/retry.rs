use std::time::Duration;

use rand::Rng;

/// Primary plus one fallback.
pub const MAX_ATTEMPTS: u32 = 2;

/// Only the head of the body is scanned for veto phrases.
const BODY_SCAN_LIMIT: usize = 8 * 1024;

/// Provider-policy and model-identity errors will fail identically on any
/// credential; retrying them just burns quota.
const BODY_VETO: [&str; 6] = [
    "content policy",
    "content management policy",
    "policy violation",
    "model not found",
    "model does not exist",
    "unsupported model",
];

/// Classify an upstream response. `Some(reason)` means a fallback retry is
/// worth attempting; `None` means the response is terminal.
pub fn should_retry(status: u16, body: &[u8]) -> Option<&'static str> {
    let reason = match status {
        401 | 403 => "auth",
        429 => "rate_limit",
        500..=599 => "server_error",
        _ => return None,
    };
    let scan = &body[..body.len().min(BODY_SCAN_LIMIT)];
    let haystack = String::from_utf8_lossy(scan).to_lowercase();
    if BODY_VETO.iter().any(|veto| haystack.contains(veto)) {
        return None;
    }
    Some(reason)
}

/// Uniform jitter before the fallback request, breaking retry alignment
/// across concurrent requests.
pub async fn fallback_jitter() {
    let delay = rand::rng().random_range(0..50);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_carry_reasons() {
        assert_eq!(should_retry(401, b"{}"), Some("auth"));
        assert_eq!(should_retry(403, b"{}"), Some("auth"));
        assert_eq!(should_retry(429, b"{}"), Some("rate_limit"));
        assert_eq!(should_retry(500, b"{}"), Some("server_error"));
        assert_eq!(should_retry(503, b"{}"), Some("server_error"));
    }

    #[test]
    fn terminal_statuses_do_not_retry() {
        assert_eq!(should_retry(200, b"{}"), None);
        assert_eq!(should_retry(400, b"{}"), None);
        assert_eq!(should_retry(404, b"{}"), None);
    }

    #[test]
    fn body_veto_blocks_retry_case_insensitively() {
        assert_eq!(
            should_retry(429, br#"{"error":"Content Policy violation detected"}"#),
            None
        );
        assert_eq!(
            should_retry(500, br#"{"error":"The Model Does Not Exist"}"#),
            None
        );
        assert_eq!(should_retry(429, br#"{"error":"rate_limit_exceeded"}"#).is_some(), true);
    }

    #[test]
    fn veto_scan_is_bounded_to_the_body_head() {
        let mut body = vec![b'x'; BODY_SCAN_LIMIT];
        body.extend_from_slice(b"content policy");
        // The phrase sits past the scan window, so the retry stands.
        assert!(should_retry(429, &body).is_some());
    }
}
