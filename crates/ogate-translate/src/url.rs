use crate::{Operation, TransformMode};

/// Join base and client path, de-duplicating a shared version segment:
/// `https://host/v1` + `/v1/chat/completions` must not produce `/v1/v1/...`.
pub fn passthrough_url(base_url: &str, client_path: &str, query: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    let mut path = client_path.trim_start_matches('/');
    if let Some(version) = base.rsplit('/').next()
        && is_version_segment(version)
    {
        let prefix_len = version.len();
        if path.starts_with(version)
            && matches!(path.as_bytes().get(prefix_len), None | Some(b'/'))
        {
            path = path[prefix_len..].trim_start_matches('/');
        }
    }
    match query {
        Some(query) if !query.is_empty() => format!("{base}/{path}?{query}"),
        _ => format!("{base}/{path}"),
    }
}

fn is_version_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars.next() == Some('v') && chars.as_str().chars().all(|c| c.is_ascii_digit())
        && segment.len() > 1
}

/// Vertex model endpoints. The configured base URL carries the project and
/// location prefix (`.../projects/<p>/locations/<l>`).
pub fn vertex_url(base_url: &str, mode: &TransformMode) -> String {
    let base = base_url.trim_end_matches('/');
    let model = &mode.model;
    match mode.op {
        Operation::ImageGen => {
            format!("{base}/publishers/google/models/{model}:predict")
        }
        _ if mode.streaming => {
            format!("{base}/publishers/google/models/{model}:streamGenerateContent?alt=sse")
        }
        _ => format!("{base}/publishers/google/models/{model}:generateContent"),
    }
}

pub fn anthropic_url(base_url: &str) -> String {
    format!("{}/v1/messages", base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_mode(streaming: bool) -> TransformMode {
        TransformMode {
            op: Operation::Chat,
            streaming,
            model: "gemini-2.0-flash".to_string(),
        }
    }

    #[test]
    fn duplicate_version_segment_is_stripped() {
        assert_eq!(
            passthrough_url("https://api.openai.com/v1", "/v1/chat/completions", None),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn different_versions_are_kept() {
        assert_eq!(
            passthrough_url("https://host/v2", "/v1/chat/completions", None),
            "https://host/v2/v1/chat/completions"
        );
    }

    #[test]
    fn version_prefix_match_is_whole_segment() {
        assert_eq!(
            passthrough_url("https://host/v1", "/v1beta/models", None),
            "https://host/v1/v1beta/models"
        );
    }

    #[test]
    fn query_string_is_appended() {
        assert_eq!(
            passthrough_url("https://host", "/v1/models", Some("limit=5")),
            "https://host/v1/models?limit=5"
        );
    }

    #[test]
    fn vertex_urls_select_endpoint_by_mode() {
        let base = "https://us-central1-aiplatform.googleapis.com/v1/projects/p/locations/us-central1";
        assert!(vertex_url(base, &chat_mode(false)).ends_with(":generateContent"));
        assert!(
            vertex_url(base, &chat_mode(true)).ends_with(":streamGenerateContent?alt=sse")
        );
        let image = TransformMode {
            op: Operation::ImageGen,
            streaming: false,
            model: "imagen-3.0".to_string(),
        };
        assert!(vertex_url(base, &image).ends_with("imagen-3.0:predict"));
    }
}
