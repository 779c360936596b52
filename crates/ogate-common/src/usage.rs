use serde::{Deserialize, Serialize};

/// Token-usage breakdown accumulated per request and written to the spend
/// log. All fields default to zero; providers fill what they report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    #[serde(default)]
    pub cached_tokens: i64,
    #[serde(default)]
    pub audio_input_tokens: i64,
    #[serde(default)]
    pub audio_output_tokens: i64,
    #[serde(default)]
    pub reasoning_tokens: i64,
    #[serde(default)]
    pub cache_creation_tokens: i64,
}

impl TokenUsage {
    pub fn from_totals(prompt: i64, completion: i64) -> Self {
        Self {
            prompt_tokens: prompt.max(0),
            completion_tokens: completion.max(0),
            total_tokens: prompt.max(0) + completion.max(0),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold a later snapshot over this one; the latest report wins but a
    /// pre-computed prompt estimate survives a stream that never reported
    /// prompt tokens.
    pub fn merge_latest(&mut self, other: TokenUsage) {
        let prompt_floor = self.prompt_tokens;
        *self = other;
        if self.prompt_tokens == 0 && prompt_floor > 0 {
            self.prompt_tokens = prompt_floor;
            if self.total_tokens < self.prompt_tokens + self.completion_tokens {
                self.total_tokens = self.prompt_tokens + self.completion_tokens;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_prompt_estimate_when_stream_omits_it() {
        let mut usage = TokenUsage {
            prompt_tokens: 25,
            ..Default::default()
        };
        usage.merge_latest(TokenUsage {
            completion_tokens: 50,
            total_tokens: 50,
            ..Default::default()
        });
        assert_eq!(usage.prompt_tokens, 25);
        assert_eq!(usage.completion_tokens, 50);
        assert_eq!(usage.total_tokens, 75);
    }

    #[test]
    fn merge_prefers_reported_prompt_tokens() {
        let mut usage = TokenUsage {
            prompt_tokens: 25,
            ..Default::default()
        };
        usage.merge_latest(TokenUsage::from_totals(100, 50));
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.total_tokens, 150);
    }
}
