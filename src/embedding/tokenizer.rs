/// Passage truncation and windowing
use regex::Regex;

/// A passage after truncation, cut into encoder windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedPassage {
    /// Window texts, each encoded as one vector
    pub windows: Vec<String>,
    /// Tokens kept after truncation
    pub kept_tokens: usize,
    /// Whether tokens were dropped
    pub truncated: bool,
}

/// Splits passages into word and punctuation tokens, truncates them to
/// `max_tokens` and groups the remainder into windows of `window_tokens`.
#[derive(Debug, Clone)]
pub struct PassageTokenizer {
    pattern: Regex,
    max_tokens: usize,
    window_tokens: usize,
}

impl PassageTokenizer {
    /// Both limits must be non-zero; callers validate them beforehand.
    pub fn new(max_tokens: usize, window_tokens: usize) -> Self {
        debug_assert!(max_tokens > 0 && window_tokens > 0);
        Self {
            pattern: Regex::new(r"\w+|[^\w\s]").expect("static token pattern"),
            max_tokens,
            window_tokens,
        }
    }

    pub fn tokenize(&self, text: &str) -> TokenizedPassage {
        let tokens: Vec<&str> = self.pattern.find_iter(text).map(|m| m.as_str()).collect();
        let truncated = tokens.len() > self.max_tokens;
        let kept = &tokens[..tokens.len().min(self.max_tokens)];

        let windows = kept
            .chunks(self.window_tokens)
            .map(|chunk| chunk.join(" "))
            .collect();

        TokenizedPassage {
            windows,
            kept_tokens: kept.len(),
            truncated,
        }
    }
}
