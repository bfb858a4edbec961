//! Keyword tokenizer shared by the relevance scorer.

/// Tokens at or below this length are dropped.
pub const MIN_TOKEN_LEN: usize = 3;

/// Turn free text into comparable keyword tokens.
///
/// Lower-cases, strips every character that is not an ASCII word character
/// or whitespace, splits on whitespace runs and keeps tokens longer than
/// [`MIN_TOKEN_LEN`]. Absent input yields no tokens.
#[must_use]
pub fn normalize_text(text: Option<&str>) -> Vec<String> {
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return Vec::new();
    };

    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| word.len() > MIN_TOKEN_LEN)
        .map(str::to_owned)
        .collect()
}
