// src/sanitize.rs
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("captcha text is empty after cleaning")]
    Empty,
    #[error("captcha text '{text}' has {len} characters, need at least {min}")]
    TooShort { text: String, len: usize, min: usize },
}

/// Keep ASCII letters and digits only.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Clean the transcription and reject anything too short to be a captcha answer.
pub fn validate(raw: &str, min_len: usize) -> Result<String, ValidationError> {
    let text = sanitize(raw);
    let len = text.chars().count();
    if len == 0 {
        return Err(ValidationError::Empty);
    }
    if len < min_len {
        return Err(ValidationError::TooShort { text, len, min: min_len });
    }
    Ok(text)
}
