use crate::base58::ShortCodeBase58;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The path segment that identifies a shortened URL.
///
/// Generated codes are base58; codes read from user input are checked
/// against [`ShortCode::ALLOWED_LENGTH`] and the `[A-Za-z0-9_-]` alphabet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(String);

fn is_code_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_')
}

impl ShortCode {
    pub const ALLOWED_LENGTH: std::ops::RangeInclusive<usize> = 3..=32;

    pub fn generated(code: impl Into<ShortCodeBase58>) -> Self {
        Self(code.into().as_str().to_owned())
    }

    /// Parses untrusted text into a code.
    pub fn new(code: impl Into<String>) -> std::result::Result<Self, CoreError> {
        let code = code.into();

        if !Self::ALLOWED_LENGTH.contains(&code.len()) {
            return Err(CoreError::InvalidShortCode(format!(
                "'{code}' has {} characters, expected {:?}",
                code.len(),
                Self::ALLOWED_LENGTH
            )));
        }
        if let Some(bad) = code.chars().find(|c| !is_code_char(*c)) {
            return Err(CoreError::InvalidShortCode(format!(
                "'{code}' contains {bad:?}"
            )));
        }

        Ok(Self(code))
    }

    /// Wraps a code from a trusted source, such as a generator or a stored row.
    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Joins the code onto `base_url`, dropping trailing slashes of the base.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ShortCodeBase58> for ShortCode {
    fn from(value: ShortCodeBase58) -> Self {
        Self::generated(value)
    }
}
