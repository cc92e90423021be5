//! Version tokens tying a running instance to one build
//!
//! A token is produced by an external version-stamping step (conventionally
//! `MAJOR.MINOR.PATCH-<buildTimestamp>`) and is otherwise opaque. It ends up in
//! every generation name and in every cache-busted URL, so it is restricted to
//! characters that are safe in both places.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when parsing a version token
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// The token was empty
    #[error("Version token must not be empty")]
    Empty,

    /// The token contains a character that cannot appear in names or URLs
    #[error("Invalid character {1:?} in version token '{0}'")]
    InvalidCharacter(String, char),
}

/// Opaque identifier of one deployed build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct VersionToken(String);

impl VersionToken {
    /// Parses and validates a token
    ///
    /// Rejects empty strings, whitespace, path separators and URL delimiters.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '?' | '&' | '#' | '='))
        {
            return Err(VersionError::InvalidCharacter(raw.to_string(), bad));
        }
        Ok(Self(raw.to_string()))
    }

    /// Builds a token in the `MAJOR.MINOR.PATCH-<buildTimestamp>` convention
    pub fn from_build(package_version: &str, built_at: DateTime<Utc>) -> Result<Self, VersionError> {
        Self::parse(&format!("{}-{}", package_version, built_at.timestamp()))
    }

    /// Returns the token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionToken {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionToken {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_accepts_build_stamped_token() {
        let token = VersionToken::parse("1.0.1-1699999999").unwrap();
        assert_eq!(token.as_str(), "1.0.1-1699999999");
        assert_eq!(token.to_string(), "1.0.1-1699999999");
    }

    #[test]
    fn test_parse_accepts_short_tokens() {
        assert!(VersionToken::parse("1").is_ok());
        assert!(VersionToken::parse("v2").is_ok());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(VersionToken::parse(""), Err(VersionError::Empty));
    }

    #[test]
    fn test_parse_rejects_unsafe_characters() {
        for raw in ["1.0 beta", "1/2", "a\\b", "1?x", "1&2", "1#2", "v=1"] {
            assert!(VersionToken::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_from_build_uses_unix_timestamp() {
        let built_at = Utc.timestamp_opt(1_699_999_999, 0).unwrap();
        let token = VersionToken::from_build("1.0.1", built_at).unwrap();
        assert_eq!(token.as_str(), "1.0.1-1699999999");
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: VersionToken = serde_json::from_str("\"2.0.0-1\"").unwrap();
        assert_eq!(ok.as_str(), "2.0.0-1");
        assert!(serde_json::from_str::<VersionToken>("\"has space\"").is_err());
    }
}
