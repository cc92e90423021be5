//! Generation naming: `<kind>-v<versionToken>`

use std::fmt;

use crate::version::VersionToken;

/// The two kinds of generation a version owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Pre-warmed from the manifest at install, never written afterwards
    Static,
    /// Filled lazily by the strategy executor
    Dynamic,
}

impl CacheKind {
    /// Name prefix for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Static => "static",
            CacheKind::Dynamic => "dynamic",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "static" => Some(CacheKind::Static),
            "dynamic" => Some(CacheKind::Dynamic),
            _ => None,
        }
    }
}

/// A parsed generation name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationName {
    kind: CacheKind,
    token: VersionToken,
}

impl GenerationName {
    pub fn new(kind: CacheKind, token: &VersionToken) -> Self {
        Self {
            kind,
            token: token.clone(),
        }
    }

    /// Parses a stored name; returns `None` for names this crate did not create
    pub fn parse(name: &str) -> Option<Self> {
        let (prefix, rest) = name.split_once('-')?;
        let kind = CacheKind::from_prefix(prefix)?;
        let token = VersionToken::parse(rest.strip_prefix('v')?).ok()?;
        Some(Self { kind, token })
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn token(&self) -> &VersionToken {
        &self.token
    }
}

impl fmt::Display for GenerationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-v{}", self.kind.as_str(), self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(raw: &str) -> VersionToken {
        VersionToken::parse(raw).unwrap()
    }

    #[test]
    fn test_display_follows_naming_convention() {
        let name = GenerationName::new(CacheKind::Static, &token("1.0.1-1699999999"));
        assert_eq!(name.to_string(), "static-v1.0.1-1699999999");

        let name = GenerationName::new(CacheKind::Dynamic, &token("2"));
        assert_eq!(name.to_string(), "dynamic-v2");
    }

    #[test]
    fn test_parse_recovers_kind_and_token() {
        let parsed = GenerationName::parse("static-v1.0.1-1699999999").unwrap();
        assert_eq!(parsed.kind(), CacheKind::Static);
        assert_eq!(parsed.token().as_str(), "1.0.1-1699999999");

        let parsed = GenerationName::parse("dynamic-v7").unwrap();
        assert_eq!(parsed.kind(), CacheKind::Dynamic);
        assert_eq!(parsed.token().as_str(), "7");
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        for name in ["static", "static-1", "images-v1", "static-v", "", "-v1"] {
            assert!(GenerationName::parse(name).is_none(), "{name} should not parse");
        }
    }
}
