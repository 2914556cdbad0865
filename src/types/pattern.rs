use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A name matcher as written in configuration (`"*"`, `"te*"`, `"*st"`,
/// `"exact"`). Anything with a wildcard elsewhere falls back to a full glob.
#[derive(Debug, Clone)]
pub enum NamePattern {
    MatchAll,
    Exact(String),
    PrefixWildcard(String),
    SuffixWildcard(String),
    Glob(glob::Pattern),
}

impl NamePattern {
    pub fn parse(raw: &str) -> Result<Self, glob::PatternError> {
        if raw == "*" {
            return Ok(Self::MatchAll);
        }
        if !has_wildcard(raw) {
            return Ok(Self::Exact(raw.to_string()));
        }
        if let Some(prefix) = raw.strip_suffix('*') {
            if !has_wildcard(prefix) {
                return Ok(Self::PrefixWildcard(prefix.to_string()));
            }
        }
        if let Some(suffix) = raw.strip_prefix('*') {
            if !has_wildcard(suffix) {
                return Ok(Self::SuffixWildcard(suffix.to_string()));
            }
        }
        glob::Pattern::new(raw).map(Self::Glob)
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Exact(exact) => name == exact,
            Self::PrefixWildcard(prefix) => name.starts_with(prefix.as_str()),
            Self::SuffixWildcard(suffix) => name.ends_with(suffix.as_str()),
            Self::Glob(pattern) => pattern.matches(name),
        }
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchAll => f.write_str("*"),
            Self::Exact(exact) => f.write_str(exact),
            Self::PrefixWildcard(prefix) => write!(f, "{prefix}*"),
            Self::SuffixWildcard(suffix) => write!(f, "*{suffix}"),
            Self::Glob(pattern) => f.write_str(pattern.as_str()),
        }
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Serialize for NamePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NamePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NamePattern::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Returns true if any pattern in the list matches `name`.
pub fn matches_any(patterns: &[NamePattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert!(matches!(NamePattern::parse("*").unwrap(), NamePattern::MatchAll));
        assert!(matches!(
            NamePattern::parse("te*").unwrap(),
            NamePattern::PrefixWildcard(p) if p == "te"
        ));
        assert!(matches!(
            NamePattern::parse("*st").unwrap(),
            NamePattern::SuffixWildcard(s) if s == "st"
        ));
        assert!(matches!(
            NamePattern::parse("test").unwrap(),
            NamePattern::Exact(e) if e == "test"
        ));
        assert!(matches!(
            NamePattern::parse("rpms/*-devel").unwrap(),
            NamePattern::Glob(_)
        ));
    }

    #[test]
    fn test_matches() {
        let prefix = NamePattern::parse("te*").unwrap();
        assert!(prefix.matches("test"));
        assert!(!prefix.matches("atest"));

        let suffix = NamePattern::parse("*st").unwrap();
        assert!(suffix.matches("test"));
        assert!(!suffix.matches("tester"));

        let glob = NamePattern::parse("static/*").unwrap();
        assert!(glob.matches("static/foo"));
        assert!(!glob.matches("foo/static"));
    }

    #[test]
    fn test_deserialize_from_list() {
        let patterns: Vec<NamePattern> = serde_json::from_str(r#"["*", "te*"]"#).unwrap();
        assert_eq!(patterns.len(), 2);
        assert!(matches_any(&patterns, "anything"));
    }
}
