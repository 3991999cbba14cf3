//! Tags and tag-pattern matching.
//!
//! Tag strings follow `key:segment[/segment...]` or are a bare token
//! (`work/clients`, `lang:rust`, `archived`). Tags explain why a repository
//! is in a set; they never constrain what operations apply to it.

use serde::{Deserialize, Serialize};

/// Where a tag row came from. Each source is replaced wholesale on refresh;
/// user tags never clobber implicit ones and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    /// Explicitly configured by the user
    User,
    /// Derived locally (e.g. `lang:<primary>`)
    Implicit,
    /// From the hosted provider (e.g. `topic:<t>`)
    Github,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::User => "user",
            TagSource::Implicit => "implicit",
            TagSource::Github => "github",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub source: TagSource,
}

impl Tag {
    pub fn new(name: impl Into<String>, source: TagSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    /// The `key` part of a `key:value` tag, if it has one.
    pub fn key(&self) -> Option<&str> {
        self.name.split_once(':').map(|(k, _)| k)
    }

    /// The segments of the value part (`work/clients/acme` → 3 segments).
    pub fn segments(&self) -> Vec<&str> {
        let value = match self.name.split_once(':') {
            Some((_, v)) => v,
            None => self.name.as_str(),
        };
        value.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// Match `name` against `pattern`, where `*` matches any run of characters
/// (including empty). Without a `*` the match is exact.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return name == pattern;
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !name.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            if !name[pos..].ends_with(part) {
                return false;
            }
            pos = name.len();
        } else {
            match name[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_and_segments() {
        let tag = Tag::new("work/clients/acme", TagSource::User);
        assert_eq!(tag.key(), None);
        assert_eq!(tag.segments(), vec!["work", "clients", "acme"]);

        let tag = Tag::new("lang:rust", TagSource::Implicit);
        assert_eq!(tag.key(), Some("lang"));
        assert_eq!(tag.segments(), vec!["rust"]);
    }

    #[test]
    fn test_matches_pattern_exact() {
        assert!(matches_pattern("work/clients", "work/clients"));
        assert!(!matches_pattern("work/clients", "work"));
    }

    #[test]
    fn test_matches_pattern_wildcards() {
        assert!(matches_pattern("work/clients", "work/*"));
        assert!(matches_pattern("lang:rust", "lang:*"));
        assert!(matches_pattern("topic:cli", "*:cli"));
        assert!(matches_pattern("anything", "*"));
        assert!(!matches_pattern("personal/blog", "work/*"));
    }

    #[test]
    fn test_source_strings() {
        assert_eq!(TagSource::User.as_str(), "user");
        assert_eq!(TagSource::Implicit.as_str(), "implicit");
        assert_eq!(TagSource::Github.as_str(), "github");
    }
}
