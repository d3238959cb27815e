//! Invalidation selectors

use regex::Regex;
use std::fmt;

use crate::classify::CacheClass;
use crate::error::Result;

/// Which containers `invalidate_by_type` drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    Class(CacheClass),
    All,
}

impl InvalidationScope {
    pub fn classes(&self) -> Vec<CacheClass> {
        match self {
            InvalidationScope::Class(class) => vec![*class],
            InvalidationScope::All => CacheClass::ALL.to_vec(),
        }
    }
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationScope::Class(class) => write!(f, "{}", class),
            InvalidationScope::All => f.write_str("ALL"),
        }
    }
}

impl From<CacheClass> for InvalidationScope {
    fn from(class: CacheClass) -> Self {
        InvalidationScope::Class(class)
    }
}

/// Selects cached URLs by substring or regular expression.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    /// Matches URLs containing the string
    Literal(String),
    /// Matches URLs the expression finds a match in
    Regex(Regex),
}

impl UrlPattern {
    pub fn literal(value: impl Into<String>) -> Self {
        UrlPattern::Literal(value.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(UrlPattern::Regex(Regex::new(pattern)?))
    }

    /// `/name/id`, or `/name` when no id is given.
    pub fn resource(name: &str, id: Option<&str>) -> Self {
        match id {
            Some(id) => UrlPattern::Literal(format!("/{}/{}", name, id)),
            None => UrlPattern::Literal(format!("/{}", name)),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Literal(needle) => url.contains(needle.as_str()),
            UrlPattern::Regex(regex) => regex.is_match(url),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Literal(needle) => f.write_str(needle),
            UrlPattern::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    #[test]
    fn test_literal_and_resource() {
        let pattern = UrlPattern::literal("/api/posts");
        assert!(pattern.matches("https://example.com/api/posts?page=2"));
        assert!(!pattern.matches("/api/users"));

        let post = UrlPattern::resource("posts", Some("42"));
        assert!(post.matches("/api/posts/42"));
        assert!(!post.matches("/api/posts/7"));
        assert!(UrlPattern::resource("posts", None).matches("/api/posts/7"));
    }

    #[test]
    fn test_regex() {
        let pattern = UrlPattern::regex(r"/api/posts/\d+$").unwrap();
        assert!(pattern.matches("/api/posts/42"));
        assert!(!pattern.matches("/api/posts/42/comments"));
        assert_eq!(pattern.to_string(), r"//api/posts/\d+$/");

        assert!(matches!(
            UrlPattern::regex("(unclosed"),
            Err(CacheError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_scope() {
        assert_eq!(InvalidationScope::All.classes().len(), 4);
        assert_eq!(
            InvalidationScope::from(CacheClass::Api).classes(),
            vec![CacheClass::Api]
        );
        assert_eq!(InvalidationScope::All.to_string(), "ALL");
    }
}
