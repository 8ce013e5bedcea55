//! Rule patterns and method filters.
//!
//! A pattern answers one question: does this url match, and if so, what are
//! the captures. Method filtering happens before the pattern is consulted,
//! so a method mismatch is a plain miss.

use hyper::Method;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Ordered capture strings; `captures[0]` is `$1`.
pub type Captures = Vec<String>;

pub trait Pattern: Send + Sync + fmt::Debug {
    fn test(&self, url: &str) -> Option<Captures>;
}

/// Literal prefix. The single capture is the remainder after the prefix.
#[derive(Debug, Clone)]
pub struct PrefixPattern {
    prefix: String,
}

impl PrefixPattern {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Pattern for PrefixPattern {
    fn test(&self, url: &str) -> Option<Captures> {
        url.strip_prefix(self.prefix.as_str())
            .map(|rest| vec![rest.to_string()])
    }
}

/// Compiled regular expression. Unmatched optional groups capture `""`.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    regex: Regex,
}

impl RegexPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl From<Regex> for RegexPattern {
    fn from(regex: Regex) -> Self {
        Self { regex }
    }
}

impl Pattern for RegexPattern {
    fn test(&self, url: &str) -> Option<Captures> {
        let caps = self.regex.captures(url)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

type PredicateFn = dyn Fn(&str) -> Option<Captures> + Send + Sync;

/// User-supplied predicate, available through the programmatic API only.
#[derive(Clone)]
pub struct PredicatePattern {
    name: String,
    predicate: Arc<PredicateFn>,
}

impl PredicatePattern {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str) -> Option<Captures> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for PredicatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicatePattern")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Pattern for PredicatePattern {
    fn test(&self, url: &str) -> Option<Captures> {
        (self.predicate)(url)
    }
}

/// Allowed methods; empty means every method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodFilter {
    methods: Vec<Method>,
}

impl MethodFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn only(methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
        }
    }

    /// Parse method tokens, case-insensitively. Returns the offending token
    /// on failure.
    pub fn parse<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        let mut methods = Vec::new();
        for token in tokens {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let valid = token.chars().all(|c| c.is_ascii_alphabetic() || c == '-');
            let method = if valid {
                Method::from_bytes(token.to_ascii_uppercase().as_bytes()).ok()
            } else {
                None
            };
            match method {
                Some(method) if !methods.contains(&method) => methods.push(method),
                Some(_) => {}
                None => return Err(token.to_string()),
            }
        }
        Ok(Self { methods })
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchResult {
    pub matched: bool,
    pub captures: Captures,
}

impl MatchResult {
    pub fn miss() -> Self {
        Self::default()
    }
}

/// Test a rule against a request: method first, then pattern.
pub fn test(pattern: &dyn Pattern, methods: &MethodFilter, method: &Method, url: &str) -> MatchResult {
    if !methods.allows(method) {
        return MatchResult::miss();
    }
    match pattern.test(url) {
        Some(captures) => MatchResult {
            matched: true,
            captures,
        },
        None => MatchResult::miss(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_prefix_pattern() {
        let pattern = PrefixPattern::new("/api");
        assert_eq!(pattern.test("/api/users"), Some(vec!["/users".to_string()]));
        assert_eq!(pattern.test("/api"), Some(vec![String::new()]));
        assert_eq!(pattern.test("/other"), None);
    }

    #[test]
    fn test_regex_pattern_captures() {
        let pattern = RegexPattern::new(r"^/files/(\w+)(?:\.(\w+))?$").unwrap();
        assert_eq!(
            pattern.test("/files/readme.md"),
            Some(vec!["readme".to_string(), "md".to_string()])
        );
        assert_eq!(
            pattern.test("/files/readme"),
            Some(vec!["readme".to_string(), String::new()])
        );
        assert_eq!(pattern.test("/nope"), None);
    }

    #[test]
    fn test_regex_pattern_without_groups() {
        let pattern = RegexPattern::new("^/health$").unwrap();
        assert_eq!(pattern.test("/health"), Some(vec![]));
    }

    #[test]
    fn test_predicate_pattern() {
        let pattern = PredicatePattern::new("even-length", |url| {
            (url.len() % 2 == 0).then(|| vec![url.len().to_string()])
        });
        assert_eq!(pattern.test("/ab"), None);
        assert_eq!(pattern.test("/abc"), Some(vec!["4".to_string()]));
        assert!(format!("{pattern:?}").contains("even-length"));
    }

    #[test]
    fn test_method_filter_applies_before_pattern() {
        #[derive(Debug, Default)]
        struct Counting(AtomicUsize);
        impl Pattern for Counting {
            fn test(&self, _url: &str) -> Option<Captures> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Some(vec![])
            }
        }

        let pattern = Counting::default();
        let filter = MethodFilter::only([Method::POST]);

        let result = test(&pattern, &filter, &Method::GET, "/a");
        assert!(!result.matched);
        assert_eq!(pattern.0.load(Ordering::SeqCst), 0);

        let result = test(&pattern, &filter, &Method::POST, "/a");
        assert!(result.matched);
        assert_eq!(pattern.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_method_filter_parse() {
        let filter = MethodFilter::parse(["get", " POST ", "Get"]).unwrap();
        assert_eq!(filter.methods(), &[Method::GET, Method::POST]);
        assert!(filter.allows(&Method::POST));
        assert!(!filter.allows(&Method::DELETE));

        assert!(MethodFilter::any().allows(&Method::PATCH));
        assert_eq!(MethodFilter::parse(["GE T"]), Err("GE T".to_string()));
        assert_eq!(MethodFilter::parse(["G3T"]), Err("G3T".to_string()));
    }
}
