//! Path pattern compiler
//!
//! Pattern syntax:
//! - `:name` captures one path segment (lazily, so literals may follow)
//! - `*` captures the rest of the path under the key `0`
//! - `\c` is the literal character `c`
//! - everything else is literal
//!
//! A trailing slash on the request path is always tolerated.

use regex::Regex;

use crate::errors::{ODataError, ODataResult};

/// Compiled path matcher
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    keys: Vec<String>,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> ODataResult<Self> {
        let trimmed = match pattern.strip_suffix('/') {
            Some(rest) => rest,
            None => pattern,
        };

        let mut re = String::from("^");
        let mut keys = Vec::new();
        let mut chars = trimmed.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                ':' => {
                    let mut name = String::new();
                    while let Some(&n) = chars.peek() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        re.push(':');
                    } else {
                        re.push_str("([^/]+?)");
                        keys.push(name);
                    }
                }
                '*' => {
                    re.push_str("(.*)");
                    keys.push("0".to_string());
                }
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        re.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
                    }
                }
                other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        re.push_str("/?$");

        let regex = Regex::new(&re).map_err(|e| {
            ODataError::Internal(format!("Invalid route pattern '{}': {}", pattern, e))
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            keys,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match a path, returning raw captures paired with their keys
    pub fn captures<'p>(&self, path: &'p str) -> Option<Vec<(&str, &'p str)>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.keys
                .iter()
                .enumerate()
                .filter_map(|(i, key)| caps.get(i + 1).map(|m| (key.as_str(), m.as_str())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_segment() {
        let p = PathPattern::compile("/odata/:collection").unwrap();
        assert_eq!(p.captures("/odata/Widgets").unwrap(), vec![("collection", "Widgets")]);
        assert_eq!(p.captures("/odata/Widgets/").unwrap(), vec![("collection", "Widgets")]);
        assert!(p.captures("/odata/Widgets/extra").is_none());
        assert!(p.captures("/other/Widgets").is_none());
    }

    #[test]
    fn test_escaped_parens() {
        let p = PathPattern::compile(r"/:collection\(:id\)").unwrap();
        let caps = p.captures("/Widgets('abc')").unwrap();
        assert_eq!(caps, vec![("collection", "Widgets"), ("id", "'abc'")]);
        assert!(p.captures("/Widgets").is_none());
    }

    #[test]
    fn test_dollar_is_literal() {
        let p = PathPattern::compile("/:collection/$count").unwrap();
        assert_eq!(p.captures("/Widgets/$count").unwrap(), vec![("collection", "Widgets")]);
        assert!(p.captures("/Widgets/count").is_none());
    }

    #[test]
    fn test_root_and_wildcard() {
        let root = PathPattern::compile("/").unwrap();
        assert!(root.captures("/").is_some());
        assert!(root.captures("").is_some());
        assert!(root.captures("/x").is_none());

        let any = PathPattern::compile("/*").unwrap();
        assert_eq!(any.captures("/a/b").unwrap(), vec![("0", "a/b")]);
    }
}
