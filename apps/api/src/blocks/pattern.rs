//! Path pattern matching for block visibility.
//!
//! Pattern text holds one pattern per line. `*` matches any run of characters
//! and a line consisting of a lone `/` stands for the site front page. All
//! lines are folded into one anchored alternation, so a path matches when it
//! matches any line in full.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use tracing::{debug, warn};

/// Compiled matchers kept per cache before new ones stop being stored.
const MATCHER_CACHE_LIMIT: usize = 1024;

/// Upper bound on the compiled program size; larger pattern sets fail closed.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled set of path patterns. Cheap to share across requests.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Option<Regex>,
}

impl PathMatcher {
    /// A matcher that rejects every path.
    pub fn never() -> Self {
        Self { regex: None }
    }

    /// Compiles `patterns` with the lone `/` token rewritten to `front_page`.
    ///
    /// Never fails: empty or uncompilable pattern text yields a matcher that
    /// rejects every path.
    pub fn compile(patterns: &str, front_page: &str) -> Self {
        let lines: Vec<&str> = pattern_lines(patterns).collect();
        Self::build(&lines, &regex::escape(front_page))
    }

    /// Compiles `patterns` for locale-prefixed URLs.
    ///
    /// Lines that don't already start with one of `known_locales` are
    /// prefixed with `/<locale>`, and the front-page token becomes the
    /// front page under that prefix.
    pub fn compile_localized(
        patterns: &str,
        front_page: &str,
        locale: &str,
        known_locales: &[String],
    ) -> Self {
        let localized: Vec<String> = pattern_lines(patterns)
            .map(|line| {
                if line == "/" || has_locale_prefix(line, known_locales) {
                    line.to_string()
                } else if line.starts_with('/') {
                    format!("/{locale}{line}")
                } else {
                    format!("/{locale}/{line}")
                }
            })
            .collect();
        let lines: Vec<&str> = localized.iter().map(String::as_str).collect();
        let front = localized_front_page(front_page, locale);
        Self::build(&lines, &regex::escape(&front))
    }

    fn build(lines: &[&str], escaped_front: &str) -> Self {
        if lines.is_empty() {
            return Self::never();
        }

        let alternatives: Vec<String> = lines
            .iter()
            .map(|line| {
                if *line == "/" {
                    escaped_front.to_string()
                } else {
                    line.split('*')
                        .map(regex::escape)
                        .collect::<Vec<_>>()
                        .join(".*")
                }
            })
            .collect();
        let source = format!("^(?:{})$", alternatives.join("|"));

        match regex::RegexBuilder::new(&source)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
        {
            Ok(regex) => Self { regex: Some(regex) },
            Err(e) => {
                warn!("Path patterns failed to compile, treating as no match: {e}");
                Self::never()
            }
        }
    }

    /// Tests the path part of `path`; any query string is ignored.
    pub fn test(&self, path: &str) -> bool {
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        self.regex.as_ref().is_some_and(|r| r.is_match(path))
    }

    /// True when no path can ever match.
    pub fn is_never(&self) -> bool {
        self.regex.is_none()
    }
}

/// Non-blank, trimmed lines split on `\n`, `\r` or `\r\n`.
fn pattern_lines(patterns: &str) -> impl Iterator<Item = &str> {
    patterns
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

fn has_locale_prefix(line: &str, known_locales: &[String]) -> bool {
    let rest = line.strip_prefix('/').unwrap_or(line);
    known_locales.iter().any(|code| {
        rest.strip_prefix(code.as_str())
            .is_some_and(|tail| tail.is_empty() || tail.starts_with('/'))
    })
}

fn localized_front_page(front_page: &str, locale: &str) -> String {
    let front = front_page.trim_end_matches('/');
    if front.is_empty() {
        format!("/{locale}")
    } else if front.starts_with('/') {
        format!("/{locale}{front}")
    } else {
        format!("/{locale}/{front}")
    }
}

/// How pattern text is turned into matchers for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSettings {
    pub front_page: String,
    pub url_locale_prefix: bool,
    pub languages: Vec<String>,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            front_page: "/".to_string(),
            url_locale_prefix: false,
            languages: vec!["en".to_string()],
        }
    }
}

/// Process-local cache of compiled matchers.
///
/// Keyed by pattern text, plus the request locale when locale-prefixed URLs
/// are enabled, since the compiled expression then depends on it.
pub struct MatcherCache {
    settings: PatternSettings,
    compiled: RwLock<HashMap<(String, Option<String>), Arc<PathMatcher>>>,
}

impl MatcherCache {
    pub fn new(settings: PatternSettings) -> Self {
        Self {
            settings,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PatternSettings {
        &self.settings
    }

    /// Returns the compiled matcher for `patterns` as seen from `locale`.
    pub fn matcher_for(&self, patterns: &str, locale: &str) -> Arc<PathMatcher> {
        let key = (
            patterns.to_string(),
            self.settings
                .url_locale_prefix
                .then(|| locale.to_string()),
        );

        if let Ok(compiled) = self.compiled.read() {
            if let Some(matcher) = compiled.get(&key) {
                return Arc::clone(matcher);
            }
        }

        let matcher = Arc::new(if self.settings.url_locale_prefix {
            PathMatcher::compile_localized(
                patterns,
                &self.settings.front_page,
                locale,
                &self.settings.languages,
            )
        } else {
            PathMatcher::compile(patterns, &self.settings.front_page)
        });
        debug!("Compiled path matcher for {} pattern bytes", patterns.len());

        if let Ok(mut compiled) = self.compiled.write() {
            if compiled.len() < MATCHER_CACHE_LIMIT {
                compiled.insert(key, Arc::clone(&matcher));
            }
        }

        matcher
    }

    /// Shorthand for `matcher_for(patterns, locale).test(path)`.
    pub fn matches(&self, patterns: &str, locale: &str, path: &str) -> bool {
        self.matcher_for(patterns, locale).test(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_patterns_never_match() {
        let m = PathMatcher::compile("", "/");
        assert!(!m.test("/"));
        assert!(!m.test(""));
        assert!(!PathMatcher::compile("\n\r\n  \n", "/").test("/"));
        assert!(m.is_never());
        assert!(!PathMatcher::compile("/blog/*", "/").is_never());
    }

    #[test]
    fn test_wildcard_matches_any_suffix() {
        let m = PathMatcher::compile("/admin/*", "/");
        assert!(m.test("/admin/"));
        assert!(m.test("/admin/blocks/edit/3"));
        assert!(!m.test("/admin"));
        assert!(!m.test("/blog/admin/x"));
    }

    #[test]
    fn test_front_page_token_rewritten() {
        let m = PathMatcher::compile("/", "/home");
        assert!(m.test("/home"));
        assert!(!m.test("/"));
        assert!(!m.test("/home/more"));
    }

    #[test]
    fn test_multiple_line_endings() {
        let m = PathMatcher::compile("/a\n/b\r/c\r\n/d", "/");
        for path in ["/a", "/b", "/c", "/d"] {
            assert!(m.test(path), "{path} should match");
        }
        assert!(!m.test("/e"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let m = PathMatcher::compile("/search.php?(x)+", "/");
        assert!(!m.test("/searchXphp"));
        let m = PathMatcher::compile("/a.b", "/");
        assert!(m.test("/a.b"));
        assert!(!m.test("/aXb"));
    }

    #[test]
    fn test_case_sensitive_and_query_ignored() {
        let m = PathMatcher::compile("/Blog/*", "/");
        assert!(!m.test("/blog/1"));
        assert!(m.test("/Blog/1?page=2"));
        let m = PathMatcher::compile("/about", "/");
        assert!(m.test("/about?ref=nav"));
    }

    #[test]
    fn test_oversized_patterns_fail_closed() {
        let huge = "/x*y*z*".repeat(200_000);
        let m = PathMatcher::compile(&huge, "/");
        assert!(!m.test("/xyz"));
    }

    #[test]
    fn test_localized_prefixes_unprefixed_lines() {
        let known = vec!["en".to_string(), "es".to_string()];
        let m = PathMatcher::compile_localized("/blog/*\n/es/contacto", "/", "en", &known);
        assert!(m.test("/en/blog/1"));
        assert!(!m.test("/blog/1"));
        assert!(m.test("/es/contacto"));
        assert!(!m.test("/en/es/contacto"));
    }

    #[test]
    fn test_localized_front_page() {
        let known = vec!["en".to_string()];
        let m = PathMatcher::compile_localized("/", "/", "en", &known);
        assert!(m.test("/en"));
        let m = PathMatcher::compile_localized("/", "/home", "en", &known);
        assert!(m.test("/en/home"));
        assert!(!m.test("/home"));
    }

    #[test]
    fn test_locale_prefix_requires_segment_boundary() {
        let known = vec!["en".to_string()];
        let m = PathMatcher::compile_localized("/english", "/", "en", &known);
        assert!(m.test("/en/english"));
    }

    #[test]
    fn test_cache_keys_by_locale_only_in_prefix_mode() {
        let cache = MatcherCache::new(PatternSettings::default());
        let a = cache.matcher_for("/blog/*", "en");
        let b = cache.matcher_for("/blog/*", "es");
        assert!(Arc::ptr_eq(&a, &b));

        let cache = MatcherCache::new(PatternSettings {
            url_locale_prefix: true,
            languages: vec!["en".into(), "es".into()],
            ..PatternSettings::default()
        });
        let en = cache.matcher_for("/blog/*", "en");
        let es = cache.matcher_for("/blog/*", "es");
        assert!(!Arc::ptr_eq(&en, &es));
        assert!(en.test("/en/blog/1"));
        assert!(es.test("/es/blog/1"));
        assert!(!es.test("/en/blog/1"));
    }
}
