//! Identifier extraction from file names.
//!
//! An ordered list of patterns is applied to the cleaned file stem, then to
//! the raw stem; the first match wins. User patterns from config come first,
//! followed by the built-ins:
//!
//! 1. FC2 (`FC2-PPV-1234567`, `fc2ppv_1234567`)
//! 2. Fixed hyphen (`ABC-123`)
//! 3. Concatenated (`abc123` becomes `ABC-123`)
//! 4. Bracketed or decorated (`[ABC 123] title`, `【abc_123】`)

use std::sync::LazyLock;

use regex::Regex;

use crate::model::Identifier;

static LEADING_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:\[[^\]]*\]|\([^)]*\)|【[^】]*】)\s*)+").expect("valid regex")
});

static TRAILING_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\s*(?:\[[^\]]*\]|\([^)]*\)|【[^】]*】))+\s*$").expect("valid regex")
});

static QUALITY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:[_\-. ](?:1080p|720p|2160p|fhd|hd|4k))+$").expect("valid regex")
});

/// How a pattern's captures become an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Capture 1 is the FC2 numeric id.
    Fc2,
    /// Capture 1 is the prefix, capture 2 the number.
    PrefixNumber,
    /// Capture 1 (or the whole match) is the code as-is.
    Whole,
}

#[derive(Debug, Clone)]
struct Pattern {
    name: &'static str,
    regex: Regex,
    shape: Shape,
}

impl Pattern {
    fn builtin(name: &'static str, pattern: &str, shape: Shape) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("valid built-in regex"),
            shape,
        }
    }

    fn apply(&self, text: &str) -> Option<Identifier> {
        let caps = self.regex.captures(text)?;
        let raw = match self.shape {
            Shape::Fc2 => format!("FC2-PPV-{}", caps.get(1)?.as_str()),
            Shape::PrefixNumber => {
                format!("{}-{}", caps.get(1)?.as_str(), caps.get(2)?.as_str())
            }
            Shape::Whole => match (caps.get(1), caps.get(2)) {
                (Some(prefix), Some(number)) => {
                    format!("{}-{}", prefix.as_str(), number.as_str())
                }
                (Some(code), None) => code.as_str().to_string(),
                _ => caps.get(0)?.as_str().to_string(),
            },
        };
        Identifier::new(&raw)
    }
}

static BUILTINS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern::builtin(
            "fc2",
            r"(?i)FC2[-_ ]?(?:PPV[-_ ]?)?(\d{5,8})",
            Shape::Fc2,
        ),
        Pattern::builtin(
            "hyphen",
            r"(?:^|[^A-Za-z])([A-Za-z]{2,6})-(\d{2,5})(?:[^0-9]|$)",
            Shape::PrefixNumber,
        ),
        Pattern::builtin(
            "concatenated",
            r"(?:^|[^A-Za-z])([A-Za-z]{2,6})(\d{2,5})(?:[^0-9]|$)",
            Shape::PrefixNumber,
        ),
        Pattern::builtin(
            "bracketed",
            r"[\[\(【]\s*([A-Za-z]{2,6})[-_ ]?(\d{2,5})\s*[\]\)】]",
            Shape::PrefixNumber,
        ),
    ]
});

/// Ordered, pluggable identifier pattern list.
#[derive(Debug, Clone)]
pub struct IdentifierPatterns {
    patterns: Vec<Pattern>,
}

impl Default for IdentifierPatterns {
    fn default() -> Self {
        Self {
            patterns: BUILTINS.clone(),
        }
    }
}

impl IdentifierPatterns {
    /// Built-in patterns preceded by `custom` regexes.
    ///
    /// A custom regex with two capture groups is read as prefix + number; with
    /// one group, that group is the code; with none, the whole match is.
    pub fn with_custom(custom: &[String]) -> Result<Self, regex::Error> {
        let mut patterns = Vec::with_capacity(custom.len() + BUILTINS.len());
        for source in custom {
            patterns.push(Pattern {
                name: "custom",
                regex: Regex::new(source)?,
                shape: Shape::Whole,
            });
        }
        patterns.extend(BUILTINS.iter().cloned());
        Ok(Self { patterns })
    }

    /// Extract an identifier from a file stem, if any pattern matches.
    pub fn extract(&self, stem: &str) -> Option<Identifier> {
        let cleaned = clean_filename(stem);
        for text in [cleaned.as_str(), stem] {
            for pattern in &self.patterns {
                if let Some(id) = pattern.apply(text) {
                    tracing::trace!(
                        target: "scanner",
                        stem,
                        pattern = pattern.name,
                        id = %id,
                        "Matched identifier"
                    );
                    return Some(id);
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Strip decoration from a file stem: bracketed tags at either end, quality
/// suffixes, and `_`/`.` separators.
pub fn clean_filename(stem: &str) -> String {
    let without_leading = LEADING_TAGS.replace(stem, "");
    let without_trailing = TRAILING_TAGS.replace(&without_leading, "");
    let without_quality = QUALITY_SUFFIX.replace(&without_trailing, "");
    let spaced = without_quality.replace(['_', '.'], " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn extract(stem: &str) -> Option<String> {
        IdentifierPatterns::default()
            .extract(stem)
            .map(|id| id.as_str().to_string())
    }

    #[test]
    fn test_hyphenated_code() {
        assert_eq!(extract("SSIS-001").as_deref(), Some("SSIS-001"));
        assert_eq!(extract("ssis-001-C").as_deref(), Some("SSIS-001"));
        assert_eq!(extract("some title ABP-477 extra").as_deref(), Some("ABP-477"));
    }

    #[test]
    fn test_concatenated_code_gets_hyphen() {
        assert_eq!(extract("abc123").as_deref(), Some("ABC-123"));
        assert_eq!(extract("ipx00177").as_deref(), Some("IPX-00177"));
    }

    #[test]
    fn test_bracketed_code() {
        assert_eq!(extract("[ABC-123] some title").as_deref(), Some("ABC-123"));
        assert_eq!(extract("【abc_123】").as_deref(), Some("ABC-123"));
        assert_eq!(extract("(MIDE 555)").as_deref(), Some("MIDE-555"));
    }

    #[test]
    fn test_fc2_codes() {
        assert_eq!(extract("FC2-PPV-1234567").as_deref(), Some("FC2-PPV-1234567"));
        assert_eq!(extract("fc2ppv_1234567").as_deref(), Some("FC2-PPV-1234567"));
        assert_eq!(extract("[HD] fc2-123456").as_deref(), Some("FC2-PPV-123456"));
    }

    #[test]
    fn test_decorated_names() {
        assert_eq!(extract("[FHD] SSIS-001 (uncensored)").as_deref(), Some("SSIS-001"));
        assert_eq!(extract("SSIS-001_1080p").as_deref(), Some("SSIS-001"));
        assert_eq!(extract("ssni888.HD").as_deref(), Some("SSNI-888"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(extract("holiday video"), None);
        assert_eq!(extract("x264"), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn test_custom_pattern_takes_precedence() {
        let patterns =
            IdentifierPatterns::with_custom(&[r"(?i)(heyzo)[-_ ]?(\d{4})".to_string()]).unwrap();
        assert_eq!(patterns.len(), 5);
        assert_eq!(
            patterns.extract("heyzo_1234").map(|id| id.to_string()).as_deref(),
            Some("HEYZO-1234")
        );

        let whole = IdentifierPatterns::with_custom(&[r"T28-\d{3}".to_string()]).unwrap();
        assert_eq!(
            whole.extract("t28-555 scene").map(|id| id.to_string()),
            None,
            "custom regexes are case-sensitive unless they opt in"
        );
        assert_eq!(
            whole.extract("T28-555 scene").map(|id| id.to_string()).as_deref(),
            Some("T28-555")
        );
    }

    #[test]
    fn test_invalid_custom_pattern() {
        assert!(IdentifierPatterns::with_custom(&["([A-Z".to_string()]).is_err());
    }

    #[test]
    fn test_clean_filename() {
        assert_eq!(clean_filename("[Group] ABC-123 [720p]"), "ABC-123");
        assert_eq!(clean_filename("abc_123.part_one"), "abc 123 part one");
        assert_eq!(clean_filename("ABC-123_4K"), "ABC-123");
    }

    proptest! {
        #[test]
        fn prop_hyphen_codes_roundtrip(prefix in "[A-Za-z]{2,6}", number in "[0-9]{2,5}") {
            let stem = format!("{prefix}-{number}");
            let expected = format!("{}-{}", prefix.to_uppercase(), number);
            prop_assert_eq!(extract(&stem), Some(expected));
        }

        #[test]
        fn prop_extract_yields_valid_identifiers(stem in "\\PC{0,40}") {
            if let Some(id) = IdentifierPatterns::default().extract(&stem) {
                prop_assert!(Identifier::new(id.as_str()).is_some());
            }
        }
    }
}
