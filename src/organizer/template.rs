//! Naming templates such as `{actress}/{code}/{code}.{ext}`.
//!
//! A template is parsed once at startup; unknown placeholders, absolute
//! paths and `..` components are rejected there, so rendering never fails.
//! Every rendered component is sanitized and truncated to 255 bytes.

use std::fmt;
use std::path::PathBuf;

use crate::error::Error;
use crate::model::MetadataRecord;

/// Value used for any placeholder whose field is missing.
pub const UNKNOWN: &str = "unknown";

/// Longest allowed path component, in bytes.
pub const MAX_COMPONENT_LEN: usize = 255;

/// Placeholders understood by [`Template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Primary contributor
    Actress,
    /// Up to three contributors, then `(+N more)`
    Actresses,
    Code,
    Title,
    Studio,
    Series,
    Year,
    Month,
    Day,
    /// Source file stem
    OriginalName,
    Ext,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::Actress,
        Field::Actresses,
        Field::Code,
        Field::Title,
        Field::Studio,
        Field::Series,
        Field::Year,
        Field::Month,
        Field::Day,
        Field::OriginalName,
        Field::Ext,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Actress => "actress",
            Field::Actresses => "actresses",
            Field::Code => "code",
            Field::Title => "title",
            Field::Studio => "studio",
            Field::Series => "series",
            Field::Year => "year",
            Field::Month => "month",
            Field::Day => "day",
            Field::OriginalName => "original_name",
            Field::Ext => "ext",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    fn value(&self, ctx: &RenderContext<'_>) -> Option<String> {
        let record = ctx.record;
        match self {
            Field::Actress => record.primary_contributor().map(str::to_string),
            Field::Actresses => {
                if record.contributors.is_empty() {
                    return None;
                }
                let mut joined = record
                    .contributors
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                if record.contributors.len() > 3 {
                    joined.push_str(&format!(" (+{} more)", record.contributors.len() - 3));
                }
                Some(joined)
            }
            Field::Code => Some(record.identifier.to_string()),
            Field::Title => Some(record.title.clone()),
            Field::Studio => record.studio.clone(),
            Field::Series => record.series.clone(),
            Field::Year => record.year().map(|y| y.to_string()),
            Field::Month => record
                .release_date
                .map(|d| format!("{:02}", chrono::Datelike::month(&d))),
            Field::Day => record
                .release_date
                .map(|d| format!("{:02}", chrono::Datelike::day(&d))),
            Field::OriginalName => Some(ctx.original_name.to_string()),
            Field::Ext => Some(ctx.ext.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Field(Field),
}

/// Inputs for one rendering.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub record: &'a MetadataRecord,
    /// Source file stem
    pub original_name: &'a str,
    /// Extension without the dot
    pub ext: &'a str,
}

/// A parsed naming template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    components: Vec<Vec<Token>>,
}

impl Template {
    pub fn parse(pattern: &str) -> Result<Self, Error> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(Error::validation("naming_pattern cannot be empty"));
        }
        if pattern.starts_with('/') || pattern.starts_with('\\') || pattern.contains(':') {
            return Err(Error::validation(format!(
                "naming_pattern must be relative: {pattern:?}"
            )));
        }

        let mut components = Vec::new();
        for raw in pattern.split(['/', '\\']) {
            if raw.is_empty() {
                return Err(Error::validation(format!(
                    "naming_pattern has an empty path component: {pattern:?}"
                )));
            }
            if raw == "." || raw == ".." {
                return Err(Error::validation(format!(
                    "naming_pattern cannot contain {raw:?} components"
                )));
            }
            components.push(parse_component(raw)?);
        }

        Ok(Self {
            source: pattern.to_string(),
            components,
        })
    }

    /// Render to a path relative to the target root.
    pub fn render(&self, ctx: &RenderContext<'_>) -> PathBuf {
        self.components
            .iter()
            .map(|tokens| {
                let mut component = String::new();
                for token in tokens {
                    match token {
                        Token::Literal(text) => component.push_str(text),
                        Token::Field(field) => {
                            let value = field.value(ctx).unwrap_or_default();
                            component.push_str(&sanitize_filename(&value));
                        }
                    }
                }
                truncate_component(&sanitize_filename(&component), MAX_COMPONENT_LEN)
            })
            .collect()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_component(raw: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                tokens.push(Token::Literal(rest.to_string()));
                break;
            }
            Some(i) if rest[i..].starts_with('}') => {
                return Err(Error::validation(format!(
                    "unbalanced '}}' in naming_pattern: {raw:?}"
                )));
            }
            Some(i) => {
                if i > 0 {
                    tokens.push(Token::Literal(rest[..i].to_string()));
                }
                let after = &rest[i + 1..];
                let end = after.find('}').ok_or_else(|| {
                    Error::validation(format!("unclosed '{{' in naming_pattern: {raw:?}"))
                })?;
                let name = &after[..end];
                let field = Field::parse(name).ok_or_else(|| {
                    Error::validation(format!("unknown placeholder {{{name}}} in naming_pattern"))
                })?;
                tokens.push(Token::Field(field));
                rest = &after[end + 1..];
            }
        }
    }
    Ok(tokens)
}

/// Check a naming pattern without keeping the parsed form.
pub fn validate(pattern: &str) -> Result<(), Error> {
    Template::parse(pattern).map(|_| ())
}

/// Replace characters invalid on common filesystems, trim dots and spaces.
///
/// Never returns an empty string; empty input becomes [`UNKNOWN`].
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        UNKNOWN.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Truncate to at most `max` bytes on a char boundary, keeping a short extension.
pub fn truncate_component(component: &str, max: usize) -> String {
    if component.len() <= max {
        return component.to_string();
    }
    let (name, ext) = match component.rsplit_once('.') {
        Some((name, ext)) if !name.is_empty() && ext.len() + 1 < max / 2 => (name, Some(ext)),
        _ => (component, None),
    };
    let budget = max - ext.map_or(0, |e| e.len() + 1);
    let mut cut = budget.min(name.len());
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    match ext {
        Some(ext) => format!("{}.{}", &name[..cut], ext),
        None => name[..cut].to_string(),
    }
}
