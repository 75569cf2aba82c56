//! Path template compiler and matcher.
//!
//! Templates follow the HTTP rule grammar:
//!
//! ```text
//! Template  = "/" Segments [ Verb ] ;
//! Segments  = Segment { "/" Segment } ;
//! Segment   = "*" | "**" | LITERAL | Variable ;
//! Variable  = "{" FieldPath [ "=" Segments ] "}" ;
//! Verb      = ":" LITERAL ;
//! ```
//!
//! Example: `/v1/{name=shelves/*/books/*}:publish`

use inkwell_core::{ExtractedValue, FieldPath};
use percent_encoding::percent_decode_str;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Route template authoring errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternSyntaxError {
    #[error("empty path template")]
    Empty,

    #[error("path template must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("unbalanced braces in path template: {0}")]
    UnbalancedBraces(String),

    #[error("nested variable in path template: {0}")]
    NestedVariable(String),

    #[error("duplicate capture '{0}' in path template")]
    DuplicateCapture(String),

    #[error("'**' must be the last path segment: {0}")]
    DoubleWildcardNotLast(String),

    #[error("verb without a preceding path segment: {0}")]
    VerbWithoutSegment(String),

    #[error("empty segment in path template: {0}")]
    EmptySegment(String),

    #[error("invalid field path '{0}' in path template")]
    InvalidFieldPath(String),

    #[error("invalid literal '{0}' in path template")]
    InvalidLiteral(String),
}

/// Request path could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path component is not valid UTF-8 after percent-decoding: {0}")]
pub struct PathDecodeError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
    DoubleWildcard,
}

#[derive(Debug, Clone)]
struct Variable {
    path: FieldPath,
    start: usize,
    end: usize,
}

/// Compiled path template
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    segments: Vec<Segment>,
    variables: Vec<Variable>,
    verb: Option<String>,
}

impl PathPattern {
    /// Compile a template string
    pub fn compile(template: &str) -> Result<Self, PatternSyntaxError> {
        if template.is_empty() {
            return Err(PatternSyntaxError::Empty);
        }
        let body = template
            .strip_prefix('/')
            .ok_or_else(|| PatternSyntaxError::MissingLeadingSlash(template.to_string()))?;

        let verb_at = find_verb_separator(template, body)?;
        let (source, verb) = match verb_at {
            Some(i) => (&body[..i], Some(&body[i + 1..])),
            None => (body, None),
        };

        if let Some(verb) = verb {
            if source.is_empty() || source.ends_with('/') {
                return Err(PatternSyntaxError::VerbWithoutSegment(template.to_string()));
            }
            if !is_literal(verb) {
                return Err(PatternSyntaxError::InvalidLiteral(verb.to_string()));
            }
        }

        let mut segments = Vec::new();
        let mut variables = Vec::new();
        let mut names = HashSet::new();

        if !source.is_empty() {
            for token in split_top_level(source) {
                if token.is_empty() {
                    return Err(PatternSyntaxError::EmptySegment(template.to_string()));
                }
                if let Some(inner) = token.strip_prefix('{') {
                    let inner = inner
                        .strip_suffix('}')
                        .ok_or_else(|| PatternSyntaxError::UnbalancedBraces(template.to_string()))?;
                    let (name, sub) = match inner.split_once('=') {
                        Some((name, sub)) => (name, Some(sub)),
                        None => (inner, None),
                    };
                    let path = FieldPath::parse(name)
                        .map_err(|_| PatternSyntaxError::InvalidFieldPath(name.to_string()))?;
                    if !names.insert(path.to_string()) {
                        return Err(PatternSyntaxError::DuplicateCapture(path.to_string()));
                    }

                    let start = segments.len();
                    match sub {
                        None => segments.push(Segment::Wildcard),
                        Some(sub) => {
                            for part in sub.split('/') {
                                segments.push(parse_segment(part, template)?);
                            }
                        }
                    }
                    variables.push(Variable {
                        path,
                        start,
                        end: segments.len(),
                    });
                } else {
                    segments.push(parse_segment(token, template)?);
                }
            }
        }

        let deep = segments
            .iter()
            .filter(|s| **s == Segment::DoubleWildcard)
            .count();
        if deep > 1 || (deep == 1 && segments.last() != Some(&Segment::DoubleWildcard)) {
            return Err(PatternSyntaxError::DoubleWildcardNotLast(template.to_string()));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
            variables,
            verb: verb.map(str::to_string),
        })
    }

    /// Get the template string
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Field paths captured by this template, in declaration order
    pub fn capture_paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.variables.iter().map(|v| &v.path)
    }

    /// Match a request path and extract captured values
    pub fn match_path(&self, path: &RequestPath) -> Option<Vec<ExtractedValue>> {
        let components = match &self.verb {
            Some(verb) => {
                let (components, actual) = path.with_verb.as_ref()?;
                if actual != verb {
                    return None;
                }
                components
            }
            None => &path.components,
        };

        let deep = self.segments.last() == Some(&Segment::DoubleWildcard);
        if deep {
            if components.len() < self.segments.len() - 1 {
                return None;
            }
        } else if components.len() != self.segments.len() {
            return None;
        }

        let mut matched = Vec::with_capacity(self.segments.len());
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if components[i] != *lit {
                        return None;
                    }
                    matched.push(components[i].clone());
                }
                Segment::Wildcard => {
                    if components[i].is_empty() {
                        return None;
                    }
                    matched.push(components[i].clone());
                }
                Segment::DoubleWildcard => matched.push(components[i..].join("/")),
            }
        }

        let values = self
            .variables
            .iter()
            .map(|v| ExtractedValue::from_path(v.path.clone(), matched[v.start..v.end].join("/")))
            .collect();
        Some(values)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Request path split into percent-decoded components
///
/// Splitting happens on the raw path, so an encoded `%2F` stays inside its
/// component. The `:verb` split is computed once up front for templates that
/// declare a verb.
#[derive(Debug, Clone)]
pub struct RequestPath {
    components: Vec<String>,
    with_verb: Option<(Vec<String>, String)>,
}

impl RequestPath {
    pub fn parse(path: &str) -> Result<Self, PathDecodeError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Ok(Self {
                components: Vec::new(),
                with_verb: None,
            });
        }

        let raw: Vec<&str> = trimmed.split('/').collect();
        let components = raw
            .iter()
            .map(|c| decode_component(c))
            .collect::<Result<Vec<_>, _>>()?;

        let with_verb = match raw.last().and_then(|last| last.rfind(':').map(|i| (last, i))) {
            Some((last, idx)) => {
                let mut stripped = components[..components.len() - 1].to_vec();
                stripped.push(decode_component(&last[..idx])?);
                Some((stripped, decode_component(&last[idx + 1..])?))
            }
            None => None,
        };

        Ok(Self {
            components,
            with_verb,
        })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }
}

fn decode_component(raw: &str) -> Result<String, PathDecodeError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|_| PathDecodeError(raw.to_string()))
}

fn find_verb_separator(template: &str, body: &str) -> Result<Option<usize>, PatternSyntaxError> {
    let mut depth = 0usize;
    let mut verb_at = None;
    for (i, c) in body.char_indices() {
        match c {
            '{' => {
                if depth > 0 {
                    return Err(PatternSyntaxError::NestedVariable(template.to_string()));
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err(PatternSyntaxError::UnbalancedBraces(template.to_string()));
                }
                depth -= 1;
            }
            '/' if depth == 0 => verb_at = None,
            ':' if depth == 0 => verb_at = Some(i),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(PatternSyntaxError::UnbalancedBraces(template.to_string()));
    }
    Ok(verb_at)
}

// Splits on '/' outside of braces.
fn split_top_level(source: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in source.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                tokens.push(&source[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    tokens.push(&source[start..]);
    tokens
}

fn parse_segment(part: &str, template: &str) -> Result<Segment, PatternSyntaxError> {
    match part {
        "" => Err(PatternSyntaxError::EmptySegment(template.to_string())),
        "*" => Ok(Segment::Wildcard),
        "**" => Ok(Segment::DoubleWildcard),
        lit if is_literal(lit) => Ok(Segment::Literal(lit.to_string())),
        lit => Err(PatternSyntaxError::InvalidLiteral(lit.to_string())),
    }
}

fn is_literal(s: &str) -> bool {
    !s.is_empty() && !s.contains(['{', '}', '*', ':', '=', '/'])
}
