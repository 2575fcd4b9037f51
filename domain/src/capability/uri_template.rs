//! Resource URI templates.
//!
//! Templates are split on `/` and each segment is one of:
//!
//! | Segment | Matches |
//! |---------|---------|
//! | `jobs` | exactly `jobs` |
//! | `{name}` | one non-empty segment, bound to `name` |
//! | `{path*}` | one or more trailing segments, bound to `path` joined with `/` |
//!
//! A greedy `{param*}` segment must be last. Placeholders always span a
//! whole segment.
//!
//! When several templates match the same URI, the most specific one wins:
//! more literal segments first, then a non-greedy template over a greedy
//! one, then the longer literal text. Callers break remaining ties by
//! registration order.

use crate::core::error::DomainError;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

/// Ordering key for choosing between matching templates (higher wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    literal_segments: usize,
    exact_length: bool,
    literal_len: usize,
}

/// A parsed URI template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self, DomainError> {
        let invalid = |reason: &str| DomainError::InvalidUriTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        if template.is_empty() {
            return Err(invalid("template is empty"));
        }

        let parts: Vec<&str> = template.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut seen = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            let segment = if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}'))
            {
                let (name, greedy) = match inner.strip_suffix('*') {
                    Some(name) => (name, true),
                    None => (inner, false),
                };
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(invalid(&format!("invalid parameter name '{}'", name)));
                }
                if seen.contains(&name) {
                    return Err(invalid(&format!("duplicate parameter '{}'", name)));
                }
                seen.push(name);
                if greedy {
                    if i + 1 != parts.len() {
                        return Err(invalid("greedy parameter must be the last segment"));
                    }
                    Segment::Rest(name.to_string())
                } else {
                    Segment::Param(name.to_string())
                }
            } else if part.contains('{') || part.contains('}') {
                return Err(invalid("placeholders must span a whole segment"));
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parameter names in template order.
    pub fn params(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) | Segment::Rest(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn specificity(&self) -> Specificity {
        let mut literal_segments = 0;
        let mut literal_len = 0;
        let mut exact_length = true;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    literal_segments += 1;
                    literal_len += text.len();
                }
                Segment::Param(_) => {}
                Segment::Rest(_) => exact_length = false,
            }
        }
        Specificity {
            literal_segments,
            exact_length,
            literal_len,
        }
    }

    /// Match a concrete URI, returning the bound parameters.
    ///
    /// Any `?query` or `#fragment` suffix is ignored.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let parts: Vec<&str> = path.split('/').collect();
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(text) => {
                    if parts.get(i) != Some(&text.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i).filter(|v| !v.is_empty())?;
                    params.insert(name.clone(), value.to_string());
                }
                Segment::Rest(name) => {
                    let rest = parts.get(i..).filter(|r| !r.is_empty())?.join("/");
                    if rest.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), rest);
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Pick the most specific matching template.
///
/// `candidates` is in registration order; the earliest wins a full tie.
pub fn best_match<'a, T>(
    candidates: impl IntoIterator<Item = (&'a UriTemplate, T)>,
    uri: &str,
) -> Option<(T, HashMap<String, String>)> {
    let mut best: Option<(Specificity, T, HashMap<String, String>)> = None;
    for (template, item) in candidates {
        let Some(params) = template.match_uri(uri) else {
            continue;
        };
        let score = template.specificity();
        let better = match &best {
            Some((current, _, _)) => score > *current,
            None => true,
        };
        if better {
            best = Some((score, item, params));
        }
    }
    best.map(|(_, item, params)| (item, params))
}
