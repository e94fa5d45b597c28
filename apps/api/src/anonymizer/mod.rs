//! PII Anonymizer: deterministic substitution of identified sensitive substrings.
//!
//! The completion service only says *what* is sensitive. Rewriting happens here, by
//! exact substring replacement, so nothing can be invented or dropped on the way.

pub mod registry;

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registry::PlaceholderRegistry;

#[derive(Debug, Error)]
pub enum AnonymizationError {
    #[error("{count} identified value(s) still present after redaction (types: {})", .pii_types.join(", "))]
    ResidualPii { count: usize, pii_types: Vec<String> },
}

impl AnonymizationError {
    pub fn error_type(&self) -> &'static str {
        "ANONYMIZATION_INTEGRITY_ERROR"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PiiType {
    Name,
    Address,
    Organization,
    School,
    JobTitle,
    CertificationNumber,
    LicenseNumber,
    NationalId,
    Other(String),
}

impl From<String> for PiiType {
    fn from(raw: String) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "name" | "person" | "person_name" => PiiType::Name,
            "address" => PiiType::Address,
            "organization" | "organisation" | "company" => PiiType::Organization,
            "school" | "university" => PiiType::School,
            "job_title" => PiiType::JobTitle,
            "certification_number" => PiiType::CertificationNumber,
            "license_number" | "licence_number" => PiiType::LicenseNumber,
            "national_id" => PiiType::NationalId,
            _ => PiiType::Other(normalized),
        }
    }
}

impl From<PiiType> for String {
    fn from(pii_type: PiiType) -> Self {
        pii_type.as_str().to_string()
    }
}

impl PiiType {
    pub fn as_str(&self) -> &str {
        match self {
            PiiType::Name => "name",
            PiiType::Address => "address",
            PiiType::Organization => "organization",
            PiiType::School => "school",
            PiiType::JobTitle => "job_title",
            PiiType::CertificationNumber => "certification_number",
            PiiType::LicenseNumber => "license_number",
            PiiType::NationalId => "national_id",
            PiiType::Other(raw) => raw,
        }
    }
}

fn default_sensitivity() -> u8 {
    2
}

/// One sensitive entity as reported by the PII-identification capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiEntity {
    pub original_value: String,
    pub pii_type: PiiType,
    #[serde(default = "default_sensitivity")]
    pub sensitivity_level: u8,
    #[serde(default, alias = "all_variations")]
    pub variations: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub region_specific: bool,
}

#[cfg(test)]
impl PiiEntity {
    pub fn new(original_value: impl Into<String>, pii_type: PiiType) -> Self {
        Self {
            original_value: original_value.into(),
            pii_type,
            sensitivity_level: default_sensitivity(),
            variations: Vec::new(),
            context: None,
            region_specific: false,
        }
    }

    pub fn with_variations<I, S>(mut self, variations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variations = variations.into_iter().map(Into::into).collect();
        self
    }
}

impl PiiEntity {
    /// The original value followed by its variations, blanks and duplicates removed.
    fn variants(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.variations.len() + 1);
        for v in std::iter::once(&self.original_value).chain(&self.variations) {
            if !v.trim().is_empty() && !out.contains(&v.as_str()) {
                out.push(v);
            }
        }
        out
    }
}

/// How variants are located in the text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    #[default]
    Exact,
    AsciiCaseInsensitive,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchPolicy::Exact),
            "ascii_case_insensitive" | "case_insensitive" => Ok(MatchPolicy::AsciiCaseInsensitive),
            other => Err(format!(
                "unknown match policy '{other}' (expected 'exact' or 'ascii_case_insensitive')"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedactionRecord {
    pub original: String,
    pub placeholder: String,
    pub pii_type: PiiType,
    pub occurrences_replaced: usize,
}

/// Append-only record of what was replaced, one entry per entity.
#[derive(Debug, Clone, Default)]
pub struct RedactionMapping {
    records: Vec<RedactionRecord>,
}

impl RedactionMapping {
    fn push(&mut self, record: RedactionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[RedactionRecord] {
        &self.records
    }

    pub fn total_replacements(&self) -> usize {
        self.records.iter().map(|r| r.occurrences_replaced).sum()
    }

    pub fn placeholder_for(&self, original: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.original == original)
            .map(|r| r.placeholder.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Anonymized {
    pub text: String,
    pub mapping: RedactionMapping,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[A-Z][A-Z0-9_]*\]").expect("static regex"))
}

/// Placeholders for `entities`, in entity order. Deterministic, so a later pass over the
/// same entities sees the same tokens.
fn issue_placeholders(entities: &[PiiEntity]) -> Vec<String> {
    let mut registry = PlaceholderRegistry::new();
    entities
        .iter()
        .map(|e| registry.placeholder_for(&e.pii_type, &e.original_value))
        .collect()
}

/// Spans of `text` holding one of the `issued` placeholders. Any other bracketed token is
/// ordinary text and stays open to substitution.
fn placeholder_spans<'t>(
    text: &'t str,
    issued: &'t [String],
) -> impl Iterator<Item = regex::Match<'t>> + 't {
    placeholder_re()
        .find_iter(text)
        .filter(move |m| issued.iter().any(|p| p == m.as_str()))
}

/// A run of text that is either open for substitution or a placeholder token.
#[derive(Debug)]
enum Segment {
    Open(String),
    Placeholder(String),
}

fn segment(text: &str, issued: &[String]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;
    for m in placeholder_spans(text, issued) {
        if m.start() > last {
            segments.push(Segment::Open(text[last..m.start()].to_string()));
        }
        segments.push(Segment::Placeholder(m.as_str().to_string()));
        last = m.end();
    }
    if last < text.len() {
        segments.push(Segment::Open(text[last..].to_string()));
    }
    segments
}

/// Byte offsets where `needle` occurs in `haystack`.
fn occurrences(haystack: &str, needle: &str, policy: MatchPolicy, overlapping: bool) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    let (hay, pat): (Cow<'_, str>, Cow<'_, str>) = match policy {
        MatchPolicy::Exact => (Cow::Borrowed(haystack), Cow::Borrowed(needle)),
        // ASCII lowering keeps byte offsets aligned with the original text
        MatchPolicy::AsciiCaseInsensitive => (
            Cow::Owned(haystack.to_ascii_lowercase()),
            Cow::Owned(needle.to_ascii_lowercase()),
        ),
    };

    let mut found = Vec::new();
    let mut from = 0;
    while from <= hay.len() {
        let Some(pos) = hay[from..].find(pat.as_ref()) else {
            break;
        };
        let start = from + pos;
        found.push(start);
        from = if overlapping {
            start + hay[start..].chars().next().map_or(1, char::len_utf8)
        } else {
            start + pat.len()
        };
    }
    found
}

/// Replaces every entity (and each of its variations) with its placeholder.
///
/// Placeholders are assigned in entity order, so the first `name` entity becomes the
/// candidate. Substitution runs longest variant first across all entities, and never
/// rewrites inside one of its own placeholder tokens, which makes a second pass a no-op.
/// Bracketed text that merely looks like a placeholder is redacted like any other text.
pub fn anonymize(text: &str, entities: &[PiiEntity], policy: MatchPolicy) -> Anonymized {
    let placeholders = issue_placeholders(entities);

    // (variant, entity index); a variant claimed by an earlier entity stays with it
    let mut substitutions: Vec<(&str, usize)> = Vec::new();
    for (idx, entity) in entities.iter().enumerate() {
        for variant in entity.variants() {
            if !substitutions.iter().any(|(v, _)| *v == variant) {
                substitutions.push((variant, idx));
            }
        }
    }
    substitutions.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

    let mut replaced = vec![0usize; entities.len()];
    let mut segments = segment(text, &placeholders);

    for (variant, idx) in substitutions {
        let placeholder = &placeholders[idx];
        let mut next = Vec::with_capacity(segments.len());
        for seg in segments {
            let open = match seg {
                Segment::Open(s) => s,
                protected => {
                    next.push(protected);
                    continue;
                }
            };
            let hits = occurrences(&open, variant, policy, false);
            replaced[idx] += hits.len();
            if hits.is_empty() {
                next.push(Segment::Open(open));
                continue;
            }
            let mut last = 0;
            for start in hits {
                if start > last {
                    next.push(Segment::Open(open[last..start].to_string()));
                }
                next.push(Segment::Placeholder(placeholder.clone()));
                last = start + variant.len();
            }
            if last < open.len() {
                next.push(Segment::Open(open[last..].to_string()));
            }
        }
        segments = next;
    }

    let mut mapping = RedactionMapping::default();
    for (idx, entity) in entities.iter().enumerate() {
        if mapping.placeholder_for(&entity.original_value).is_some() {
            continue;
        }
        mapping.push(RedactionRecord {
            original: entity.original_value.clone(),
            placeholder: placeholders[idx].clone(),
            pii_type: entity.pii_type.clone(),
            occurrences_replaced: replaced[idx],
        });
    }

    let text = segments
        .into_iter()
        .map(|s| match s {
            Segment::Open(s) | Segment::Placeholder(s) => s,
        })
        .collect();

    Anonymized { text, mapping }
}

/// Fails if any entity's original value is still readable outside a placeholder issued
/// for these entities.
pub fn verify_completeness(
    text: &str,
    entities: &[PiiEntity],
    policy: MatchPolicy,
) -> Result<(), AnonymizationError> {
    let issued = issue_placeholders(entities);
    let protected: Vec<(usize, usize)> = placeholder_spans(text, &issued)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut count = 0;
    let mut pii_types: Vec<String> = Vec::new();
    for entity in entities {
        let value = entity.original_value.as_str();
        if value.trim().is_empty() {
            continue;
        }
        let exposed = occurrences(text, value, policy, true)
            .into_iter()
            .any(|start| {
                let end = start + value.len();
                !protected.iter().any(|&(ps, pe)| start >= ps && end <= pe)
            });
        if exposed {
            count += 1;
            let t = entity.pii_type.as_str().to_string();
            if !pii_types.contains(&t) {
                pii_types.push(t);
            }
        }
    }

    if count == 0 {
        Ok(())
    } else {
        Err(AnonymizationError::ResidualPii { count, pii_types })
    }
}
