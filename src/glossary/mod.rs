//! Terminology overrides applied on top of machine translation.
//!
//! Terms are matched on word boundaries, case-insensitively, and replaced in
//! a single pass over the original text. Lower priority numbers win: once a
//! span has been claimed by a term, no later term may rewrite any part of it.

pub mod checksum;
pub mod service;
pub mod trie;

pub use service::{GlossaryService, GlossaryStatistics};

use crate::error::GlossaryError;
use crate::language::Language;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version tag of the offline export format.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Domain a glossary term belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TermCategory {
    Equipment,
    Lighting,
    Audio,
    Video,
    Rigging,
    Staging,
    Power,
    Brand,
    #[default]
    General,
}

impl TermCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermCategory::Equipment => "equipment",
            TermCategory::Lighting => "lighting",
            TermCategory::Audio => "audio",
            TermCategory::Video => "video",
            TermCategory::Rigging => "rigging",
            TermCategory::Staging => "staging",
            TermCategory::Power => "power",
            TermCategory::Brand => "brand",
            TermCategory::General => "general",
        }
    }
}

impl fmt::Display for TermCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TermCategory {
    type Err = GlossaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equipment" => Ok(TermCategory::Equipment),
            "lighting" => Ok(TermCategory::Lighting),
            "audio" => Ok(TermCategory::Audio),
            "video" => Ok(TermCategory::Video),
            "rigging" => Ok(TermCategory::Rigging),
            "staging" => Ok(TermCategory::Staging),
            "power" => Ok(TermCategory::Power),
            "brand" => Ok(TermCategory::Brand),
            "general" => Ok(TermCategory::General),
            other => Err(GlossaryError::Validation(format!(
                "unknown term category '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub source_text: String,
    pub translated_text: String,
    pub language: Language,
    /// Lower is applied first
    pub priority: i64,
    pub category: TermCategory,
}

/// Input to [`GlossaryService::upsert_term`].
#[derive(Debug, Clone)]
pub struct TermInput {
    pub source_text: String,
    pub translated_text: String,
    pub language: Language,
    pub priority: i64,
    pub category: TermCategory,
}

impl TermInput {
    pub fn new(source_text: &str, translated_text: &str, language: Language) -> Self {
        Self {
            source_text: source_text.to_string(),
            translated_text: translated_text.to_string(),
            language,
            priority: 100,
            category: TermCategory::General,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: TermCategory) -> Self {
        self.category = category;
        self
    }

    fn validate(&self) -> Result<(), GlossaryError> {
        if self.source_text.trim().is_empty() {
            return Err(GlossaryError::Validation("source text is empty".into()));
        }
        if self.translated_text.trim().is_empty() {
            return Err(GlossaryError::Validation("translated text is empty".into()));
        }
        if self.source_text.chars().count() > 200 {
            return Err(GlossaryError::Validation(
                "source text longer than 200 characters".into(),
            ));
        }
        if self.priority < 0 {
            return Err(GlossaryError::Validation("priority must be >= 0".into()));
        }
        Ok(())
    }
}

/// Checksummed export consumed by offline clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossarySnapshot {
    pub version: u32,
    pub checksum: String,
    pub terms: Vec<GlossaryTerm>,
}

impl GlossarySnapshot {
    pub fn new(terms: Vec<GlossaryTerm>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            version: EXPORT_FORMAT_VERSION,
            checksum: checksum::checksum_json(&terms)?,
            terms,
        })
    }

    /// Recompute the checksum over `terms` and compare.
    pub fn verify(&self) -> bool {
        checksum::checksum_json(&self.terms)
            .map(|c| c == self.checksum)
            .unwrap_or(false)
    }
}

/// A term with its compiled word-boundary matcher.
#[derive(Debug)]
pub(crate) struct CompiledTerm {
    pub term: GlossaryTerm,
    pub pattern: Regex,
}

impl CompiledTerm {
    pub fn compile(term: GlossaryTerm) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&term.source_text)))?;
        Ok(Self { term, pattern })
    }
}

/// Replace every claimed match in `text`. `terms` must already be in
/// precedence order.
pub(crate) fn substitute<'a, I>(text: &str, terms: I) -> String
where
    I: IntoIterator<Item = &'a CompiledTerm>,
{
    let mut claims: Vec<(usize, usize, String)> = Vec::new();

    for compiled in terms {
        for m in compiled.pattern.find_iter(text) {
            let overlaps = claims
                .iter()
                .any(|(start, end, _)| m.start() < *end && *start < m.end());
            if !overlaps {
                claims.push((
                    m.start(),
                    m.end(),
                    preserve_case(m.as_str(), &compiled.term.translated_text),
                ));
            }
        }
    }

    if claims.is_empty() {
        return text.to_string();
    }

    claims.sort_by_key(|(start, _, _)| *start);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, replacement) in claims {
        out.push_str(&text[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Carry the casing of `matched` over to `translation`:
/// all-caps stays all-caps, a leading capital is kept, anything else is verbatim.
pub fn preserve_case(matched: &str, translation: &str) -> String {
    let mut chars = matched.chars();
    let Some(first) = chars.next() else {
        return translation.to_string();
    };

    if chars.next().is_some() && matched == matched.to_uppercase() {
        translation.to_uppercase()
    } else if !first.is_lowercase() {
        capitalize(translation)
    } else {
        translation.to_string()
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
