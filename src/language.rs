//! Supported languages.
//!
//! A static registry is the single source of truth for which language codes
//! the pipeline accepts. `Language` values can only be built from entries in
//! that registry, so the rest of the crate never has to re-validate codes.

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Metadata for a supported language.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// ISO 639-1 language code (e.g., "en", "pt")
    pub code: &'static str,

    /// English name of the language
    pub name: &'static str,

    /// Native name of the language
    pub native_name: &'static str,

    /// Target code sent to the translation provider
    pub provider_code: &'static str,

    /// Whether this is the canonical/source language (exactly one is)
    pub is_canonical: bool,
}

static REGISTRY: [LanguageConfig; 4] = [
    LanguageConfig {
        code: "en",
        name: "English",
        native_name: "English",
        provider_code: "EN",
        is_canonical: true,
    },
    LanguageConfig {
        code: "pt",
        name: "Portuguese",
        native_name: "Português",
        provider_code: "PT-PT",
        is_canonical: false,
    },
    LanguageConfig {
        code: "es",
        name: "Spanish",
        native_name: "Español",
        provider_code: "ES",
        is_canonical: false,
    },
    LanguageConfig {
        code: "fr",
        name: "French",
        native_name: "Français",
        provider_code: "FR",
        is_canonical: false,
    },
];

/// All registered languages.
pub fn registry() -> &'static [LanguageConfig] {
    &REGISTRY
}

/// A validated language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Language {
    code: &'static str,
}

impl Language {
    pub const ENGLISH: Language = Language { code: "en" };
    pub const PORTUGUESE: Language = Language { code: "pt" };
    pub const SPANISH: Language = Language { code: "es" };
    pub const FRENCH: Language = Language { code: "fr" };

    /// Create a Language from a language code string.
    ///
    /// Codes are matched case-insensitively ("PT" is accepted as "pt").
    ///
    /// # Returns
    /// * `Ok(Language)` if the code is in the registry
    /// * `Err` if the code is unknown
    pub fn from_code(code: &str) -> Result<Language> {
        let normalized = code.trim().to_ascii_lowercase();
        match REGISTRY.iter().find(|lang| lang.code == normalized) {
            Some(config) => Ok(Language { code: config.code }),
            None => bail!("Unknown language code: '{}'", code),
        }
    }

    /// Parse a comma separated list of codes (e.g. "pt,en"), skipping blanks
    /// and duplicates while keeping the first-seen order.
    pub fn parse_list(codes: &str) -> Result<Vec<Language>> {
        let mut languages = Vec::new();
        for code in codes.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let language = Language::from_code(code)?;
            if !languages.contains(&language) {
                languages.push(language);
            }
        }
        Ok(languages)
    }

    /// The canonical (source) language.
    pub fn canonical() -> Language {
        REGISTRY
            .iter()
            .find(|lang| lang.is_canonical)
            .map(|config| Language { code: config.code })
            .unwrap_or(Language::ENGLISH)
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn config(&self) -> &'static LanguageConfig {
        // Language values are only built from registry entries.
        REGISTRY
            .iter()
            .find(|lang| lang.code == self.code)
            .unwrap_or(&REGISTRY[0])
    }

    pub fn name(&self) -> &'static str {
        self.config().name
    }

    pub fn native_name(&self) -> &'static str {
        self.config().native_name
    }

    /// Target language code expected by the provider API.
    pub fn provider_code(&self) -> &'static str {
        self.config().provider_code
    }

    pub fn is_canonical(&self) -> bool {
        self.config().is_canonical
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Language::from_code(&code).map_err(serde::de::Error::custom)
    }
}
