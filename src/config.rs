use crate::language::Language;
use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_DEEPL_API_URL: &str = "https://api-free.deepl.com/v2/translate";

#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_url: String,

    // Translation provider
    pub deepl_api_url: String,
    pub deepl_api_key: Option<String>,
    pub provider_timeout: Duration,

    // Languages
    pub source_language: Language,
    pub target_languages: Vec<Language>,

    // HTTP surface
    pub admin_api_key: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source_language = std::env::var("SOURCE_LANGUAGE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| Language::from_code(&v))
            .transpose()
            .context("SOURCE_LANGUAGE is not a supported language")?
            .unwrap_or_else(Language::canonical);

        let target_languages = Language::parse_list(
            &std::env::var("TARGET_LANGUAGES").unwrap_or_else(|_| "pt,en".to_string()),
        )
        .context("TARGET_LANGUAGES contains an unsupported language")?;

        if target_languages.is_empty() {
            anyhow::bail!("TARGET_LANGUAGES must name at least one language");
        }

        Ok(Self {
            // Storage
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/l10n.db?mode=rwc".to_string()),

            // Translation provider (key is optional here; it can also come from the database)
            deepl_api_url: std::env::var("DEEPL_API_URL")
                .unwrap_or_else(|_| DEFAULT_DEEPL_API_URL.to_string()),
            deepl_api_key: std::env::var("DEEPL_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            provider_timeout: Duration::from_secs(
                std::env::var("PROVIDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),

            // Languages
            source_language,
            target_languages,

            // HTTP surface
            admin_api_key: std::env::var("ADMIN_API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        })
    }
}
