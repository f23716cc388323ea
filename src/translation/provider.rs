use crate::error::TranslateError;
use crate::language::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One outbound call to the translation provider. Implementations do not
/// retry; the client wraps every call in the retry policy.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        api_key: &str,
        texts: &[String],
        source: Language,
        target: Language,
    ) -> Result<Vec<String>, TranslateError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a [String],
    target_lang: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<TranslationItem>,
}

#[derive(Debug, Deserialize)]
struct TranslationItem {
    text: String,
}

/// DeepL v2 `/translate` over HTTPS.
#[derive(Debug, Clone)]
pub struct DeeplProvider {
    http: reqwest::Client,
    api_url: String,
}

impl DeeplProvider {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }
}

#[async_trait]
impl TranslationProvider for DeeplProvider {
    async fn translate(
        &self,
        api_key: &str,
        texts: &[String],
        source: Language,
        target: Language,
    ) -> Result<Vec<String>, TranslateError> {
        let request = TranslateRequest {
            text: texts,
            target_lang: target.provider_code(),
            // The provider rejects regional variants as source language
            source_lang: Some(source.provider_code().split('-').next().unwrap_or("EN")),
        };

        debug!(
            count = texts.len(),
            target = target.code(),
            "Sending translation request"
        );

        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("DeepL-Auth-Key {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::from_status(status.as_u16(), body));
        }

        let parsed: TranslateResponse = response.json().await?;
        if parsed.translations.len() != texts.len() {
            return Err(TranslateError::Transient {
                status: Some(status.as_u16()),
                message: format!(
                    "expected {} translations, got {}",
                    texts.len(),
                    parsed.translations.len()
                ),
            });
        }

        Ok(parsed.translations.into_iter().map(|t| t.text).collect())
    }
}
