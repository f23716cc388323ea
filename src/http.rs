//! HTTP surface of the service binary.

use crate::glossary::GlossarySnapshot;
use crate::language::Language;
use crate::pipeline::{EntityType, TranslationState};
use crate::error::PipelineError;
use crate::services::TranslationServices;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const ADMIN_KEY_HEADER: &str = "x-api-key";
pub const MAX_REQUEST_TEXTS: usize = 500;

/// Constant-time string comparison for API keys
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<TranslationServices>,
    pub admin_api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(services: Arc<TranslationServices>, admin_api_key: Option<String>) -> Self {
        Self {
            services,
            admin_api_key: admin_api_key.map(Arc::from),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid API key".to_string()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => {
                error!("Request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownEntityType(_) => ApiError::BadRequest(err.to_string()),
            PipelineError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            PipelineError::Stopped => ApiError::Unavailable(err.to_string()),
            PipelineError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/glossary/export", get(export_glossary))
        .route("/api/translate", post(translate))
        .route("/api/translate/stats", get(translate_stats))
        .route("/api/translate/anomalies", get(translate_anomalies))
        .route("/api/translate/dashboard", get(translate_dashboard))
        .route("/api/translate/cache", get(cache_stats))
        .route("/api/translations/:entity_type/:entity_id", get(translation_state))
        .route(
            "/api/translations/:entity_type/:entity_id/retrigger",
            post(retrigger),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn export_glossary(State(state): State<AppState>) -> ApiResult<GlossarySnapshot> {
    state
        .services
        .glossary
        .export_for_offline_sync()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub texts: Vec<String>,
    pub target_lang: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub target_lang: String,
    pub translations: Vec<String>,
}

async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> ApiResult<TranslateResponse> {
    let language = Language::from_code(&request.target_lang)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if request.texts.len() > MAX_REQUEST_TEXTS {
        return Err(ApiError::BadRequest(format!(
            "at most {} texts per request",
            MAX_REQUEST_TEXTS
        )));
    }

    let translations = state
        .services
        .batcher
        .translate_many(&request.texts, language)
        .await;
    Ok(Json(TranslateResponse {
        target_lang: language.code().to_string(),
        translations,
    }))
}

async fn translate_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let realtime = state
        .services
        .metrics
        .realtime_stats()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "realtime": realtime,
        "client": state.services.client.client_status(),
        "glossary": state.services.glossary.statistics(),
    })))
}

async fn translate_anomalies(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .metrics
        .detect_anomalies()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn translate_dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .metrics
        .dashboard_status()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn cache_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .client
        .cache_stats()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn translation_state(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> ApiResult<TranslationState> {
    let entity_type: EntityType = entity_type.parse()?;
    state
        .services
        .pipeline
        .get_translation_status(entity_type, &entity_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no translation state for {} {}", entity_type, entity_id)))
}

async fn retrigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return Err(ApiError::Unavailable("admin API key not configured".to_string()));
    };
    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !constant_time_compare(provided, expected) {
        return Err(ApiError::Unauthorized);
    }

    let entity_type: EntityType = entity_type.parse()?;
    // The job runs in the background; the receiver is not awaited
    let _ = state
        .services
        .pipeline
        .retrigger(entity_type, &entity_id)
        .await?;
    info!(entity_type = %entity_type, entity_id = %entity_id, "Retrigger accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "queued": true,
            "entity_type": entity_type,
            "entity_id": entity_id,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::db::Database;
    use crate::glossary::TermInput;
    use crate::pipeline::{EntityWrite, TranslationStatus};
    use crate::translation::testing::{EchoProvider, TEST_KEY};
    use std::time::Duration;

    const ADMIN_KEY: &str = "admin-secret";

    // ==================== Helper Functions ====================

    async fn serve(admin_api_key: Option<&str>) -> (String, Arc<TranslationServices>) {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            deepl_api_url: "http://127.0.0.1:9/v2/translate".to_string(),
            deepl_api_key: Some(TEST_KEY.to_string()),
            provider_timeout: Duration::from_secs(5),
            source_language: Language::ENGLISH,
            target_languages: vec![Language::PORTUGUESE],
            admin_api_key: admin_api_key.map(String::from),
            port: 0,
        };
        let services = Arc::new(
            TranslationServices::with_provider(
                &config,
                Database::in_memory().await.unwrap(),
                Arc::new(ManualClock::default()),
                Arc::new(EchoProvider::default()),
            )
            .await
            .unwrap(),
        );

        let router = create_router(AppState::new(services.clone(), config.admin_api_key));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), services)
    }

    // ==================== Security Tests ====================

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("secret123", "secret12"));
        assert!(!constant_time_compare("", "secret"));
    }

    // ==================== Route Tests ====================

    #[tokio::test]
    async fn test_health() {
        let (base, _) = serve(None).await;
        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_translate_endpoint() {
        let (base, _) = serve(None).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/translate", base))
            .json(&serde_json::json!({
                "texts": ["Stage", "Truss", "Stage"],
                "target_lang": "pt"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: TranslateResponse = response.json().await.unwrap();
        assert_eq!(
            body.translations,
            vec!["Stage [pt]", "Truss [pt]", "Stage [pt]"]
        );
    }

    #[tokio::test]
    async fn test_translate_rejects_unknown_language() {
        let (base, _) = serve(None).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/translate", base))
            .json(&serde_json::json!({ "texts": ["Stage"], "target_lang": "xx" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_glossary_export() {
        let (base, services) = serve(None).await;
        services
            .glossary
            .upsert_term(
                TermInput::new("Truss", "Treliça", Language::PORTUGUESE),
                "admin",
                None,
            )
            .await
            .unwrap();

        let snapshot: GlossarySnapshot = reqwest::get(format!("{}/api/glossary/export", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snapshot.terms.len(), 1);
        assert!(snapshot.verify());
    }

    #[tokio::test]
    async fn test_metrics_endpoints() {
        let (base, _) = serve(None).await;
        for route in [
            "/api/translate/stats",
            "/api/translate/anomalies",
            "/api/translate/dashboard",
            "/api/translate/cache",
        ] {
            let response = reqwest::get(format!("{}{}", base, route)).await.unwrap();
            assert_eq!(response.status(), 200, "{}", route);
        }
    }

    #[tokio::test]
    async fn test_translation_state_routes() {
        let (base, services) = serve(Some(ADMIN_KEY)).await;
        let result = services
            .pipeline
            .submit(EntityWrite {
                entity_type: EntityType::Equipment,
                entity_id: "42".into(),
                name: "Hazer".into(),
                description: None,
            })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result.status, TranslationStatus::Complete);

        let body: serde_json::Value = reqwest::get(format!("{}/api/translations/equipment/42", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "complete");
        assert_eq!(body["ready_for_print"], true);

        let missing = reqwest::get(format!("{}/api/translations/equipment/404", base))
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let bad_type = reqwest::get(format!("{}/api/translations/client/1", base))
            .await
            .unwrap();
        assert_eq!(bad_type.status(), 400);
    }

    #[tokio::test]
    async fn test_retrigger_requires_admin_key() {
        let (base, services) = serve(Some(ADMIN_KEY)).await;
        services
            .pipeline
            .submit(EntityWrite {
                entity_type: EntityType::Category,
                entity_id: "7".into(),
                name: "Audio".into(),
                description: None,
            })
            .unwrap()
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let url = format!("{}/api/translations/category/7/retrigger", base);

        let denied = client.post(&url).send().await.unwrap();
        assert_eq!(denied.status(), 401);

        let wrong = client
            .post(&url)
            .header(ADMIN_KEY_HEADER, "admin-secreT")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 401);

        let accepted = client
            .post(&url)
            .header(ADMIN_KEY_HEADER, ADMIN_KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), 202);
    }

    #[tokio::test]
    async fn test_retrigger_disabled_without_admin_key() {
        let (base, _) = serve(None).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/translations/category/7/retrigger", base))
            .header(ADMIN_KEY_HEADER, "anything")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }
}
