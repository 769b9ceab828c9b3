use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::warn;

use crate::db::services::settings_service;
use crate::services::ai_service::{
    self, AiConfig, BATCH_PACING, CLASSIFY_PROMPT, CLASSIFY_SYSTEM_PROMPT, DEFAULT_AUTH_HEADER,
    DEFAULT_AUTH_PREFIX, DEFAULT_BASE_URL, DEFAULT_MODEL, DESCRIPTION_SYSTEM_PROMPT,
};
use crate::web::{AppState, error::AppError};

// --- Request models ---

#[derive(Debug, Deserialize)]
struct GenerateDescriptionRequest {
    name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AiBookmark {
    id: i32,
    name: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AiCategoryOption {
    id: i32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuggestCategoryRequest {
    name: Option<String>,
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    categories: Option<Vec<AiCategoryOption>>,
}

#[derive(Debug, Deserialize)]
struct BatchGenerateRequest {
    bookmarks: Option<Vec<AiBookmark>>,
}

#[derive(Debug, Deserialize)]
struct BatchClassifyRequest {
    bookmarks: Option<Vec<AiBookmark>>,
    categories: Option<Vec<AiCategoryOption>>,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    #[serde(rename = "baseUrl")]
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AiSettingsRequest {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    #[serde(rename = "baseUrl")]
    base_url: Option<String>,
    model: Option<String>,
    #[serde(rename = "authHeader")]
    auth_header: Option<String>,
    #[serde(rename = "authPrefix")]
    auth_prefix: Option<String>,
    #[serde(rename = "customPromptDescription")]
    custom_prompt_description: Option<String>,
    #[serde(rename = "customPromptDescriptionEnabled")]
    custom_prompt_description_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ProxyRequest {
    path: Option<String>,
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
    #[serde(default)]
    query: Option<serde_json::Value>,
}

// --- Helpers ---

fn category_lines(categories: &[AiCategoryOption]) -> String {
    categories
        .iter()
        .map(|cat| {
            let label = cat
                .path
                .clone()
                .or_else(|| cat.name.clone())
                .unwrap_or_default();
            format!("{}: {label}", cat.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn generate_one(
    config: &AiConfig,
    template: &str,
    name: &str,
    url: &str,
) -> Result<String, AppError> {
    let mut vars = HashMap::new();
    vars.insert("name", name.to_string());
    vars.insert("url", url.to_string());
    let prompt = ai_service::fill_template(template, &vars);

    let description =
        ai_service::chat_completion(config, DESCRIPTION_SYSTEM_PROMPT, &prompt, 0.5, 150).await?;
    if description.is_empty() {
        return Err(AppError::UpstreamError(
            "no description generated".to_string(),
        ));
    }
    Ok(description)
}

async fn classify_one(
    config: &AiConfig,
    name: &str,
    url: &str,
    description: Option<&str>,
    category_list: &str,
) -> Result<(i64, String), AppError> {
    let mut vars = HashMap::new();
    vars.insert("name", name.to_string());
    vars.insert("url", url.to_string());
    vars.insert(
        "description",
        description
            .filter(|d| !d.is_empty())
            .unwrap_or("N/A")
            .to_string(),
    );
    vars.insert("categories", category_list.to_string());
    let prompt = ai_service::fill_template(CLASSIFY_PROMPT, &vars);

    let reply =
        ai_service::chat_completion(config, CLASSIFY_SYSTEM_PROMPT, &prompt, 0.3, 180).await?;
    let parsed = ai_service::extract_json(&reply).ok_or_else(|| {
        AppError::UpstreamError("AI could not determine a category".to_string())
    })?;

    let category_id = match &parsed["categoryId"] {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AppError::InvalidInput("AI returned an invalid category ID".to_string()))?;
    let reason = parsed["reason"].as_str().unwrap_or_default().to_string();
    Ok((category_id, reason))
}

// --- Handlers ---

/// Public: whether AI features are usable, and where the key comes
/// from. Never exposes the key itself.
async fn status_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let config = ai_service::resolve_config(&app_state.db).await?;
    let env_key = std::env::var("OPENAI_API_KEY").is_ok();
    let db_key = if env_key {
        false
    } else {
        settings_service::get_setting(&app_state.db, "secret_openai_api_key")
            .await?
            .filter(|value| !value.is_empty())
            .is_some()
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "enabled": !config.api_key.is_empty(),
        "source": if env_key { "env" } else if db_key { "db" } else { "none" },
        "baseUrl": config.base_url,
        "model": config.model,
    })))
}

async fn get_ai_settings_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let settings = settings_service::get_settings_map(
        &app_state.db,
        &[
            "secret_openai_api_key",
            "ai_base_url",
            "ai_model",
            "ai_auth_header",
            "ai_auth_prefix",
            "ai_custom_prompt_description",
            "ai_custom_prompt_description_enabled",
        ],
    )
    .await?;
    let locks = ai_service::env_locks();
    let config = ai_service::resolve_config(&app_state.db).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        // The key is write-only through this API.
        "apiKey": "",
        "hasApiKey": !config.api_key.is_empty(),
        "baseUrl": config.base_url,
        "model": config.model,
        "authHeader": config.auth_header,
        "authPrefix": config.auth_prefix,
        "lockedFields": locks,
        "customPromptDescription": settings
            .get("ai_custom_prompt_description")
            .cloned()
            .unwrap_or_default(),
        "customPromptDescriptionEnabled": settings
            .get("ai_custom_prompt_description_enabled")
            .map(|v| v == "true")
            .unwrap_or(false),
    })))
}

/// A field pinned by the environment is ignored; an empty value clears
/// the stored setting.
async fn apply_ai_setting(
    db: &sea_orm::DatabaseConnection,
    key: &str,
    value: Option<String>,
    locked: bool,
) -> Result<(), AppError> {
    let Some(value) = value else { return Ok(()) };
    if locked {
        return Ok(());
    }
    if value.is_empty() {
        settings_service::delete_setting(db, key).await?;
    } else {
        settings_service::upsert_setting(db, key, &value).await?;
    }
    Ok(())
}

async fn update_ai_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<AiSettingsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = &app_state.db;
    let locks = ai_service::env_locks();

    apply_ai_setting(db, "secret_openai_api_key", payload.api_key, locks.api_key).await?;
    apply_ai_setting(db, "ai_base_url", payload.base_url, locks.base_url).await?;
    apply_ai_setting(db, "ai_model", payload.model, locks.model).await?;
    apply_ai_setting(db, "ai_auth_header", payload.auth_header, locks.auth_header).await?;

    // The prefix may legitimately be stored as an empty string.
    if let Some(prefix) = payload.auth_prefix {
        if !locks.auth_prefix {
            settings_service::upsert_setting(db, "ai_auth_prefix", &prefix).await?;
        }
    }

    if let Some(prompt) = payload.custom_prompt_description {
        if prompt.trim().is_empty() {
            settings_service::delete_setting(db, "ai_custom_prompt_description").await?;
        } else {
            settings_service::upsert_setting(db, "ai_custom_prompt_description", &prompt).await?;
        }
    }
    if let Some(enabled) = payload.custom_prompt_description_enabled {
        settings_service::upsert_setting(
            db,
            "ai_custom_prompt_description_enabled",
            if enabled { "true" } else { "false" },
        )
        .await?;
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Probes `GET {base}/models` with a candidate key. The endpoint itself
/// answers 200 either way; validity travels in the body.
async fn verify_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let api_key = payload
        .api_key
        .filter(|key| !key.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing API key".to_string()))?;

    let stored = settings_service::get_settings_map(
        &app_state.db,
        &["ai_auth_header", "ai_auth_prefix"],
    )
    .await?;
    let config = AiConfig {
        api_key,
        base_url: payload
            .base_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        model: payload
            .model
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        auth_header: stored
            .get("ai_auth_header")
            .cloned()
            .unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string()),
        auth_prefix: stored
            .get("ai_auth_prefix")
            .cloned()
            .unwrap_or_else(|| DEFAULT_AUTH_PREFIX.to_string()),
    };

    let outcome = ai_service::call_upstream(
        &config,
        reqwest::Method::GET,
        "models",
        reqwest::header::HeaderMap::new(),
        None,
    )
    .await;

    let (valid, message) = match outcome {
        Ok(response) if response.status().is_success() => (true, "API key is valid".to_string()),
        Ok(response)
            if response.status() == reqwest::StatusCode::UNAUTHORIZED
                || response.status() == reqwest::StatusCode::FORBIDDEN =>
        {
            (false, "API key is invalid or unauthorized".to_string())
        }
        Ok(response) => {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            let message = ai_service::extract_json(&detail)
                .and_then(|value| {
                    value["error"]["message"]
                        .as_str()
                        .or(value["error"].as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("API request failed with status {status}"));
            (false, message)
        }
        Err(err) => (false, err.to_string()),
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "valid": valid,
        "message": message,
    })))
}

async fn generate_description_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<GenerateDescriptionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (Some(name), Some(url)) = (payload.name, payload.url) else {
        return Err(AppError::InvalidInput("Missing name or url".to_string()));
    };

    let config = ai_service::resolve_config(&app_state.db).await?;
    let template = ai_service::description_template(&app_state.db).await?;
    let description = generate_one(&config, &template, &name, &url).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "description": description,
    })))
}

async fn batch_generate_descriptions_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<BatchGenerateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bookmarks = payload
        .bookmarks
        .filter(|list| !list.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing bookmarks array".to_string()))?;

    let config = ai_service::resolve_config(&app_state.db).await?;
    let template = ai_service::description_template(&app_state.db).await?;

    let mut results = Vec::with_capacity(bookmarks.len());
    let mut success_count = 0usize;
    let mut failed_count = 0usize;
    for bookmark in &bookmarks {
        match generate_one(&config, &template, &bookmark.name, &bookmark.url).await {
            Ok(description) => {
                success_count += 1;
                results.push(serde_json::json!({
                    "id": bookmark.id,
                    "success": true,
                    "description": description,
                }));
            }
            Err(err) => {
                warn!(bookmark_id = bookmark.id, error = %err, "description generation failed");
                failed_count += 1;
                results.push(serde_json::json!({
                    "id": bookmark.id,
                    "success": false,
                    "error": "Failed to generate description",
                }));
            }
        }
        sleep(BATCH_PACING).await;
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "results": results,
        "successCount": success_count,
        "failedCount": failed_count,
    })))
}

async fn suggest_category_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<SuggestCategoryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (Some(name), Some(url), Some(categories)) =
        (payload.name, payload.url, payload.categories)
    else {
        return Err(AppError::InvalidInput(
            "Missing bookmark information or categories".to_string(),
        ));
    };
    if categories.is_empty() {
        return Err(AppError::InvalidInput(
            "Missing bookmark information or categories".to_string(),
        ));
    }

    let config = ai_service::resolve_config(&app_state.db).await?;
    let list = category_lines(&categories);
    let (category_id, reason) =
        classify_one(&config, &name, &url, payload.description.as_deref(), &list).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "categoryId": category_id,
        "reason": reason,
    })))
}

async fn batch_classify_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<BatchClassifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bookmarks = payload
        .bookmarks
        .filter(|list| !list.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing bookmarks array".to_string()))?;
    let categories = payload
        .categories
        .filter(|list| !list.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing categories array".to_string()))?;

    let config = ai_service::resolve_config(&app_state.db).await?;
    let list = category_lines(&categories);

    let mut results = Vec::with_capacity(bookmarks.len());
    let mut success_count = 0usize;
    let mut failed_count = 0usize;
    for bookmark in &bookmarks {
        match classify_one(
            &config,
            &bookmark.name,
            &bookmark.url,
            bookmark.description.as_deref(),
            &list,
        )
        .await
        {
            Ok((category_id, reason)) => {
                success_count += 1;
                results.push(serde_json::json!({
                    "id": bookmark.id,
                    "success": true,
                    "categoryId": category_id,
                    "reason": reason,
                }));
            }
            Err(err) => {
                warn!(bookmark_id = bookmark.id, error = %err, "classification failed");
                failed_count += 1;
                results.push(serde_json::json!({
                    "id": bookmark.id,
                    "success": false,
                    "error": "Failed to classify",
                }));
            }
        }
        sleep(BATCH_PACING).await;
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "results": results,
        "successCount": success_count,
        "failedCount": failed_count,
    })))
}

/// Forwards a relative request to the configured endpoint with the auth
/// header injected. Lets the SPA reach models the API doesn't wrap yet.
async fn proxy_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ProxyRequest>,
) -> Result<Response, AppError> {
    let path = payload
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing path".to_string()))?;

    let mut final_path = path;
    if let Some(serde_json::Value::Object(query)) = payload.query {
        let mut pairs = Vec::new();
        for (key, value) in query {
            match value {
                serde_json::Value::Array(items) => {
                    for item in items {
                        pairs.push((key.clone(), value_to_query_string(&item)));
                    }
                }
                serde_json::Value::Null => {}
                other => pairs.push((key.clone(), value_to_query_string(&other))),
            }
        }
        if !pairs.is_empty() {
            let query_string = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            let separator = if final_path.contains('?') { '&' } else { '?' };
            final_path = format!("{final_path}{separator}{query_string}");
        }
    }

    let method = payload
        .method
        .as_deref()
        .unwrap_or("POST")
        .to_uppercase()
        .parse::<reqwest::Method>()
        .map_err(|_| AppError::InvalidInput("Unsupported HTTP method".to_string()))?;

    let mut headers = reqwest::header::HeaderMap::new();
    for (key, value) in &payload.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            return Err(AppError::InvalidInput(format!("Invalid header: {key}")));
        };
        headers.insert(name, value);
    }

    let config = ai_service::resolve_config(&app_state.db).await?;
    let upstream =
        ai_service::call_upstream(&config, method, &final_path, headers, payload.body).await?;

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        // Lengths and codings are recomputed for the re-encoded body.
        if name == reqwest::header::CONTENT_LENGTH || name == reqwest::header::TRANSFER_ENCODING {
            continue;
        }
        response_headers.insert(name.clone(), value.clone());
    }
    response_headers.insert(
        HeaderName::from_static("access-control-expose-headers"),
        HeaderValue::from_static("*"),
    );

    let body = upstream
        .bytes()
        .await
        .map_err(|e| AppError::UpstreamError(format!("proxy body read failed: {e}")))?;

    let mut response = (status, body.to_vec()).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

fn value_to_query_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// --- Router ---

/// The status read is public; the auth gate covers everything else.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status_handler))
        .route(
            "/settings",
            get(get_ai_settings_handler).post(update_ai_settings_handler),
        )
        .route("/verify", post(verify_handler))
        .route("/generate-description", post(generate_description_handler))
        .route(
            "/batch-generate-descriptions",
            post(batch_generate_descriptions_handler),
        )
        .route("/suggest-category", post(suggest_category_handler))
        .route("/batch-classify", post(batch_classify_handler))
        .route("/proxy", post(proxy_handler))
}
