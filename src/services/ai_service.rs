//! Glue to the configured OpenAI-compatible endpoint. Connection
//! parameters resolve environment-first, then the settings table, then
//! defaults; the API key itself never travels back out through any
//! response.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use serde_json::json;

use crate::db::services::settings_service;
use crate::web::error::AppError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AUTH_HEADER: &str = "Authorization";
pub const DEFAULT_AUTH_PREFIX: &str = "Bearer ";

/// Pause between items in batch endpoints so upstream rate limits are
/// not tripped.
pub const BATCH_PACING: Duration = Duration::from_millis(500);

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .expect("failed to build AI HTTP client")
});

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub auth_header: String,
    pub auth_prefix: String,
}

/// Which fields are pinned by environment variables (and therefore
/// locked against edits through the settings API).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EnvLocks {
    #[serde(rename = "apiKey")]
    pub api_key: bool,
    #[serde(rename = "baseUrl")]
    pub base_url: bool,
    pub model: bool,
    #[serde(rename = "authHeader")]
    pub auth_header: bool,
    #[serde(rename = "authPrefix")]
    pub auth_prefix: bool,
}

pub fn env_locks() -> EnvLocks {
    EnvLocks {
        api_key: env::var("OPENAI_API_KEY").is_ok(),
        base_url: env::var("OPENAI_BASE_URL").is_ok(),
        model: env::var("OPENAI_MODEL").is_ok(),
        auth_header: env::var("OPENAI_AUTH_HEADER").is_ok(),
        auth_prefix: env::var("OPENAI_AUTH_PREFIX").is_ok(),
    }
}

pub async fn resolve_config(db: &DatabaseConnection) -> Result<AiConfig, DbErr> {
    let settings = settings_service::get_settings_map(
        db,
        &[
            "secret_openai_api_key",
            "ai_base_url",
            "ai_model",
            "ai_auth_header",
            "ai_auth_prefix",
        ],
    )
    .await?;

    let pick = |env_key: &str, setting_key: &str, default: &str| -> String {
        env::var(env_key)
            .ok()
            .or_else(|| settings.get(setting_key).cloned())
            .unwrap_or_else(|| default.to_string())
            .trim()
            .to_string()
    };

    let api_key = env::var("OPENAI_API_KEY")
        .ok()
        .or_else(|| settings.get("secret_openai_api_key").cloned())
        .unwrap_or_default();
    // The prefix may legitimately be empty, so trim only the others.
    let auth_prefix = env::var("OPENAI_AUTH_PREFIX")
        .ok()
        .or_else(|| settings.get("ai_auth_prefix").cloned())
        .unwrap_or_else(|| DEFAULT_AUTH_PREFIX.to_string());

    Ok(AiConfig {
        api_key,
        base_url: pick("OPENAI_BASE_URL", "ai_base_url", DEFAULT_BASE_URL),
        model: pick("OPENAI_MODEL", "ai_model", DEFAULT_MODEL),
        auth_header: pick("OPENAI_AUTH_HEADER", "ai_auth_header", DEFAULT_AUTH_HEADER),
        auth_prefix,
    })
}

/// Joins a relative path onto the configured base URL. Absolute URLs
/// are refused so the proxy cannot be pointed at arbitrary hosts.
pub fn join_base_url(base_url: &str, path: &str) -> Result<String, AppError> {
    if path.is_empty() {
        return Err(AppError::InvalidInput("Missing path".to_string()));
    }
    if path.contains("://") {
        return Err(AppError::InvalidInput(
            "Path must be relative to the configured base URL".to_string(),
        ));
    }
    let base = base_url.strip_suffix('/').unwrap_or(base_url);
    let path = path.strip_prefix('/').unwrap_or(path);
    Ok(format!("{base}/{path}"))
}

/// Sends a request to the configured endpoint with the auth header
/// injected. Used by the chat helper, the key verifier, and the raw
/// proxy route.
pub async fn call_upstream(
    config: &AiConfig,
    method: reqwest::Method,
    path: &str,
    extra_headers: HeaderMap,
    body: Option<serde_json::Value>,
) -> Result<reqwest::Response, AppError> {
    if config.api_key.is_empty() {
        return Err(AppError::InvalidInput("Missing OpenAI API key".to_string()));
    }
    let url = join_base_url(&config.base_url, path)?;

    let mut headers = extra_headers;
    let header_name = HeaderName::from_bytes(config.auth_header.as_bytes())
        .map_err(|e| AppError::InvalidInput(format!("Invalid auth header name: {e}")))?;
    if !headers.contains_key(&header_name) {
        let value = format!("{}{}", config.auth_prefix, config.api_key);
        headers.insert(
            header_name,
            HeaderValue::from_str(&value)
                .map_err(|e| AppError::InvalidInput(format!("Invalid auth header value: {e}")))?,
        );
    }

    let mut request = HTTP_CLIENT.request(method, url).headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    request
        .send()
        .await
        .map_err(|e| AppError::UpstreamError(format!("AI request failed: {e}")))
}

/// One chat completion; returns the assistant message text.
pub async fn chat_completion(
    config: &AiConfig,
    system: &str,
    user: &str,
    temperature: f64,
    max_tokens: u32,
) -> Result<String, AppError> {
    let body = json!({
        "model": config.model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
        "temperature": temperature,
        "max_tokens": max_tokens,
    });

    let response = call_upstream(
        config,
        reqwest::Method::POST,
        "chat/completions",
        HeaderMap::new(),
        Some(body),
    )
    .await?;

    if !response.status().is_success() {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        return Err(AppError::UpstreamError(format!(
            "chat completion failed with status {status}: {detail}"
        )));
    }

    let payload: serde_json::Value = response
        .json()
        .await
        .map_err(|e| AppError::UpstreamError(format!("invalid chat completion payload: {e}")))?;
    let content = payload["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    Ok(content)
}

/// Pulls the first `{...}` block out of a model reply and parses it.
/// Models love wrapping JSON in prose and code fences; this mirrors the
/// lenient extraction the clients have always relied on.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Fills `{placeholder}` variables in a prompt template.
pub fn fill_template(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut filled = template.to_string();
    for (key, value) in vars {
        filled = filled.replace(&format!("{{{key}}}"), value);
    }
    filled
}

pub const DEFAULT_DESCRIPTION_PROMPT: &str = "You are an assistant that generates concise and helpful descriptions for bookmarks/websites.

Given the following bookmark information:
Name: {name}
URL: {url}

Please generate a brief, useful description (1-2 sentences, max 100 words) that explains what this website/resource is about. The description should be clear, informative, and help users understand the purpose or content of the site.

Return only the description text, without any additional formatting or quotes.";

pub const DESCRIPTION_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that generates concise bookmark descriptions.";

pub const CLASSIFY_PROMPT: &str = "You are helping to organize bookmarks into categories. Choose the most suitable existing category ID based on the bookmark information.

Bookmark:
- Name: {name}
- URL: {url}
- Description: {description}

Existing categories (ID: Name or path):
{categories}

Return a JSON object with the fields \"categoryId\" (must be one of the provided IDs) and \"reason\" (a short explanation in the same language as the bookmark name).";

pub const CLASSIFY_SYSTEM_PROMPT: &str =
    "You are an assistant that selects the most appropriate bookmark category and explains the reasoning.";

/// The description prompt template: the custom one when enabled and
/// non-blank, the default otherwise.
pub async fn description_template(db: &DatabaseConnection) -> Result<String, DbErr> {
    let settings = settings_service::get_settings_map(
        db,
        &[
            "ai_custom_prompt_description",
            "ai_custom_prompt_description_enabled",
        ],
    )
    .await?;

    let enabled = settings
        .get("ai_custom_prompt_description_enabled")
        .map(|v| v == "true")
        .unwrap_or(false);
    let custom = settings
        .get("ai_custom_prompt_description")
        .map(|v| v.trim().to_string())
        .unwrap_or_default();

    Ok(if enabled && !custom.is_empty() {
        custom
    } else {
        DEFAULT_DESCRIPTION_PROMPT.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_base_url_normalizes_slashes() {
        assert_eq!(
            join_base_url("https://api.example/v1", "chat/completions").unwrap(),
            "https://api.example/v1/chat/completions"
        );
        assert_eq!(
            join_base_url("https://api.example/v1/", "/models").unwrap(),
            "https://api.example/v1/models"
        );
    }

    #[test]
    fn join_base_url_rejects_absolute_and_empty_paths() {
        assert!(join_base_url("https://api.example/v1", "https://evil.example/x").is_err());
        assert!(join_base_url("https://api.example/v1", "").is_err());
    }

    #[test]
    fn extract_json_from_noisy_reply() {
        let reply = "Sure! Here you go:\n```json\n{\"categoryId\": 3, \"reason\": \"dev docs\"}\n```";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["categoryId"], 3);

        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn template_fill_replaces_all_occurrences() {
        let mut vars = HashMap::new();
        vars.insert("name", "Rust".to_string());
        vars.insert("url", "https://rust-lang.org".to_string());
        let filled = fill_template("{name} at {url} ({name})", &vars);
        assert_eq!(filled, "Rust at https://rust-lang.org (Rust)");
    }
}
