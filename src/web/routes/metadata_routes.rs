use std::sync::Arc;
use std::time::Duration;

use axum::{Json, extract::Query, extract::State};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::web::{AppState, error::AppError};

/// Some sites answer bots with empty pages; a desktop UA gets the real
/// head section.
const FETCH_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

static FETCH_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .user_agent(FETCH_USER_AGENT)
        .build()
        .expect("failed to build metadata HTTP client")
});

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<title[^>]*>([^<]+)</title>").unwrap());
static DESC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]*name=["']description["'][^>]*content=["']([^"']+)["']"#).unwrap()
});
static DESC_RE_REVERSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]*content=["']([^"']+)["'][^>]*name=["']description["']"#).unwrap()
});
static OG_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]*property=["']og:title["'][^>]*content=["']([^"']+)["']"#).unwrap()
});
static OG_DESC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]*property=["']og:description["'][^>]*content=["']([^"']+)["']"#)
        .unwrap()
});

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub url: Option<String>,
}

fn first_capture(re: &Regex, html: &str) -> Option<String> {
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn clean(text: &str, max_len: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_len).collect()
}

/// Extracts a title and description from a page head, preferring
/// OpenGraph tags.
pub fn extract_metadata(html: &str) -> (String, String) {
    let title = first_capture(&OG_TITLE_RE, html)
        .or_else(|| first_capture(&TITLE_RE, html))
        .unwrap_or_default();
    let description = first_capture(&OG_DESC_RE, html)
        .or_else(|| first_capture(&DESC_RE, html))
        .or_else(|| first_capture(&DESC_RE_REVERSED, html))
        .unwrap_or_default();
    (clean(&title, 100), clean(&description, 200))
}

pub async fn fetch_metadata_handler(
    State(_app_state): State<Arc<AppState>>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let target = query
        .url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AppError::InvalidInput("URL parameter is required".to_string()))?;

    let fetched = async {
        reqwest::Url::parse(&target).map_err(|e| format!("invalid url: {e}"))?;
        let response = FETCH_CLIENT
            .get(&target)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        response
            .text()
            .await
            .map_err(|e| format!("body read failed: {e}"))
    }
    .await;

    match fetched {
        Ok(html) => {
            let (title, description) = extract_metadata(&html);
            Ok(Json(serde_json::json!({
                "success": true,
                "title": title,
                "description": description,
            })))
        }
        Err(detail) => {
            debug!(url = %target, detail = %detail, "metadata fetch failed");
            Err(AppError::UpstreamError(format!(
                "metadata fetch for {target} failed: {detail}"
            )))
        }
    }
}
