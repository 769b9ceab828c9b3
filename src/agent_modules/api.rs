use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::AgentError;
use crate::db::category_tree::CategoryRecord;

/// Typed client for the bookmark manager's HTTP API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginReply {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCategory {
    pub id: i32,
    pub name: String,
    pub parent_id: Option<i32>,
    pub depth: i32,
    pub position: i32,
    #[serde(default)]
    pub is_private: bool,
}

impl From<&RemoteCategory> for CategoryRecord {
    fn from(c: &RemoteCategory) -> Self {
        CategoryRecord {
            id: c.id,
            name: c.name.clone(),
            parent_id: c.parent_id,
            depth: c.depth,
            position: c.position,
            is_private: c.is_private,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoteExistingBookmark {
    pub id: i32,
    pub name: String,
    pub url: String,
    pub category_id: i32,
    pub category_name: Option<String>,
}

/// Result of a save: either a new bookmark id or the existing owner of
/// the URL.
#[derive(Debug)]
pub enum SaveOutcome {
    Created(i32),
    Duplicate(RemoteExistingBookmark),
}

#[derive(Debug, Default)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
}

#[derive(Debug)]
pub struct NewBookmark {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub category_id: i32,
    pub is_private: bool,
}

async fn error_from_response(response: reqwest::Response) -> AgentError {
    let status = response.status().as_u16();
    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => body["error"]
            .as_str()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => "request failed".to_string(),
    };
    AgentError::Api { status, message }
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<LoginReply, AgentError> {
        let response = self
            .http
            .post(self.url("/api/login"))
            .json(&json!({
                "username": username,
                "password": password,
                "rememberMe": remember_me,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        let token = body["token"]
            .as_str()
            .ok_or_else(|| AgentError::Protocol("login reply without token".to_string()))?;
        Ok(LoginReply {
            token: token.to_string(),
            username: body["username"].as_str().unwrap_or(username).to_string(),
        })
    }

    pub async fn list_categories(
        &self,
        token: Option<&str>,
    ) -> Result<Vec<RemoteCategory>, AgentError> {
        let mut request = self.http.get(self.url("/api/categories"));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        let categories = serde_json::from_value(body["data"].clone())
            .map_err(|e| AgentError::Protocol(format!("invalid category list: {e}")))?;
        Ok(categories)
    }

    pub async fn create_bookmark(
        &self,
        token: &str,
        bookmark: &NewBookmark,
    ) -> Result<SaveOutcome, AgentError> {
        let response = self
            .http
            .post(self.url("/api/bookmarks"))
            .bearer_auth(token)
            .json(&json!({
                "name": bookmark.name,
                "url": bookmark.url,
                "description": bookmark.description,
                "category_id": bookmark.category_id,
                "is_private": bookmark.is_private,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let body: serde_json::Value = response.json().await?;
            let existing = serde_json::from_value(body["existingBookmark"].clone())
                .map_err(|e| AgentError::Protocol(format!("invalid conflict payload: {e}")))?;
            return Ok(SaveOutcome::Duplicate(existing));
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        let id = body["id"]
            .as_i64()
            .ok_or_else(|| AgentError::Protocol("create reply without id".to_string()))?;
        Ok(SaveOutcome::Created(id as i32))
    }

    pub async fn fetch_metadata(&self, url: &str) -> Result<PageMetadata, AgentError> {
        let response = self
            .http
            .get(self.url("/api/fetch-metadata"))
            .query(&[("url", url)])
            .send()
            .await?;
        if !response.status().is_success() {
            // Metadata is best-effort; the caller falls back to the URL.
            return Ok(PageMetadata::default());
        }
        let body: serde_json::Value = response.json().await?;
        Ok(PageMetadata {
            title: body["title"].as_str().unwrap_or_default().to_string(),
            description: body["description"].as_str().unwrap_or_default().to_string(),
        })
    }

    /// Asks the server's AI endpoint for a category; `categories` are
    /// `(id, path)` pairs.
    pub async fn suggest_category(
        &self,
        token: &str,
        name: &str,
        url: &str,
        description: Option<&str>,
        categories: &[(i32, String)],
    ) -> Result<Option<(i64, String)>, AgentError> {
        let options: Vec<serde_json::Value> = categories
            .iter()
            .map(|(id, path)| json!({ "id": id, "path": path }))
            .collect();
        let response = self
            .http
            .post(self.url("/api/ai/suggest-category"))
            .bearer_auth(token)
            .json(&json!({
                "name": name,
                "url": url,
                "description": description.unwrap_or(""),
                "categories": options,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }
        let body: serde_json::Value = response.json().await?;
        match body["categoryId"].as_i64() {
            Some(id) => Ok(Some((
                id,
                body["reason"].as_str().unwrap_or_default().to_string(),
            ))),
            None => Ok(None),
        }
    }
}
