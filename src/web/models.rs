use serde::{Deserialize, Deserializer, Serialize};

// --- Auth ---

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default, rename = "rememberMe")]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub username: String,
}

/// Inserted into request extensions by the auth middleware once a
/// bearer token checks out.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
}

// --- Categories ---

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub parent_id: Option<i32>,
    #[serde(default)]
    pub is_private: bool,
}

/// `parent_id` distinguishes "absent" (keep) from "null" (move to root),
/// hence the nested Option.
#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: String,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<i32>>,
    pub position: Option<i32>,
    pub is_private: Option<bool>,
}

// --- Bookmarks ---

#[derive(Debug, Deserialize)]
pub struct BookmarkPayload {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub category_id: i32,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_private: bool,
    pub tags: Option<String>,
    pub notes: Option<String>,
}

/// The existing owner reported alongside a 409 on URL collision.
#[derive(Debug, Clone, Serialize)]
pub struct ExistingBookmark {
    pub id: i32,
    pub name: String,
    pub url: String,
    pub category_id: i32,
    pub category_name: Option<String>,
}

// --- Reorder / batch operations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderKind {
    Bookmarks,
    Categories,
}

#[derive(Debug, Deserialize)]
pub struct ReorderItem {
    pub id: i32,
    pub position: i32,
}

/// `type` stays a plain string so an unknown value can answer 400
/// rather than a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub items: Vec<ReorderItem>,
}

#[derive(Debug, Deserialize)]
pub struct BatchOperationRequest {
    pub operation: String,
    /// Ids may arrive as numbers or numeric strings; normalized in the
    /// handler.
    #[serde(default, rename = "bookmarkIds")]
    pub bookmark_ids: Option<Vec<serde_json::Value>>,
    #[serde(default, rename = "categoryIds")]
    pub category_ids: Option<Vec<i32>>,
    #[serde(default)]
    pub data: Option<BatchOperationData>,
}

#[derive(Debug, Deserialize)]
pub struct BatchOperationData {
    #[serde(rename = "categoryId")]
    pub category_id: Option<i32>,
    #[serde(rename = "isPrivate")]
    pub is_private: Option<bool>,
}

// --- Import ---

/// Both lists are optional at the serde level so a malformed payload
/// gets the API's own 400 instead of a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub categories: Option<Vec<ImportCategory>>,
    pub bookmarks: Option<Vec<ImportBookmark>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportCategory {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i32>,
    #[serde(default)]
    pub depth: Option<i32>,
    #[serde(default)]
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportBookmark {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    pub category_id: i32,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_private: bool,
}

// --- Settings ---

#[derive(Debug, Deserialize)]
pub struct SettingsUpdateRequest {
    pub settings: serde_json::Map<String, serde_json::Value>,
}

// --- Serde helpers ---

/// Keeps `field: null` distinguishable from an absent field by mapping
/// any present value (including null) to `Some(...)`.
pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// Accepts `true`/`false`, SQLite-style `0`/`1`, or null. Import
/// payloads come from exports where booleans round-tripped as integers.
pub fn flexible_bool<'de, D>(de: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(de)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_id_absent_vs_null_vs_value() {
        let absent: UpdateCategoryRequest = serde_json::from_str(r#"{"name":"A"}"#).unwrap();
        assert_eq!(absent.parent_id, None);

        let null: UpdateCategoryRequest =
            serde_json::from_str(r#"{"name":"A","parent_id":null}"#).unwrap();
        assert_eq!(null.parent_id, Some(None));

        let set: UpdateCategoryRequest =
            serde_json::from_str(r#"{"name":"A","parent_id":7}"#).unwrap();
        assert_eq!(set.parent_id, Some(Some(7)));
    }

    #[test]
    fn bookmark_is_private_accepts_bool_and_int() {
        let json = r#"{"name":"a","url":"https://a","category_id":1,"is_private":1}"#;
        let payload: BookmarkPayload = serde_json::from_str(json).unwrap();
        assert!(payload.is_private);

        let json = r#"{"name":"a","url":"https://a","category_id":1,"is_private":false}"#;
        let payload: BookmarkPayload = serde_json::from_str(json).unwrap();
        assert!(!payload.is_private);

        let json = r#"{"name":"a","url":"https://a","category_id":1}"#;
        let payload: BookmarkPayload = serde_json::from_str(json).unwrap();
        assert!(!payload.is_private);
    }
}
