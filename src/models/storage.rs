use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_NAME_LEN;

/// Folder in a user's storage tree
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Uploaded file metadata; bytes live in the blob store under `storage_key`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub owner_id: String,
    pub folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Whether the stored bytes can be read back as text for extraction
    pub fn is_text(&self) -> bool {
        let mime = self.mime_type.as_str();
        mime.starts_with("text/")
            || matches!(
                mime,
                "application/json" | "application/xml" | "application/x-yaml" | "application/yaml"
            )
    }
}

/// Collaborative document
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub owner_id: String,
    pub folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document listing entry without the body
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted realtime delta
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub id: i64,
    pub document_id: String,
    pub update_data: String,
    pub created_at: DateTime<Utc>,
}

/// Validate a file, folder or document name
///
/// Names are displayed and used in Content-Disposition, so path separators and
/// control characters are rejected.
pub fn validate_resource_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed.len() <= MAX_NAME_LEN
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_resource_name() {
        assert!(validate_resource_name("report.pdf"));
        assert!(validate_resource_name("Q3 plan (draft)"));

        assert!(!validate_resource_name(""));
        assert!(!validate_resource_name("   "));
        assert!(!validate_resource_name(".."));
        assert!(!validate_resource_name("a/b"));
        assert!(!validate_resource_name("a\\b"));
        assert!(!validate_resource_name("line\nbreak"));
        assert!(!validate_resource_name(&"x".repeat(MAX_NAME_LEN + 1)));
    }

    #[test]
    fn test_text_detection() {
        let mut file = FileRecord {
            id: "f".into(),
            name: "notes.md".into(),
            mime_type: "text/markdown".into(),
            size_bytes: 3,
            storage_key: "k".into(),
            owner_id: "u".into(),
            folder_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(file.is_text());

        file.mime_type = "application/json".into();
        assert!(file.is_text());

        file.mime_type = "image/png".into();
        assert!(!file.is_text());
    }

    #[test]
    fn test_storage_key_not_serialized() {
        let file = FileRecord {
            id: "f".into(),
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            size_bytes: 1,
            storage_key: "secret-key".into(),
            owner_id: "u".into(),
            folder_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&file).unwrap();
        assert!(json.get("storageKey").is_none());
        assert_eq!(json["sizeBytes"], 1);
    }
}
