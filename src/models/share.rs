use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of resources that can be shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ResourceType {
    File,
    Document,
    Folder,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::File => "file",
            ResourceType::Document => "document",
            ResourceType::Folder => "folder",
        }
    }

    /// Human-readable label used in error messages
    pub fn label(self) -> &'static str {
        match self {
            ResourceType::File => "File",
            ResourceType::Document => "Document",
            ResourceType::Folder => "Folder",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission level granted by a share, ordered view < edit < admin
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Permission {
    View,
    Edit,
    Admin,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Edit => "edit",
            Permission::Admin => "admin",
        }
    }
}

/// Share row: exactly one of `shared_with_user_id` / `shared_with_team_id` is set
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub owner_id: String,
    pub shared_with_user_id: Option<String>,
    pub shared_with_team_id: Option<String>,
    pub permission: Permission,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A share as seen by a recipient, with the resource name resolved
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedShare {
    pub id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub resource_name: Option<String>,
    pub owner_id: String,
    pub shared_with_team_id: Option<String>,
    pub permission: Permission,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_ordering() {
        assert!(Permission::View < Permission::Edit);
        assert!(Permission::Edit < Permission::Admin);
        assert_eq!(
            [Permission::Edit, Permission::View, Permission::Admin]
                .into_iter()
                .max(),
            Some(Permission::Admin)
        );
    }

    #[test]
    fn test_resource_type_wire_format() {
        let kind: ResourceType = serde_json::from_str("\"document\"").unwrap();
        assert_eq!(kind, ResourceType::Document);
        assert_eq!(ResourceType::Folder.to_string(), "folder");
        assert!(serde_json::from_str::<ResourceType>("\"project\"").is_err());
    }
}
