use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_NAME_LEN, MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};

/// User row as stored in the database (includes the password hash)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User model for API responses
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            name: record.name,
            created_at: record.created_at,
        }
    }
}

impl User {
    /// Lowercase and trim an email address so lookups are case-insensitive
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Minimal structural email check: one `@`, non-empty local part, dotted domain
    pub fn validate_email(email: &str) -> bool {
        if email.len() > MAX_NAME_LEN || email.chars().any(char::is_whitespace) {
            return false;
        }
        match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        }
    }

    pub fn validate_password(password: &str) -> bool {
        (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.chars().count())
    }

    pub fn validate_name(name: &str) -> bool {
        let trimmed = name.trim();
        !trimmed.is_empty() && trimmed.len() <= MAX_NAME_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(User::validate_email("alice@example.com"));
        assert!(User::validate_email("a.b+c@sub.example.org"));

        assert!(!User::validate_email(""));
        assert!(!User::validate_email("alice"));
        assert!(!User::validate_email("@example.com"));
        assert!(!User::validate_email("alice@localhost"));
        assert!(!User::validate_email("alice@@example.com"));
        assert!(!User::validate_email("al ice@example.com"));
        assert!(!User::validate_email("alice@.example.com"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(User::normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_validate_password_length() {
        assert!(!User::validate_password("short"));
        assert!(User::validate_password("long enough"));
        assert!(!User::validate_password(&"p".repeat(MAX_PASSWORD_LEN + 1)));
    }

    #[test]
    fn test_validate_name() {
        assert!(User::validate_name("Alice"));
        assert!(!User::validate_name("   "));
        assert!(!User::validate_name(&"n".repeat(MAX_NAME_LEN + 1)));
    }
}
