/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum password length (bounds PBKDF2 input)
pub const MAX_PASSWORD_LEN: usize = 256;

/// Maximum length of display names, titles and resource names
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of free-form descriptions
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

/// Maximum size of a document body (2MB of text)
pub const MAX_DOCUMENT_CONTENT_LEN: usize = 2_097_152;

/// Maximum length of one chat message
pub const MAX_MESSAGE_LEN: usize = 4_000;

/// Default and maximum page sizes for chat history
pub const DEFAULT_MESSAGE_PAGE: i64 = 50;
pub const MAX_MESSAGE_PAGE: i64 = 100;

/// Folder nesting limit; also bounds permission inheritance walks
pub const MAX_FOLDER_DEPTH: usize = 64;

/// Maximum size of a single realtime document delta (base64 text)
pub const MAX_DOCUMENT_UPDATE_LEN: usize = 1_048_576;

/// Uploads larger than this are logged for monitoring
pub const WARN_UPLOAD_SIZE_BYTES: usize = 10_485_760;

// =============================================================================
// Error Messages
// =============================================================================

/// Same message for unknown email and wrong password
pub const ERR_INVALID_CREDENTIALS: &str = "Invalid email or password";

pub const ERR_MISSING_TOKEN: &str = "Missing or malformed bearer token";

pub const ERR_NOT_TEAM_MEMBER: &str = "You are not a member of this team";

pub const ERR_INSUFFICIENT_PERMISSION: &str = "You do not have permission to perform this action";

pub const ERR_OWNER_ONLY: &str = "Only the owner can perform this action";

pub const ERR_FOREIGN_FOLDER_MOVE: &str =
    "Only the owner can move this into a folder owned by someone else";
