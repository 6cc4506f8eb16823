pub mod communication;
pub mod share;
pub mod storage;
pub mod team;
pub mod user;
pub mod work;

pub use communication::{ChatMessage, Notification, NotificationKind};
pub use share::{Permission, ReceivedShare, ResourceType, Share};
pub use storage::{
    validate_resource_name, Document, DocumentSummary, DocumentUpdate, FileRecord, Folder,
};
pub use team::{Team, TeamMember, TeamRole, TeamSummary};
pub use user::{User, UserRecord};
pub use work::{Event, Project, ProjectStatus, Task, TaskPriority, TaskStatus};
