pub mod auth;
pub mod documents;
pub mod events;
pub mod files;
pub mod folders;
pub mod health;
pub mod messages;
pub mod notifications;
pub mod projects;
pub mod shares;
pub mod tasks;
pub mod teams;
pub mod ws;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Deserializer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use health::health_check;

use crate::AppState;

/// Tell an absent field (`None`) apart from an explicit `null` (`Some(None)`)
///
/// Use with `#[serde(default, deserialize_with = "nullable")]`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Build the full application router
pub fn router(state: AppState) -> Router {
    // Configure CORS
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Headroom for multipart framing; the exact file size is checked in the handler
    let body_limit = state.config.max_upload_bytes + 16 * 1024;

    let api = Router::new()
        // Auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me).patch(auth::update_me))
        // Teams
        .route("/teams", get(teams::list_teams).post(teams::create_team))
        .route(
            "/teams/{id}",
            get(teams::get_team)
                .patch(teams::update_team)
                .delete(teams::delete_team),
        )
        .route("/teams/{id}/members", post(teams::add_member))
        .route(
            "/teams/{id}/members/{user_id}",
            patch(teams::update_member).delete(teams::remove_member),
        )
        .route(
            "/teams/{id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/teams/{id}/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        // Folders, files, documents
        .route("/folders", get(folders::list_folders).post(folders::create_folder))
        .route(
            "/folders/{id}",
            get(folders::get_folder)
                .patch(folders::update_folder)
                .delete(folders::delete_folder),
        )
        .route("/files", get(files::list_files).post(files::upload_file))
        .route(
            "/files/{id}",
            get(files::get_file)
                .patch(files::update_file)
                .delete(files::delete_file),
        )
        .route("/files/{id}/download", get(files::download_file))
        .route("/files/{id}/extract", post(files::extract_document))
        .route(
            "/documents",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/documents/{id}",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route("/documents/{id}/updates", get(documents::list_updates))
        // Shares
        .route("/shares", post(shares::create_share))
        .route("/shares/received", get(shares::list_received))
        .route(
            "/shares/resource/{resource_type}/{id}",
            get(shares::list_resource_shares),
        )
        .route(
            "/shares/{id}",
            patch(shares::update_share).delete(shares::revoke_share),
        )
        // Projects & tasks
        .route(
            "/projects/{id}",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/projects/{id}/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route("/tasks/assigned", get(tasks::list_assigned))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route(
            "/notifications/{id}",
            patch(notifications::mark_read).delete(notifications::delete_notification),
        )
        // Calendar
        .route("/events", get(events::list_events).post(events::create_event))
        .route(
            "/events/{id}",
            get(events::get_event)
                .patch(events::update_event)
                .delete(events::delete_event),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
