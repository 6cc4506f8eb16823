use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::constants::ERR_INVALID_CREDENTIALS;
use crate::db;
use crate::error::{AppError, Result};
use crate::models::User;
use crate::security::{hash_password, sign_token, verify_password};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Hash on the blocking pool; PBKDF2 at production iteration counts takes tens of ms
async fn hash_blocking(password: String, iterations: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password, iterations)).await?
}

fn issue_token(state: &AppState, user_id: &str) -> Result<String> {
    sign_token(
        user_id,
        &state.config.jwt_secret,
        Utc::now().timestamp(),
        state.config.jwt_expiry_secs,
    )
}

/// Register a new account
///
/// Emails are matched case-insensitively. Returns 409 Conflict if the email
/// is already registered.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let email = User::normalize_email(&payload.email);
    if !User::validate_email(&email) {
        return Err(AppError::invalid("A valid email address is required"));
    }
    if !User::validate_name(&payload.name) {
        return Err(AppError::invalid("Name must be 1-255 characters"));
    }
    if !User::validate_password(&payload.password) {
        return Err(AppError::invalid("Password must be 8-256 characters"));
    }

    if db::users::find_by_email(&state.db, &email).await?.is_some() {
        tracing::info!("Registration attempt for existing email");
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }

    let password_hash =
        hash_blocking(payload.password, state.config.password_hash_iterations).await?;
    let record = db::users::insert(&state.db, &email, payload.name.trim(), &password_hash).await?;

    tracing::info!("New user registered: {}", record.id);

    let token = issue_token(&state, &record.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: record.into(),
        }),
    ))
}

/// Exchange email and password for an access token
///
/// Unknown emails and wrong passwords produce the same 401.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let email = User::normalize_email(&payload.email);
    let record = db::users::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::Unauthorized(ERR_INVALID_CREDENTIALS.to_string()))?;

    let encoded = record.password_hash.clone();
    let valid =
        tokio::task::spawn_blocking(move || verify_password(&payload.password, &encoded)).await?;
    if !valid {
        tracing::warn!("Failed login for user {}", record.id);
        return Err(AppError::Unauthorized(ERR_INVALID_CREDENTIALS.to_string()));
    }

    let token = issue_token(&state, &record.id)?;
    Ok(Json(AuthResponse {
        token,
        user: record.into(),
    }))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// Change display name and/or password
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<User>> {
    if let Some(name) = payload.name.as_deref() {
        if !User::validate_name(name) {
            return Err(AppError::invalid("Name must be 1-255 characters"));
        }
    }

    let password_hash = match payload.password {
        Some(password) => {
            if !User::validate_password(&password) {
                return Err(AppError::invalid("Password must be 8-256 characters"));
            }
            Some(hash_blocking(password, state.config.password_hash_iterations).await?)
        }
        None => None,
    };

    let record = db::users::update_profile(
        &state.db,
        &user.id,
        payload.name.as_deref().map(str::trim),
        password_hash.as_deref(),
    )
    .await?;

    Ok(Json(record.into()))
}
