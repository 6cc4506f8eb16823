//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use collabdrive_server::{open_database, router, AppState, Config};

pub const TEST_JWT_SECRET: &str = "integration-test-secret-0123456789";
pub const TEST_PASSWORD: &str = "correct horse battery";
pub const MAX_UPLOAD: usize = 64 * 1024;

/// Create a test configuration rooted in a temporary directory
pub fn test_config(dir: &TempDir) -> Config {
    Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0, // Random port
        database_path: dir.path().join("test.db").to_string_lossy().into_owned(),
        storage_path: dir.path().join("blobs").to_string_lossy().into_owned(),
        allowed_origins: vec!["http://localhost:5173".to_string()],
        environment: "test".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        jwt_expiry_secs: 3600,
        // Low iteration count keeps registration fast in tests
        password_hash_iterations: 1_000,
        max_upload_bytes: MAX_UPLOAD,
        document_flush_debounce_ms: 50,
        document_flush_max_delay_ms: 200,
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _dir: TempDir,
}

/// A registered user
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub token: String,
}

pub async fn spawn_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let db = open_database(&config.database_path).await.unwrap();
    let state = AppState::new(db, config).await.unwrap();
    TestApp {
        app: router(state.clone()),
        state,
        _dir: dir,
    }
}

/// Parse response body as JSON (`Null` for empty bodies)
pub async fn body_to_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_to_json(response.into_body()).await)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, Some(token), None).await
    }

    /// GET returning raw bytes and headers (downloads)
    pub async fn get_raw(&self, uri: &str, token: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes.to_vec())
    }

    pub async fn register(&self, name: &str) -> TestUser {
        let email = format!("{}@example.com", name.to_lowercase());
        let (status, body) = self
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": email, "password": TEST_PASSWORD, "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        TestUser {
            id: body["user"]["id"].as_str().unwrap().to_string(),
            email,
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Upload through the multipart endpoint
    pub async fn upload(
        &self,
        token: &str,
        filename: &str,
        mime: &str,
        bytes: &[u8],
        folder_id: Option<&str>,
    ) -> (StatusCode, Value) {
        let boundary = "----collabdrive-test-boundary";
        let mut body = Vec::new();
        if let Some(folder_id) = folder_id {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"folderId\"\r\n\r\n{folder_id}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/files")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_to_json(response.into_body()).await)
    }

    /// Create a team owned by `owner` and add `members` to it
    pub async fn team_with(&self, owner: &TestUser, members: &[&TestUser]) -> String {
        let (status, team) = self
            .post("/api/teams", &owner.token, json!({ "name": "Core" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let team_id = team["id"].as_str().unwrap().to_string();

        for member in members {
            let (status, _) = self
                .post(
                    &format!("/api/teams/{team_id}/members"),
                    &owner.token,
                    json!({ "email": member.email }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        team_id
    }
}

/// Poll until `check` passes or a couple of seconds elapse
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}
