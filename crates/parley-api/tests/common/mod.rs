#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::{AppState, AppStateInner};
use parley_db::Database;
use parley_gateway::auth::issue_token;
use parley_gateway::dispatcher::Dispatcher;

pub const SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

pub struct User {
    pub id: Uuid,
    pub token: String,
}

impl TestApp {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = AppStateInner::new(db, SECRET, Dispatcher::new());
        let router = parley_api::router(state.clone());
        Self { state, router }
    }

    pub fn user(&self, name: &str) -> User {
        let id = Uuid::new_v4();
        let token = issue_token(SECRET, id, name, chrono::Duration::hours(1)).unwrap();
        User { id, token }
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<&User>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", user.token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, user: &User) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(user), None).await
    }

    pub async fn post(&self, uri: &str, user: &User, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(user), Some(body)).await
    }

    pub async fn put(&self, uri: &str, user: &User, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, uri, Some(user), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: &User, body: Option<Value>) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, Some(user), body).await
    }

    /// Create a group chat owned by `owner` with the given other members.
    pub async fn group(&self, owner: &User, members: &[&User]) -> i64 {
        let ids: Vec<Uuid> = members.iter().map(|u| u.id).collect();
        let (status, body) = self
            .post(
                "/chats",
                owner,
                serde_json::json!({ "kind": "group", "name": "team", "members": ids }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["chatId"].as_i64().unwrap()
    }
}

/// base64 of a short ASCII string
pub fn b64(text: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(text)
}
