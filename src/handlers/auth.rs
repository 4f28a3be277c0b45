use axum::{extract::State, http::HeaderMap, Json};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;

use super::{bearer, AppError};

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

/// In-memory user table and issued tokens.
#[derive(Default)]
pub struct Accounts {
    inner: Mutex<AccountsInner>,
}

#[derive(Default)]
struct AccountsInner {
    next_id: u64,
    users: HashMap<String, User>,
    // token → email
    tokens: HashMap<String, String>,
}

impl Accounts {
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthResponse, AppError> {
        let mut inner = self.inner.lock();
        if inner.users.contains_key(email) {
            return Err(AppError::BadRequest(format!("'{email}' is already registered")));
        }
        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            name: name.to_owned(),
            email: email.to_owned(),
            password: password.to_owned(),
        };
        inner.users.insert(email.to_owned(), user.clone());
        Ok(inner.issue(user))
    }

    pub fn login(&self, email: &str, password: &str) -> Result<AuthResponse, AppError> {
        let mut inner = self.inner.lock();
        let user = match inner.users.get(email) {
            Some(u) if u.password == password => u.clone(),
            _ => return Err(AppError::NotFound("unknown user".into())),
        };
        Ok(inner.issue(user))
    }

    /// Revoke a token. `false` if it was never issued.
    pub fn logout(&self, token: &str) -> bool {
        self.inner.lock().tokens.remove(token).is_some()
    }

    pub fn email_for(&self, token: &str) -> Option<String> {
        self.inner.lock().tokens.get(token).cloned()
    }
}

impl AccountsInner {
    fn issue(&mut self, user: User) -> AuthResponse {
        let token = format!("tok_{}", uuid::Uuid::new_v4().simple());
        self.tokens.insert(token.clone(), user.email.clone());
        AuthResponse { user, token }
    }
}

// ─── POST /api/auth ──────────────────────────────────────────────

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if req.name.is_empty() || req.email.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest(
            "name, email, and password are required".into(),
        ));
    }
    state
        .accounts
        .register(&req.name, &req.email, &req.password)
        .map(Json)
}

// ─── PUT /api/auth ───────────────────────────────────────────────

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    state.accounts.login(&req.email, &req.password).map(Json)
}

// ─── DELETE /api/auth ────────────────────────────────────────────

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = bearer(&headers)?;
    if !state.accounts.logout(token) {
        return Err(AppError::Unauthorized);
    }
    Ok(Json(serde_json::json!({ "message": "logout successful" })))
}
