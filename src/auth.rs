use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Agent,
    Admin,
    /// Internal role used by the assignment engine; never minted for a token.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Identity {
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: ActorRole::System,
        }
    }
}

/// Credential verification is an external capability (token issuance and
/// checking live outside this service); the core only depends on this seam.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AppError>;
}

/// In-memory bearer-token table standing in for the external verifier in
/// development and tests.
#[derive(Default)]
pub struct TokenTable {
    tokens: DashMap<String, Identity>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }
}

impl CredentialVerifier for TokenTable {
    fn verify(&self, token: &str) -> Result<Identity, AppError> {
        self.tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::Unauthorized("invalid token".to_string()))
    }
}

/// Extractor for `Authorization: Bearer <token>` headers.
pub struct AuthIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("malformed authorization header".to_string()))?;

        let identity = state.verifier.verify(token)?;
        Ok(AuthIdentity(identity))
    }
}

impl AuthIdentity {
    pub fn require(self, role: ActorRole) -> Result<Identity, AppError> {
        if self.0.role == role {
            Ok(self.0)
        } else {
            Err(AppError::Forbidden(format!("{:?} access required", role)))
        }
    }
}
