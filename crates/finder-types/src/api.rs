use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MatchCandidate;

// -- JWT Claims --

/// Bearer token claims. Issued by the auth handlers and verified by the
/// request middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
}

// -- Cases --

/// Query string for `GET /cases`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CaseQuery {
    pub q: Option<String>,
    pub status: Option<String>,
}

// -- Photo matching --

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FaceMatchRequest {
    #[serde(rename = "imageBase64", default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FaceMatchResponse {
    pub matches: Vec<MatchCandidate>,
}

// -- Errors --

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
