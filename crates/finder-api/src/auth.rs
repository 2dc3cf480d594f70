use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::WithRejection;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use finder_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, SessionResponse,
};

use crate::error::ApiError;
use crate::{AppState, run_db};

const MIN_PASSWORD_LEN: usize = 6;

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    let full_name = req.full_name.trim().to_string();

    if !looks_like_email(&email) {
        return Err(ApiError::bad_request("A valid email address is required"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if full_name.is_empty() {
        return Err(ApiError::bad_request("full_name is required"));
    }

    let lookup = email.clone();
    if run_db(&state, move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict("An account with this email already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let (uid, em) = (user_id.to_string(), email.clone());
    // Concurrent sign-ups can all pass the lookup above
    let created =
        run_db(&state, move |db| db.create_user(&uid, &em, &full_name, &password_hash)).await?;
    if !created {
        return Err(ApiError::Conflict("An account with this email already exists".into()));
    }

    // New accounts are signed in straight away
    let token = create_token(&state.jwt_secret, user_id, &email, state.token_ttl)?;
    info!("Registered user {}", user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    let user = run_db(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            warn!("Failed sign-in for {}", user.email);
            ApiError::Unauthorized
        })?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, user_id, &user.email, state.token_ttl)?;

    Ok(Json(LoginResponse {
        user_id,
        email: user.email,
        full_name: user.full_name,
        token,
    }))
}

/// GET /auth/session: the account behind the presented token.
pub async fn session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    // A valid token for a deleted account is treated as signed out
    let user = run_db(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(SessionResponse {
        user_id: claims.sub,
        email: user.email,
        full_name: user.full_name,
    }))
}

pub fn create_token(
    secret: &str,
    user_id: Uuid,
    email: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}
