use axum::{
    extract::{FromRef, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{jwt::JwtKeys, password},
    error::ApiError,
    state::AppState,
};

use super::dto::{CreateUserRequest, LoginRequest, TokenResponse, UpdateUserRequest};
use super::repo::{User, UserPatch};
use super::services::{is_valid_email, users_to_csv, validate_new_user, validate_user_patch};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/login", post(login))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = User::find_all(&state.db).await?;
    Ok(Json(users))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(mut payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    validate_new_user(&payload)?;

    // Uniqueness pre-check; the unique index backs it up under races
    if User::find_by_email(&state.db, &payload.email)
        .await?
        .is_some()
    {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::EmailTaken);
    }

    let hash = password::hash_password(&payload.password)?;
    let user = User::create(
        &state.db,
        payload.name.trim(),
        &payload.email,
        &hash,
        payload.level,
    )
    .await?;

    info!(user_id = user.id, email = %user.email, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    if let Some(email) = payload.email.as_mut() {
        *email = email.trim().to_lowercase();
    }
    validate_user_patch(&payload)?;

    let password_hash = match &payload.password {
        Some(plain) => Some(password::hash_password(plain)?),
        None => None,
    };
    let patch = UserPatch {
        name: payload.name.map(|n| n.trim().to_string()),
        email: payload.email,
        password_hash,
        level: payload.level,
    };

    let user = User::update(&state.db, id, &patch)
        .await?
        .ok_or(ApiError::NotFound)?;

    info!(user_id = user.id, "user updated");
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let user = User::delete(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound)?;

    info!(user_id = user.id, "user deleted");
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation("invalid email".into()));
    }
    if payload.password.is_empty() {
        return Err(ApiError::Validation("password is required".into()));
    }

    let user = match User::find_by_email(&state.db, &payload.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %payload.email, "login unknown email");
            return Err(ApiError::InvalidCredentials);
        }
    };

    let ok = password::verify_password(&payload.password, &user.password_hash)?;
    if !ok {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;

    info!(user_id = user.id, "user logged in");
    Ok(Json(TokenResponse { token }))
}

/// GET /generate-csv, mounted behind `authenticate` + `require_level::<4>`.
#[instrument(skip(state))]
pub async fn export_csv(State(state): State<AppState>) -> Result<(HeaderMap, Vec<u8>), ApiError> {
    let users = User::find_all(&state.db).await?;
    let body = users_to_csv(&users)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"user_report.csv\""),
    );

    info!(rows = users.len(), "user report generated");
    Ok((headers, body))
}
