use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::auth::{expired_session_cookie, session_cookie, session_id, CurrentUser};
use crate::errors::Result;
use crate::manager::{
    login_manager::LoginManager,
    session_manager::{self, SessionManager},
    User,
};
use crate::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    confirm_password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>)> {
    let user = LoginManager::new(&state.pool)
        .new_user(&req.name, &req.email, &req.password, &req.confirm_password)
        .await?;
    tracing::info!(user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<User>)> {
    let user = LoginManager::new(&state.pool)
        .get_user(&req.email, &req.password)
        .await?;
    let sid = SessionManager::new(&state.pool)
        .generate_session_id_for(&user)
        .await?;
    let cookie = session_cookie(&sid, state.config.session_cookie_secure);
    Ok((jar.add(cookie), Json(user)))
}

#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode)> {
    if let Some(sid) = session_id(&jar) {
        match SessionManager::new(&state.pool).delete(&sid).await {
            Ok(()) | Err(session_manager::Error::DoesNotExist) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok((jar.remove(expired_session_cookie()), StatusCode::NO_CONTENT))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
