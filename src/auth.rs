//! Session-cookie identity for handlers.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::errors::Error;
use crate::manager::{
    session_manager::{self, SessionId, SessionManager},
    User,
};
use crate::{AppState, SESSION_ID_KEY};

/// The signed-in user. Rejects with 401 when there is no valid session.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// The signed-in user, if any.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

/// A signed-in admin. Rejects with 403 for everyone else.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

pub fn session_id(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_ID_KEY)
        .map(|cookie| SessionId(cookie.value().to_owned()))
}

pub fn session_cookie(sid: &SessionId, secure: bool) -> Cookie<'static> {
    Cookie::build(SESSION_ID_KEY, sid.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .finish()
}

pub fn expired_session_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::named(SESSION_ID_KEY);
    cookie.set_path("/");
    cookie
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<User>, Error> {
    let jar = CookieJar::from_headers(&parts.headers);
    let Some(sid) = session_id(&jar) else {
        return Ok(None);
    };
    match SessionManager::new(&state.pool).get_user(&sid).await {
        Ok(user) => Ok(Some(user)),
        Err(session_manager::Error::DoesNotExist) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or(Error::Unauthenticated)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve(parts, state).await?))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.is_admin() {
            Ok(AdminUser(user))
        } else {
            Err(Error::forbidden("Admin access required"))
        }
    }
}
