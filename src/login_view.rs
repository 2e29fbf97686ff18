use std::sync::Arc;

use askama::Template;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Form,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::auth::{expired_session_cookie, session_cookie, session_id, MaybeUser};
use crate::errors::Result;
use crate::manager::{
    login_manager::{self, LoginManager},
    session_manager::{self, SessionManager},
    FieldError,
};
use crate::AppState;

fn hx_redirect(to: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("HX-Redirect", HeaderValue::from_static(to));
    headers
}

#[derive(Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
}

#[derive(Template)]
#[template(path = "login_view/login_attempt.html")]
struct LoginAttempt {
    success: bool,
}

#[tracing::instrument(skip_all)]
pub async fn try_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<LoginForm>,
) -> Result<Response> {
    let LoginForm { email, password } = credentials;
    let user = match LoginManager::new(&state.pool)
        .get_user(&email, &password)
        .await
    {
        Ok(user) => user,
        Err(login_manager::Error::WrongCredentials) => {
            return Ok(LoginAttempt { success: false }.into_response())
        }
        Err(e) => return Err(e.into()),
    };

    let sid = SessionManager::new(&state.pool)
        .generate_session_id_for(&user)
        .await?;
    let jar = jar.add(session_cookie(&sid, state.config.session_cookie_secure));
    Ok((jar, hx_redirect("/"), LoginAttempt { success: true }).into_response())
}

#[derive(Template)]
#[template(path = "login_view/login.html")]
pub struct LoginTemplate {
    signed_in: bool,
}

pub async fn login(MaybeUser(user): MaybeUser) -> LoginTemplate {
    LoginTemplate {
        signed_in: user.is_some(),
    }
}

#[derive(Template, Default)]
#[template(path = "login_view/widget_register.html")]
pub struct RegisterWidget {
    name_cache: String,
    email_cache: String,
    email_taken: bool,
    mismatch_passwords: bool,
    errors: Vec<FieldError>,
}

pub async fn register() -> RegisterWidget {
    RegisterWidget::default()
}

#[derive(Deserialize)]
pub struct RegisterUserForm {
    name: String,
    email: String,
    password: String,
    confirm_password: String,
}

#[tracing::instrument(skip_all)]
pub async fn try_register(
    State(state): State<Arc<AppState>>,
    Form(form): Form<RegisterUserForm>,
) -> Result<Response> {
    let RegisterUserForm {
        name,
        email,
        password,
        confirm_password,
    } = form;

    let user = LoginManager::new(&state.pool)
        .new_user(&name, &email, &password, &confirm_password)
        .await;

    let widget = RegisterWidget {
        name_cache: name,
        email_cache: email,
        ..Default::default()
    };
    let widget = match user {
        Ok(user) => {
            tracing::info!(user_id = user.id, "user registered");
            return Ok((hx_redirect("/login"), "").into_response());
        }
        Err(login_manager::Error::EmailTaken) => RegisterWidget {
            email_taken: true,
            ..widget
        },
        Err(login_manager::Error::PasswordMismatch) => RegisterWidget {
            mismatch_passwords: true,
            ..widget
        },
        Err(login_manager::Error::EmailTakenAndPasswordMismatch) => RegisterWidget {
            email_taken: true,
            mismatch_passwords: true,
            ..widget
        },
        Err(login_manager::Error::Invalid(errors)) => RegisterWidget { errors, ..widget },
        Err(e) => return Err(e.into()),
    };

    Ok(widget.into_response())
}

#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Response> {
    if let Some(sid) = session_id(&jar) {
        match SessionManager::new(&state.pool).delete(&sid).await {
            Ok(()) | Err(session_manager::Error::DoesNotExist) => {}
            Err(e) => return Err(e.into()),
        }
    }
    let jar = jar.remove(expired_session_cookie());
    Ok((jar, hx_redirect("/"), "").into_response())
}
