//! Account route handlers: registration, activation, login and logout.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Path, Query, State},
    http::{
        HeaderMap,
        header::{COOKIE, SET_COOKIE},
    },
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tower_sessions::cookie::{Cookie, time::Duration as CookieDuration};
use tracing::instrument;

use super::PageHeader;
use crate::error::{AppError, Result, add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::filters;
use crate::middleware::{clear_current_user, set_current_user};
use crate::models::CurrentUser;
use crate::services::auth::{AuthError, Registration, safe_next};
use crate::services::tasks::Task;
use crate::state::AppState;

/// Cookie remembering the last username typed into the login form.
pub const USERNAME_COOKIE: &str = "username";

const REMEMBER_DAYS: i64 = 7;

// =============================================================================
// Form Types
// =============================================================================

/// Registration form data.
#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub pwd: String,
    #[serde(default)]
    pub email: String,
    pub allow: Option<String>,
}

/// Login form data.
#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub pwd: String,
    pub remember: Option<String>,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("pwd", &"[REDACTED]")
            .field("remember", &self.remember)
            .finish()
    }
}

/// Where to go after logging in.
#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

// =============================================================================
// Templates
// =============================================================================

/// Register page template.
#[derive(Template, WebTemplate)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub header: PageHeader,
    pub error: Option<&'static str>,
}

/// Login page template.
#[derive(Template, WebTemplate)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub header: PageHeader,
    pub username: String,
    pub remembered: bool,
    pub next: String,
    pub error: Option<&'static str>,
}

/// Shown when an activation link is past its expiry.
#[derive(Template, WebTemplate)]
#[template(path = "activation_expired.html")]
pub struct ActivationExpiredTemplate {
    pub header: PageHeader,
}

/// Form mistakes are shown on the form; anything else is a server error.
fn form_error(err: AuthError) -> Result<&'static str> {
    match err {
        AuthError::Repository(_) | AuthError::PasswordHash | AuthError::TokenSigning(_) => {
            Err(AppError::Auth(err))
        }
        other => Ok(other.user_message()),
    }
}

// =============================================================================
// Registration Routes
// =============================================================================

/// Display the registration page.
pub async fn register_page() -> RegisterTemplate {
    RegisterTemplate {
        header: PageHeader::default(),
        error: None,
    }
}

/// Handle registration: create an inactive account and mail its activation link.
#[instrument(skip(state, form), fields(username = %form.user_name))]
pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Result<Response> {
    let registration = Registration {
        username: form.user_name,
        password: form.pwd,
        email: form.email,
        allow: form.allow,
    };

    match state.auth().register(&registration).await {
        Ok((user, token)) => {
            tracing::info!(user_id = %user.id, "User registered");
            state.tasks().dispatch(Task::SendActivationEmail {
                to: user.email.to_string(),
                username: user.username,
                token,
            });
            Ok(Redirect::to("/").into_response())
        }
        Err(e) => {
            let error = form_error(e)?;
            Ok(RegisterTemplate {
                header: PageHeader::default(),
                error: Some(error),
            }
            .into_response())
        }
    }
}

/// Follow an activation link.
///
/// An expired link gets its own page; a forged one is a 400.
#[instrument(skip(state, token))]
pub async fn activate(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    match state.auth().activate(&token).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "Account activated");
            Ok(Redirect::to("/user/login").into_response())
        }
        Err(AuthError::TokenExpired) => Ok(ActivationExpiredTemplate {
            header: PageHeader::default(),
        }
        .into_response()),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Login Routes
// =============================================================================

/// Display the login page, pre-filling a remembered username.
pub async fn login_page(headers: HeaderMap, Query(query): Query<NextQuery>) -> LoginTemplate {
    let remembered = remembered_username(&headers);
    LoginTemplate {
        header: PageHeader::default(),
        remembered: remembered.is_some(),
        username: remembered.unwrap_or_default(),
        next: safe_next(query.next.as_deref()).to_string(),
        error: None,
    }
}

/// Handle login form submission.
#[instrument(skip(state, session, query, form), fields(username = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<NextQuery>,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let next = safe_next(query.next.as_deref()).to_string();

    let user = match state.auth().login(&form.username, &form.pwd).await {
        Ok(user) => user,
        Err(e) => {
            let error = form_error(e)?;
            tracing::debug!(reason = error, "Login rejected");
            return Ok(LoginTemplate {
                header: PageHeader::default(),
                remembered: form.remember.is_some(),
                username: form.username,
                next,
                error: Some(error),
            }
            .into_response());
        }
    };

    let current = CurrentUser {
        id: user.id,
        username: user.username,
    };
    set_current_user(&session, &current).await?;
    set_sentry_user(&current.id, Some(&current.username));
    add_breadcrumb("auth", "User logged in", None);

    let remember = form.remember.as_deref() == Some("on");
    let cookie = if remember {
        username_cookie(&current.username)
    } else {
        expired_username_cookie()
    };

    Ok((
        AppendHeaders([(SET_COOKIE, cookie.to_string())]),
        Redirect::to(&next),
    )
        .into_response())
}

/// Log out and go back to the login page.
#[instrument(skip(session))]
pub async fn logout(session: Session) -> Result<Redirect> {
    clear_current_user(&session).await?;
    clear_sentry_user();
    Ok(Redirect::to("/user/login"))
}

// =============================================================================
// Remembered username
// =============================================================================

fn username_cookie(username: &str) -> Cookie<'static> {
    Cookie::build((USERNAME_COOKIE, urlencoding::encode(username).into_owned()))
        .path("/")
        .http_only(true)
        .max_age(CookieDuration::days(REMEMBER_DAYS))
        .build()
}

fn expired_username_cookie() -> Cookie<'static> {
    Cookie::build((USERNAME_COOKIE, ""))
        .path("/")
        .max_age(CookieDuration::ZERO)
        .build()
}

fn remembered_username(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(std::result::Result::ok)
        .find(|cookie| cookie.name() == USERNAME_COOKIE)
        .and_then(|cookie| urlencoding::decode(cookie.value()).ok().map(|v| v.into_owned()))
        .filter(|name| !name.is_empty())
}
