//! A minimal federation page for tenants without an external identity provider.
//!
//! Windows opens the `AuthenticationServiceUrl` from discovery in a web view,
//! appending `appru` (where to post the result) and `login_hint`. We answer
//! with a signed auth token in `wresult`, which the device then presents as
//! its BinarySecurityToken.

use crate::app_state::AppState;
use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;

const APP_RETURN_SCHEME: &str = "ms-app://";

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub appru: String,
    #[serde(default)]
    pub login_hint: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub appru: String,
}

pub async fn login_page(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Response {
    if !query.appru.starts_with(APP_RETURN_SCHEME) {
        return invalid_return_address();
    }

    let tenant = state.settings.get().tenant.name;
    Html(render_login(&tenant, &query.appru, &query.login_hint, None)).into_response()
}

pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    if !form.appru.starts_with(APP_RETURN_SCHEME) {
        return invalid_return_address();
    }

    let email = form.email.trim().to_ascii_lowercase();
    let blocking_state = state.clone();
    let blocking_email = email.clone();
    let password = form.password;
    // Password hashing and token signing are CPU bound.
    let result = tokio::task::spawn_blocking(move || -> Result<Option<String>, String> {
        let logged_in = blocking_state
            .users
            .verify_login(&blocking_email, &password)
            .map_err(|err| err.to_string())?;
        if !logged_in {
            return Ok(None);
        }
        blocking_state
            .certificates
            .issue_auth_token(&blocking_email)
            .map(Some)
            .map_err(|err| err.to_string())
    })
    .await;

    let tenant = state.settings.get().tenant.name;
    match result {
        Ok(Ok(Some(token))) => {
            tracing::info!(%email, "issued federation token");
            Html(render_redirect(&form.appru, &token)).into_response()
        }
        Ok(Ok(None)) => {
            tracing::warn!(%email, "rejected federation login");
            let page = render_login(
                &tenant,
                &form.appru,
                &email,
                Some("The email address or password is incorrect."),
            );
            (StatusCode::UNAUTHORIZED, Html(page)).into_response()
        }
        Ok(Err(err)) => {
            tracing::error!(%email, error = %err, "unable to complete federation login");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "federation login task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn invalid_return_address() -> Response {
    (
        StatusCode::BAD_REQUEST,
        "appru must be an ms-app:// address",
    )
        .into_response()
}

fn render_login(tenant: &str, appru: &str, login_hint: &str, error: Option<&str>) -> String {
    let error = error
        .map(|error| format!("<p class=\"error\">{}</p>", escape_html(error)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{tenant} sign in</title></head>
<body>
<h1>Sign in to {tenant}</h1>
{error}
<form method="post">
<input type="hidden" name="appru" value="{appru}">
<label>Email <input type="email" name="email" value="{login_hint}" required></label>
<label>Password <input type="password" name="password" required></label>
<button type="submit">Sign in</button>
</form>
</body>
</html>"#,
        tenant = escape_html(tenant),
        appru = escape_html(appru),
        login_hint = escape_html(login_hint),
    )
}

/// Posts `wresult` back to the enrollment client as soon as the page loads.
fn render_redirect(appru: &str, token: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body onload="document.forms[0].submit()">
<form method="post" action="{appru}">
<input type="hidden" name="wresult" value="{token}">
<noscript><button type="submit">Continue</button></noscript>
</form>
</body>
</html>"#,
        appru = escape_html(appru),
        token = escape_html(token),
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn redirect_carries_token() {
        let page = render_redirect("ms-app://s-1-15-2", "abc+/=");
        assert!(page.contains(r#"action="ms-app://s-1-15-2""#));
        assert!(page.contains(r#"name="wresult" value="abc+/=""#));
    }

    #[test]
    fn login_page_shows_errors_escaped() {
        let page = render_login("Acme <Corp>", "ms-app://x", "oscar@acme.test", Some("bad"));
        assert!(page.contains("Acme &lt;Corp&gt;"));
        assert!(page.contains(r#"<p class="error">bad</p>"#));
        assert!(page.contains(r#"value="oscar@acme.test""#));
    }
}
