use crate::app_state::AppState;
use crate::settings::AuthPolicy;
use crate::soap::{Credentials, Fault, FaultSubcode};

/// Resolves the enrolling user's email from the header credentials,
/// as demanded by the tenant's auth policy.
pub async fn authenticate(
    state: &AppState,
    credentials: Option<Credentials>,
) -> Result<String, Fault> {
    let policy = state.settings.get().windows.auth_policy;

    // Password hashing and signature checks are CPU bound.
    let state = state.clone();
    let user = tokio::task::spawn_blocking(move || resolve_user(&state, policy, credentials))
        .await
        .map_err(Fault::internal)??;

    user.ok_or_else(|| {
        tracing::warn!(%policy, "rejected enrollment credentials");
        // Never hint at which part of the credentials was wrong.
        Fault::sender(
            FaultSubcode::Authentication,
            "The supplied credentials could not be verified.",
        )
    })
}

fn resolve_user(
    state: &AppState,
    policy: AuthPolicy,
    credentials: Option<Credentials>,
) -> Result<Option<String>, Fault> {
    let Some(credentials) = credentials else {
        return Ok(None);
    };

    let user = match (policy, credentials) {
        (AuthPolicy::OnPremise, Credentials::UsernamePassword { username, password }) => {
            let logged_in = state
                .users
                .verify_login(&username, &password)
                .map_err(Fault::internal)?;
            logged_in.then(|| username.to_ascii_lowercase())
        }
        (AuthPolicy::Federated, Credentials::Token(token)) => {
            state.certificates.verify_auth_token(&token)
        }
        (AuthPolicy::Certificate, Credentials::Token(token)) => {
            state.certificates.verify_issued_certificate(&token)
        }
        // Credentials of a kind this tenant does not accept.
        _ => None,
    };

    Ok(user)
}
