use crate::app_state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

mod auth;
pub mod discovery;
pub mod enrollment;
mod federation;
mod manage;
pub mod policy;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/EnrollmentServer/Discovery.svc",
            get(discovery::probe).post(discovery::discover),
        )
        .route(discovery::POLICY_SERVICE_PATH, post(policy::get_policies))
        .route(discovery::ENROLLMENT_SERVICE_PATH, post(enrollment::enroll))
        .route(
            enrollment::MANAGEMENT_SERVICE_PATH,
            post(manage::management_service),
        )
        .route(
            discovery::AUTHENTICATION_SERVICE_PATH,
            get(federation::login_page).post(federation::login),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
