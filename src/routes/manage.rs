use super::enrollment::{self, EnrollmentRequest};
use crate::app_state::AppState;
use crate::soap::{SoapEnvelope, is_soap_content_type};
use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// `MDM.svc` serves two clients. Enrollment arrives as SOAP, while the
/// device's OMA-DM sessions arrive as SyncML.
pub async fn management_service(State(state): State<AppState>, request: Request) -> Response {
    if is_soap_content_type(request.headers()) {
        return match SoapEnvelope::<EnrollmentRequest>::from_request(request, &state).await {
            Ok(envelope) => enrollment::enroll(State(state), envelope)
                .await
                .into_response(),
            Err(fault) => fault.into_response(),
        };
    }

    let limit = state.config.service.max_body_bytes;
    match axum::body::to_bytes(request.into_body(), limit).await {
        Ok(body) => manage(body).await.into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "unable to read management request");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// OMA-DM management sessions are not served yet. The device is told
/// nothing is pending.
pub async fn manage(body: Bytes) -> StatusCode {
    tracing::info!(size = body.len(), "received management request");
    StatusCode::OK
}
