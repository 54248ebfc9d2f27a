use super::{
    envelope::{RequestEnvelope, RequestHeader},
    fault::Fault,
    namespaces::SOAP_CONTENT_TYPE,
    verify::Credentials,
    xml::Element,
};
use crate::app_state::AppState;
use axum::{
    extract::{FromRef, FromRequest, Request},
    http::{HeaderMap, header},
};

/// User agent of the built-in Windows enrollment client.
pub const ENROLLMENT_USER_AGENT: &str = "ENROLLClient";

/// The body of a SOAP message served by one endpoint.
pub trait SoapRequest: Sized {
    /// The `a:Action` this endpoint answers.
    const ACTION: &'static str;
    /// Whether the header must carry credentials.
    const REQUIRES_AUTH: bool;

    /// Decodes the first child of `s:Body`.
    fn from_body(body: &Element) -> Result<Self, Fault>;
}

/// A structurally verified SOAP request.
///
/// Rejections are SOAP faults, so devices always receive a well-formed envelope.
#[derive(Debug)]
pub struct SoapEnvelope<T> {
    pub header: RequestHeader,
    pub credentials: Option<Credentials>,
    pub body: T,
}

impl<S, T> FromRequest<S> for SoapEnvelope<T>
where
    S: Send + Sync,
    T: SoapRequest,
    AppState: FromRef<S>,
{
    type Rejection = Fault;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let service = &state.config.service;

        // Before we read the body, let's check the headers.
        // These are cheap, and stop most stray requests.
        check_headers(req.headers(), service.strict_user_agent, service.max_body_bytes)?;

        let body = axum::body::to_bytes(req.into_body(), service.max_body_bytes)
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "unable to read request body");
                Fault::message_format("The request body could not be read.")
            })?;
        if body.is_empty() {
            return Err(Fault::message_format("The request body is empty."));
        }

        let envelope = RequestEnvelope::parse(&body)?;
        let credentials = envelope
            .header
            .verify_structure(T::ACTION, T::REQUIRES_AUTH)?;
        let body = T::from_body(&envelope.body)?;

        Ok(SoapEnvelope {
            header: envelope.header,
            credentials,
            body,
        })
    }
}

/// Whether a request declares a SOAP body.
pub fn is_soap_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case(SOAP_CONTENT_TYPE))
}

fn check_headers(
    headers: &HeaderMap,
    strict_user_agent: bool,
    max_body_bytes: usize,
) -> Result<(), Fault> {
    if !is_soap_content_type(headers) {
        return Err(Fault::message_format(
            "The request content type is not supported.",
        ));
    }

    if strict_user_agent {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok());
        if user_agent != Some(ENROLLMENT_USER_AGENT) {
            tracing::warn!(?user_agent, "rejecting unexpected user agent");
            return Err(Fault::message_format("The client is not supported."));
        }
    }

    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_length.is_some_and(|length| length > max_body_bytes) {
        return Err(Fault::message_format("The request body is too large."));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn soap_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(" Application/SOAP+xml; charset=UTF-8 "),
        );
        headers
    }

    #[test]
    fn accepts_soap_content() {
        assert!(check_headers(&soap_headers(), false, 1024).is_ok());

        let mut headers = soap_headers();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        assert!(check_headers(&headers, false, 1024).is_err());
        assert!(check_headers(&HeaderMap::new(), false, 1024).is_err());
    }

    #[test]
    fn strict_mode_requires_the_enrollment_client() {
        let mut headers = soap_headers();
        assert!(check_headers(&headers, true, 1024).is_err());

        headers.insert(header::USER_AGENT, HeaderValue::from_static("ENROLLClient"));
        assert!(check_headers(&headers, true, 1024).is_ok());
    }

    #[test]
    fn rejects_oversized_declarations() {
        let mut headers = soap_headers();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1025"));
        let fault = check_headers(&headers, false, 1024).unwrap_err();
        assert_eq!(fault.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
