//! Structural and contextual verification of inbound envelope headers.
//!
//! Structural checks are pure string inspection and always run first;
//! contextual checks consult server configuration and run only on
//! requests that are already well-formed.

use super::envelope::{RequestHeader, SecurityHeader};
use super::fault::{DeviceErrorType, Fault, FaultSubcode};
use axum::http::Uri;
use base64::{Engine, engine::general_purpose::STANDARD};

const MESSAGE_ID_PREFIX: &str = "urn:uuid:";
const MAX_EMAIL_LENGTH: usize = 254;

/// Credentials carried in a structurally valid WS-Security header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    /// A base64 `BinarySecurityToken`, already checked to decode.
    Token(String),
    UsernamePassword { username: String, password: String },
}

impl RequestHeader {
    /// Checks the header is complete and well-formed for an endpoint.
    ///
    /// When `requires_auth` is set, exactly one credential mode must be
    /// present and it is handed back for the endpoint to authenticate.
    pub fn verify_structure(
        &self,
        expected_action: &str,
        requires_auth: bool,
    ) -> Result<Option<Credentials>, Fault> {
        if self.action != expected_action {
            return Err(Fault::sender(
                FaultSubcode::ActionMismatch,
                "The requested action is not served by this endpoint.",
            ));
        }

        if !is_valid_message_id(&self.message_id) {
            return Err(Fault::message_format(
                "The MessageID header is missing or malformed.",
            ));
        }

        if parse_destination(&self.to).is_none() {
            return Err(endpoint_unavailable());
        }

        if !requires_auth {
            return Ok(None);
        }
        match &self.security {
            Some(security) => verify_credentials(security).map(Some),
            None => Err(invalid_security()),
        }
    }

    /// Checks the request was addressed to one of our enrollment domains.
    pub fn verify_context(&self, enrollment_domains: &[String]) -> Result<(), Fault> {
        let Some(host) = parse_destination(&self.to) else {
            return Err(endpoint_unavailable());
        };

        let addressed_here = enrollment_domains
            .iter()
            .any(|domain| domain.eq_ignore_ascii_case(&host));
        if !addressed_here {
            tracing::warn!(%host, "request addressed to another server");
            return Err(endpoint_unavailable());
        }

        Ok(())
    }
}

fn verify_credentials(security: &SecurityHeader) -> Result<Credentials, Fault> {
    let token = security
        .binary_security_token
        .as_deref()
        .filter(|token| !token.is_empty());
    let username = security
        .username
        .as_deref()
        .filter(|username| !username.is_empty());

    match (token, username) {
        (Some(token), None) => {
            if STANDARD.decode(token).is_err() {
                return Err(invalid_security());
            }
            Ok(Credentials::Token(token.to_string()))
        }
        (None, Some(username)) => {
            let password = security.password.as_deref().unwrap_or_default();
            if !is_valid_email(username) || password.is_empty() {
                return Err(invalid_security());
            }
            Ok(Credentials::UsernamePassword {
                username: username.to_string(),
                password: password.to_string(),
            })
        }
        // Neither, or both at once.
        _ => Err(invalid_security()),
    }
}

fn invalid_security() -> Fault {
    Fault::sender(
        FaultSubcode::InvalidSecurity,
        "The request carries no usable security token.",
    )
}

fn endpoint_unavailable() -> Fault {
    Fault::sender(
        FaultSubcode::EndpointUnavailable,
        "The requested endpoint is not served here.",
    )
    .with_detail(
        DeviceErrorType::EnrollmentServer,
        "The request was not addressed to this enrollment server.",
    )
}

/// Returns the lowercase host of an absolute `https` URI.
fn parse_destination(to: &str) -> Option<String> {
    let uri: Uri = to.parse().ok()?;
    if uri.scheme_str() != Some("https") {
        return None;
    }
    uri.host()
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
}

pub fn is_valid_message_id(message_id: &str) -> bool {
    message_id.len() > MESSAGE_ID_PREFIX.len()
        && message_id.starts_with(MESSAGE_ID_PREFIX)
        && message_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '-')
}

pub fn is_valid_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LENGTH {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    let local_valid = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    if !local_valid {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let Some(tld) = labels.last() else {
        return false;
    };
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// The lowercase domain of a valid email address.
pub fn email_domain(email: &str) -> Option<String> {
    if !is_valid_email(email) {
        return None;
    }
    email
        .split_once('@')
        .map(|(_, domain)| domain.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ACTION: &str = "urn:test:action";

    fn header() -> RequestHeader {
        RequestHeader {
            action: ACTION.to_string(),
            message_id: "urn:uuid:0d5a1441-5891-453b-becf-a2e5f6ea3749".to_string(),
            reply_to: None,
            to: "https://EnterpriseEnrollment.acme.test:443/EnrollmentServer/Discovery.svc"
                .to_string(),
            security: None,
        }
    }

    fn with_security(security: SecurityHeader) -> RequestHeader {
        RequestHeader {
            security: Some(security),
            ..header()
        }
    }

    #[test]
    fn accepts_unauthenticated_discovery_header() {
        assert_eq!(header().verify_structure(ACTION, false).unwrap(), None);
    }

    #[test]
    fn action_is_checked_first() {
        let header = RequestHeader {
            action: "urn:other".to_string(),
            message_id: String::new(),
            ..header()
        };
        let fault = header.verify_structure(ACTION, false).unwrap_err();
        assert_eq!(fault.subcode, FaultSubcode::ActionMismatch);
    }

    #[test]
    fn rejects_bad_message_ids() {
        for message_id in ["", "urn:uuid:", "uuid:1234", "urn:uuid:12 34", "urn:uuid:<x>"] {
            let header = RequestHeader {
                message_id: message_id.to_string(),
                ..header()
            };
            let fault = header.verify_structure(ACTION, false).unwrap_err();
            assert_eq!(fault.subcode, FaultSubcode::MessageFormat, "{message_id}");
        }
    }

    #[test]
    fn destination_must_be_absolute_https() {
        for to in ["", "this-is-not-a-url", "http://acme.test/x", "/EnrollmentServer"] {
            let header = RequestHeader {
                to: to.to_string(),
                ..header()
            };
            let fault = header.verify_structure(ACTION, false).unwrap_err();
            assert_eq!(fault.subcode, FaultSubcode::EndpointUnavailable, "{to}");
        }
    }

    #[test]
    fn context_matches_domains_case_insensitively() {
        let domains = vec![
            "mdm.acme.test".to_string(),
            "enterpriseenrollment.acme.test".to_string(),
        ];
        assert!(header().verify_context(&domains).is_ok());

        let elsewhere = vec!["mdm.example.org".to_string()];
        let fault = header().verify_context(&elsewhere).unwrap_err();
        assert_eq!(fault.subcode, FaultSubcode::EndpointUnavailable);
    }

    #[test]
    fn accepts_exactly_one_credential_mode() {
        let token = with_security(SecurityHeader {
            binary_security_token: Some("aGVsbG8=".to_string()),
            ..Default::default()
        });
        assert_eq!(
            token.verify_structure(ACTION, true).unwrap(),
            Some(Credentials::Token("aGVsbG8=".to_string()))
        );

        let login = with_security(SecurityHeader {
            username: Some("oscar@acme.test".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            login.verify_structure(ACTION, true).unwrap(),
            Some(Credentials::UsernamePassword { .. })
        ));

        let both = with_security(SecurityHeader {
            binary_security_token: Some("aGVsbG8=".to_string()),
            username: Some("oscar@acme.test".to_string()),
            password: Some("hunter2".to_string()),
        });
        let neither = with_security(SecurityHeader::default());
        for header in [both, neither, header()] {
            let fault = header.verify_structure(ACTION, true).unwrap_err();
            assert_eq!(fault.subcode, FaultSubcode::InvalidSecurity);
        }
    }

    #[test]
    fn rejects_undecodable_tokens_and_empty_passwords() {
        let token = with_security(SecurityHeader {
            binary_security_token: Some("not base64!".to_string()),
            ..Default::default()
        });
        assert!(token.verify_structure(ACTION, true).is_err());

        let login = with_security(SecurityHeader {
            username: Some("oscar@acme.test".to_string()),
            password: Some(String::new()),
            ..Default::default()
        });
        assert!(login.verify_structure(ACTION, true).is_err());
    }

    #[test]
    fn validates_emails() {
        assert!(is_valid_email("oscar@acme.test"));
        assert!(is_valid_email("Oscar.Beaumont+mdm@Sub.Acme.example"));
        for email in [
            "",
            "not-an-email-address",
            "@acme.test",
            "oscar@",
            "oscar@acme",
            "oscar@acme..test",
            "oscar@acme.t",
            "oscar@acme.te5t",
            "os car@acme.test",
            "oscar@acme.test@evil.test",
        ] {
            assert!(!is_valid_email(email), "{email}");
        }
        assert_eq!(email_domain("oscar@ACME.test").as_deref(), Some("acme.test"));
    }

    proptest! {
        #[test]
        fn message_id_validation_matches_charset(suffix in "[a-zA-Z0-9:\\-]{1,64}") {
            let message_id = format!("urn:uuid:{suffix}");
            prop_assert!(is_valid_message_id(&message_id));
        }

        #[test]
        fn arbitrary_headers_never_panic(
            action in ".{0,64}",
            message_id in ".{0,64}",
            to in ".{0,64}",
            token in proptest::option::of(".{0,64}"),
        ) {
            let header = RequestHeader {
                action,
                message_id,
                reply_to: None,
                to,
                security: Some(SecurityHeader {
                    binary_security_token: token,
                    ..Default::default()
                }),
            };
            let _ = header.verify_structure(ACTION, true);
            let _ = header.verify_context(&["acme.test".to_string()]);
        }
    }
}
