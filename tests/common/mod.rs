#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use der::Encode;
use rsa::{RsaPrivateKey, pkcs1v15::SigningKey};
use sha2::Sha256;
use std::str::FromStr;
use tower::ServiceExt;
use windows_mdm_server::soap::{
    Element, Fault,
    namespaces::{ADDRESSING, SOAP_CONTENT_TYPE, SOAP_ENVELOPE, WSS_SECEXT, WSS_UTILITY},
};
use windows_mdm_server::{AppState, Config, routes};
use x509_cert::builder::{Builder, RequestBuilder};
use x509_cert::name::Name;

pub const USER: &str = "oscar@acme.test";
pub const PASSWORD: &str = "correct horse battery staple";
pub const DISCOVERY_TO: &str = "https://enterpriseenrollment.acme.test/EnrollmentServer/Discovery.svc";
pub const POLICY_TO: &str = "https://mdm.acme.test/EnrollmentServer/Policy.svc";
pub const ENROLLMENT_TO: &str = "https://mdm.acme.test/EnrollmentServer/Enrollment.svc";

/// A server for `acme.test` backed by an in-memory database.
pub fn state(auth_policy: &str) -> AppState {
    let config = Config::parse(&format!(
        r#"
[service]
primary_domain = "mdm.acme.test"

[storage]
database_path = ":memory:"

[identity]
key_bits = 2048

[settings]
managed_domains = ["acme.test"]

[settings.tenant]
name = "Acme"

[settings.windows]
auth_policy = "{auth_policy}"
"#
    ))
    .unwrap();

    let state = AppState::with_config(config).unwrap();
    state.users.create_user(USER, PASSWORD).unwrap();
    state
}

pub fn app(state: &AppState) -> Router {
    routes::create_routes(state.clone())
}

/// Wraps a header fragment and body payload into a request envelope.
pub fn envelope(action: &str, to: &str, security: &str, body: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:a="{ADDRESSING}" xmlns:s="{SOAP_ENVELOPE}"><s:Header><a:Action s:mustUnderstand="1">{action}</a:Action><a:MessageID>urn:uuid:748132ec-a575-4329-b01b-6171a9cf8478</a:MessageID><a:ReplyTo><a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address></a:ReplyTo><a:To s:mustUnderstand="1">{to}</a:To>{security}</s:Header><s:Body>{body}</s:Body></s:Envelope>"#
    )
}

pub fn username_security(username: &str, password: &str) -> String {
    format!(
        r#"<wsse:Security xmlns:wsse="{WSS_SECEXT}" s:mustUnderstand="1"><wsse:UsernameToken u:Id="uuid-1" xmlns:u="{WSS_UTILITY}"><wsse:Username>{username}</wsse:Username><wsse:Password wsse:Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText">{password}</wsse:Password></wsse:UsernameToken></wsse:Security>"#
    )
}

pub fn token_security(token: &str) -> String {
    format!(
        r#"<wsse:Security xmlns:wsse="{WSS_SECEXT}" s:mustUnderstand="1"><wsse:BinarySecurityToken ValueType="http://schemas.microsoft.com/5.0.0.0/ConfigurationManager/Enrollment/DeviceEnrollmentUserToken" EncodingType="{WSS_SECEXT}#base64binary">{token}</wsse:BinarySecurityToken></wsse:Security>"#
    )
}

/// Posts a SOAP document, returning the status and raw body.
pub async fn post_soap(app: Router, path: &str, document: String) -> (StatusCode, Vec<u8>) {
    let request = Request::post(path)
        .header(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
        .header(header::USER_AGENT, "ENROLLClient")
        .body(Body::from(document))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

/// The parsed response envelope.
pub fn parse(document: &[u8]) -> Element {
    let envelope = Element::parse(document).unwrap();
    assert!(envelope.is(SOAP_ENVELOPE, "Envelope"));
    envelope
}

/// The first element within `s:Body`.
pub fn body_payload(envelope: &Element) -> &Element {
    &envelope.child(SOAP_ENVELOPE, "Body").unwrap().children()[0]
}

pub fn header_text<'a>(envelope: &'a Element, name: &str) -> &'a str {
    envelope
        .child(SOAP_ENVELOPE, "Header")
        .unwrap()
        .child_text(ADDRESSING, name)
        .unwrap()
}

pub fn fault(document: &[u8]) -> Fault {
    Fault::from_xml(document).unwrap()
}

/// A base64 PKCS#10 request, signed by a fresh 2048-bit key.
pub fn signed_request(common_name: &str) -> String {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let signer = SigningKey::<Sha256>::new(key);
    let subject = Name::from_str(&format!("CN={common_name}")).unwrap();
    let request = RequestBuilder::new(subject, &signer)
        .unwrap()
        .build::<rsa::pkcs1v15::Signature>()
        .unwrap();
    STANDARD.encode(request.to_der().unwrap())
}
