mod common;

use axum::http::StatusCode;
use base64::{Engine, engine::general_purpose::STANDARD};
use common::*;
use std::sync::{Arc, Mutex};
use windows_mdm_server::database::StoreError;
use windows_mdm_server::devices::{Device, DeviceStore};
use windows_mdm_server::soap::{
    DeviceErrorType, Element, FaultCode, FaultSubcode,
    namespaces::{
        ACTION_REQUEST_SECURITY_TOKEN, ACTION_REQUEST_SECURITY_TOKEN_RESPONSE,
        AUTHORIZATION_CONTEXT, REQUEST_TYPE_ISSUE, TOKEN_TYPE_DEVICE_ENROLLMENT,
        VALUE_TYPE_PKCS10, VALUE_TYPE_PROVISION_DOC, WS_TRUST, WSS_SECEXT,
    },
};

const PATH: &str = "/EnrollmentServer/Enrollment.svc";
const DEVICE_ID: &str = "6D4E5D6E8B1A4A1C9E2F3A4B5C6D7E8F";

#[derive(Default)]
struct RecordingDevices {
    devices: Mutex<Vec<Device>>,
    fail: bool,
}

impl DeviceStore for RecordingDevices {
    fn create(&self, device: &Device) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Corrupt("disk full".to_string()));
        }
        self.devices.lock().unwrap().push(device.clone());
        Ok(())
    }
}

fn context(items: &[(&str, &str)]) -> String {
    items
        .iter()
        .map(|(name, value)| {
            format!(r#"<ac:ContextItem Name="{name}"><ac:Value>{value}</ac:Value></ac:ContextItem>"#)
        })
        .collect()
}

fn request_security_token(security: &str, csr: &str, enrollment_type: &str) -> String {
    let items = context(&[
        ("UXInitiated", "true"),
        ("HWDevID", "A1B2C3"),
        ("Locale", "en-US"),
        ("TargetedUserLoggedIn", "true"),
        ("OSEdition", "48"),
        ("DeviceName", "DESKTOP-ACME01"),
        ("MAC", "00-15-5D-00-01-02"),
        ("MAC", "00-15-5D-00-01-03"),
        ("DeviceID", DEVICE_ID),
        ("EnrollmentType", enrollment_type),
        ("DeviceType", "CIMClient_Windows"),
        ("OSVersion", "10.0.22631.2506"),
        ("ApplicationVersion", "10.0.22631.2506"),
    ]);
    let body = format!(
        r#"<wst:RequestSecurityToken xmlns:wst="{WS_TRUST}"><wst:TokenType>{TOKEN_TYPE_DEVICE_ENROLLMENT}</wst:TokenType><wst:RequestType>{REQUEST_TYPE_ISSUE}</wst:RequestType><wsse:BinarySecurityToken ValueType="{VALUE_TYPE_PKCS10}" EncodingType="{WSS_SECEXT}#base64binary" xmlns:wsse="{WSS_SECEXT}">{csr}</wsse:BinarySecurityToken><ac:AdditionalContext xmlns:ac="{AUTHORIZATION_CONTEXT}">{items}</ac:AdditionalContext></wst:RequestSecurityToken>"#
    );
    envelope(ACTION_REQUEST_SECURITY_TOKEN, ENROLLMENT_TO, security, &body)
}

/// The decoded provisioning document carried in a WSTEP response.
fn provisioning_document(envelope: &Element) -> Element {
    let token = body_payload(envelope)
        .child(WS_TRUST, "RequestSecurityTokenResponse")
        .and_then(|response| response.child(WS_TRUST, "RequestedSecurityToken"))
        .and_then(|requested| requested.child(WSS_SECEXT, "BinarySecurityToken"))
        .unwrap();
    assert_eq!(token.attribute("ValueType"), Some(VALUE_TYPE_PROVISION_DOC));

    let document = STANDARD.decode(token.text()).unwrap();
    Element::parse(&document).unwrap()
}

/// Follows `characteristic type=...` elements down a path.
fn characteristic<'a>(mut element: &'a Element, path: &[&str]) -> &'a Element {
    for kind in path {
        element = element
            .children()
            .iter()
            .find(|child| child.name == "characteristic" && child.attribute("type") == Some(*kind))
            .unwrap_or_else(|| panic!("no characteristic {kind}"));
    }
    element
}

fn parm<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    element
        .children()
        .iter()
        .find(|child| child.name == "parm" && child.attribute("name") == Some(name))
        .and_then(|parm| parm.attribute("value"))
}

/// The only characteristic nested directly under `element`.
fn only_child(element: &Element) -> &Element {
    let children: Vec<_> = element
        .children()
        .iter()
        .filter(|child| child.name == "characteristic")
        .collect();
    assert_eq!(children.len(), 1);
    children[0]
}

#[tokio::test]
async fn device_enrollment_end_to_end() {
    let mut state = state("OnPremise");
    let devices = Arc::new(RecordingDevices::default());
    state.devices = devices.clone();

    let document = request_security_token(
        &username_security(USER, PASSWORD),
        &signed_request("ignored"),
        "Device",
    );
    let (status, body) = post_soap(app(&state), PATH, document).await;
    assert_eq!(status, StatusCode::OK);

    let envelope = parse(&body);
    assert_eq!(
        header_text(&envelope, "Action"),
        ACTION_REQUEST_SECURITY_TOKEN_RESPONSE
    );

    let wap = provisioning_document(&envelope);
    assert_eq!(wap.name, "wap-provisioningdoc");
    assert_eq!(wap.attribute("version"), Some("1.1"));

    let identity = state.certificates.identity().unwrap();
    let root = characteristic(&wap, &["CertificateStore", "Root", "System"]);
    assert_eq!(only_child(root).attribute("type"), Some(identity.fingerprint()));

    let client_store = characteristic(&wap, &["CertificateStore", "My", "System"]);
    let client = client_store
        .children()
        .iter()
        .find(|child| child.attribute("type") != Some("PrivateKeyContainer"))
        .unwrap();
    let encoded = parm(client, "EncodedCertificate").unwrap();
    // Device certificates are named after the device, not the user.
    assert_eq!(
        state.certificates.verify_issued_certificate(encoded).as_deref(),
        Some(DEVICE_ID)
    );

    let machine = characteristic(&wap, &["Registry", r"HKLM\Security\MachineEnrollment"]);
    assert_eq!(parm(machine, "RenewalPeriod"), Some("14"));

    let application = characteristic(&wap, &["APPLICATION"]);
    assert_eq!(
        parm(application, "ADDR"),
        Some("https://mdm.acme.test/ManagementServer/MDM.svc")
    );
    assert_eq!(parm(application, "NAME"), Some("Acme"));

    let recorded = devices.devices.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    let device = &recorded[0];
    assert_eq!(device.display_name, "DESKTOP-ACME01");
    assert_eq!(device.protocol, "windows");
    assert_eq!(device.enrolled_by, USER);
    assert_eq!(device.hardware.id.as_deref(), Some("A1B2C3"));
    assert_eq!(
        device.hardware.mac_addresses,
        vec!["00-15-5D-00-01-02", "00-15-5D-00-01-03"]
    );
    assert_eq!(device.windows.device_id, DEVICE_ID);
    assert_eq!(device.windows.os_version.as_deref(), Some("10.0.22631.2506"));
    assert_eq!(device.certificate.hash, client.attribute("type").unwrap());

    let provider = characteristic(&wap, &["DMClient", "Provider", "WindowsMDMServer"]);
    assert_eq!(
        parm(provider, "EntDMID").map(str::to_string),
        Some(device.id.to_string())
    );
}

#[tokio::test]
async fn user_enrollment_uses_the_user_store() {
    let state = state("OnPremise");
    let document = request_security_token(
        &username_security(USER, PASSWORD),
        &signed_request("ignored"),
        "Full",
    );
    let (status, body) = post_soap(app(&state), PATH, document).await;
    assert_eq!(status, StatusCode::OK);

    let wap = provisioning_document(&parse(&body));
    let client = characteristic(&wap, &["CertificateStore", "My", "User"])
        .children()
        .iter()
        .find(|child| child.attribute("type") != Some("PrivateKeyContainer"))
        .unwrap();
    let encoded = parm(client, "EncodedCertificate").unwrap();
    // User certificates are named after the user.
    assert_eq!(
        state.certificates.verify_issued_certificate(encoded).as_deref(),
        Some(USER)
    );
    assert!(
        wap.children()
            .iter()
            .all(|child| child.attribute("type") != Some("Registry"))
    );
}

#[tokio::test]
async fn persistence_failure_still_provisions() {
    let mut state = state("OnPremise");
    state.devices = Arc::new(RecordingDevices {
        fail: true,
        ..Default::default()
    });

    let document = request_security_token(
        &username_security(USER, PASSWORD),
        &signed_request("ignored"),
        "Device",
    );
    let (status, _) = post_soap(app(&state), PATH, document).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.certificates.issued_count(), 1);
}

#[tokio::test]
async fn forged_requests_are_refused() {
    let mut state = state("OnPremise");
    let devices = Arc::new(RecordingDevices::default());
    state.devices = devices.clone();
    let mut csr = STANDARD.decode(signed_request("device")).unwrap();
    let last = csr.len() - 1;
    csr[last] ^= 0x01;

    let document = request_security_token(
        &username_security(USER, PASSWORD),
        &STANDARD.encode(csr),
        "Device",
    );
    let (status, body) = post_soap(app(&state), PATH, document).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let fault = fault(&body);
    assert_eq!(fault.code, FaultCode::Receiver);
    assert_eq!(fault.subcode, FaultSubcode::CertificateRequest);
    assert_eq!(state.certificates.issued_count(), 0);
    assert!(devices.devices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_device_id_is_invalid_enrollment_data() {
    let state = state("OnPremise");
    let document = request_security_token(
        &username_security(USER, PASSWORD),
        &signed_request("device"),
        "Device",
    )
    .replace(r#"Name="DeviceID""#, r#"Name="SomethingElse""#);
    let (status, body) = post_soap(app(&state), PATH, document).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let fault = fault(&body);
    assert_eq!(fault.subcode, FaultSubcode::MessageFormat);
    assert_eq!(
        fault.detail.unwrap().error_type,
        DeviceErrorType::InvalidEnrollmentData
    );
}

#[tokio::test]
async fn bad_credentials_issue_nothing() {
    let state = state("OnPremise");
    let document = request_security_token(
        &username_security(USER, "wrong"),
        &signed_request("device"),
        "Device",
    );
    let (status, body) = post_soap(app(&state), PATH, document).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(fault(&body).subcode, FaultSubcode::Authentication);
    assert_eq!(state.certificates.issued_count(), 0);
}

#[tokio::test]
async fn issued_certificates_authenticate_renewals() {
    let mut state = state("OnPremise");
    let document = request_security_token(
        &username_security(USER, PASSWORD),
        &signed_request("ignored"),
        "Full",
    );
    let (_, body) = post_soap(app(&state), PATH, document).await;
    let wap = provisioning_document(&parse(&body));
    let client = characteristic(&wap, &["CertificateStore", "My", "User"])
        .children()
        .iter()
        .find(|child| child.attribute("type") != Some("PrivateKeyContainer"))
        .unwrap();
    let certificate = parm(client, "EncodedCertificate").unwrap().to_string();

    let mut settings = state.settings.get();
    settings.windows.auth_policy = windows_mdm_server::settings::AuthPolicy::Certificate;
    state.update_settings(settings).unwrap();
    let devices = Arc::new(RecordingDevices::default());
    state.devices = devices.clone();

    let document = request_security_token(
        &token_security(&certificate),
        &signed_request("ignored"),
        "Full",
    );
    let (status, _) = post_soap(app(&state), PATH, document).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices.devices.lock().unwrap()[0].enrolled_by, USER);
}

#[tokio::test]
async fn the_management_endpoint_also_enrolls() {
    let state = state("OnPremise");
    let document = request_security_token(
        &username_security(USER, PASSWORD),
        &signed_request("ignored"),
        "Device",
    )
    .replace(
        ENROLLMENT_TO,
        "https://mdm.acme.test/ManagementServer/MDM.svc",
    );
    let (status, _) = post_soap(app(&state), "/ManagementServer/MDM.svc", document).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.certificates.issued_count(), 1);
}
