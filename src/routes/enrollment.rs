use super::auth::authenticate;
use crate::app_state::AppState;
use crate::certificates::{CertificateError, IssuedCertificate};
use crate::devices::{CertificateSummary, Device, Hardware, PROTOCOL_WINDOWS, WindowsDetails};
use crate::payloads::{DEVICE_ENROLLMENT, ProvisioningProfile};
use crate::soap::{
    DeviceErrorType, Element, Fault, FaultSubcode, ResponseHeader, SecurityTimestamp,
    SoapEnvelope, SoapRequest, XmlError, XmlWriter,
    namespaces::{
        ACTION_REQUEST_SECURITY_TOKEN, ACTION_REQUEST_SECURITY_TOKEN_RESPONSE,
        AUTHORIZATION_CONTEXT, ENCODING_TYPE_BASE64, ENROLLMENT, REQUEST_TYPE_ISSUE,
        TOKEN_TYPE_DEVICE_ENROLLMENT, VALUE_TYPE_PKCS10, VALUE_TYPE_PROVISION_DOC, WS_TRUST,
        WSS_SECEXT,
    },
    respond, write_envelope,
};
use axum::{extract::State, response::Response};
use base64::{Engine, engine::general_purpose::STANDARD};
use time::OffsetDateTime;
use uuid::Uuid;

pub const MANAGEMENT_SERVICE_PATH: &str = "/ManagementServer/MDM.svc";

/// The `wst:RequestSecurityToken` body.
#[derive(Clone, Debug, Default)]
pub struct EnrollmentRequest {
    /// Base64 PKCS#10 request.
    pub csr: String,
    /// `ac:ContextItem` name/value pairs, in document order.
    pub context: Vec<(String, String)>,
}

impl EnrollmentRequest {
    /// The first context item with this name.
    pub fn context_item(&self, name: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Every value given for a context item that may repeat.
    pub fn context_items<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.context
            .iter()
            .filter(move |(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }

    fn device_id(&self) -> &str {
        self.context_item("DeviceID").unwrap_or_default()
    }

    fn enrollment_type(&self) -> &str {
        self.context_item("EnrollmentType").unwrap_or_default()
    }
}

impl SoapRequest for EnrollmentRequest {
    const ACTION: &'static str = ACTION_REQUEST_SECURITY_TOKEN;
    const REQUIRES_AUTH: bool = true;

    fn from_body(body: &Element) -> Result<Self, Fault> {
        if !body.is(WS_TRUST, "RequestSecurityToken") {
            return Err(Fault::message_format(
                "The body does not hold a RequestSecurityToken.",
            ));
        }
        if body.child_text(WS_TRUST, "TokenType") != Some(TOKEN_TYPE_DEVICE_ENROLLMENT) {
            return Err(Fault::message_format("The TokenType is not supported."));
        }
        if body.child_text(WS_TRUST, "RequestType") != Some(REQUEST_TYPE_ISSUE) {
            return Err(Fault::message_format("The RequestType is not supported."));
        }

        let token = body
            .child(WSS_SECEXT, "BinarySecurityToken")
            .filter(|token| token.attribute("ValueType") == Some(VALUE_TYPE_PKCS10))
            .ok_or_else(|| Fault::message_format("A PKCS#10 request must be supplied."))?;
        if token.text().is_empty() {
            return Err(Fault::message_format("The PKCS#10 request is empty."));
        }

        let context = body
            .child(AUTHORIZATION_CONTEXT, "AdditionalContext")
            .map(|additional| {
                additional
                    .children_named(AUTHORIZATION_CONTEXT, "ContextItem")
                    .filter_map(|item| {
                        let name = item.attribute("Name")?;
                        let value = item
                            .child_text(AUTHORIZATION_CONTEXT, "Value")
                            .unwrap_or_default();
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let request = EnrollmentRequest {
            csr: token.text().to_string(),
            context,
        };
        if request.context_item("DeviceID").is_none()
            || request.context_item("EnrollmentType").is_none()
        {
            return Err(Fault::message_format("Required enrollment context is missing.")
                .with_detail(
                    DeviceErrorType::InvalidEnrollmentData,
                    "DeviceID and EnrollmentType must be supplied.",
                ));
        }

        Ok(request)
    }
}

/// Handles the WSTEP RequestSecurityToken operation.
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-wstep/
pub async fn enroll(
    State(state): State<AppState>,
    request: SoapEnvelope<EnrollmentRequest>,
) -> Result<Response, Fault> {
    let settings = state.settings.get();
    request
        .header
        .verify_context(&state.enrollment_domains(&settings))?;
    let user = authenticate(&state, request.credentials).await?;

    let body = request.body;
    let common_name = if body.enrollment_type() == DEVICE_ENROLLMENT {
        body.device_id().to_string()
    } else {
        user.clone()
    };

    // Signing and identity generation are CPU bound.
    let certificates = state.certificates.clone();
    let csr = body.csr.clone();
    let (issued, identity) = tokio::task::spawn_blocking(move || {
        let issued = certificates.sign_csr(&csr, &common_name)?;
        let identity = certificates.identity()?;
        Ok::<_, CertificateError>((issued, identity))
    })
    .await
    .map_err(Fault::internal)?
    .map_err(certificate_fault)?;

    let device = build_device(&body, &user, &issued);
    let profile = ProvisioningProfile {
        identity_der: identity.certificate_der(),
        identity_fingerprint: identity.fingerprint(),
        client_der: &issued.der,
        client_fingerprint: &issued.fingerprint,
        device: &device,
        settings: &settings,
        provider_id: &state.config.service.provider_id,
        management_url: state.service_url(MANAGEMENT_SERVICE_PATH),
        fallback_website: format!("https://{}", state.config.service.primary_domain),
    };
    let provisioning = profile.build().to_xml().map_err(Fault::internal)?;

    // Only record devices whose enrollment is about to succeed.
    let devices = state.devices.clone();
    let record = device.clone();
    match tokio::task::spawn_blocking(move || devices.create(&record)).await {
        Ok(Ok(())) => {}
        // The certificate is already signed, so the device still gets it.
        Ok(Err(err)) => {
            tracing::error!(device = %device.id, error = %err, "unable to record enrolled device")
        }
        Err(err) => {
            tracing::error!(device = %device.id, error = %err, "device record task failed")
        }
    }

    tracing::info!(
        device = %device.id,
        %user,
        enrollment_type = %device.windows.enrollment_type,
        "enrolled device"
    );

    let header = ResponseHeader::new(
        ACTION_REQUEST_SECURITY_TOKEN_RESPONSE,
        &request.header.message_id,
    )
    .with_timestamp(SecurityTimestamp::now());
    let token = STANDARD.encode(provisioning);
    Ok(respond(write_envelope(&header, |writer| {
        write_token_response(writer, &token)
    })))
}

fn certificate_fault(err: CertificateError) -> Fault {
    match err {
        CertificateError::MalformedCsr(_) | CertificateError::InvalidCsrSignature => {
            tracing::warn!(error = %err, "rejected certificate request");
            Fault::receiver(
                FaultSubcode::CertificateRequest,
                "The certificate request could not be processed.",
            )
        }
        err => Fault::internal(err),
    }
}

fn build_device(body: &EnrollmentRequest, user: &str, issued: &IssuedCertificate) -> Device {
    let text = |name: &str| body.context_item(name).map(str::to_string);

    Device {
        id: Uuid::new_v4(),
        display_name: body
            .context_item("DeviceName")
            .unwrap_or(body.device_id())
            .to_string(),
        protocol: PROTOCOL_WINDOWS.to_string(),
        enrolled_at: OffsetDateTime::now_utc(),
        enrolled_by: user.to_string(),
        hardware: Hardware {
            id: text("HWDevID"),
            mac_addresses: body.context_items("MAC").map(str::to_string).collect(),
        },
        windows: WindowsDetails {
            device_id: body.device_id().to_string(),
            device_type: text("DeviceType"),
            enrollment_type: body.enrollment_type().to_string(),
            os_edition: text("OSEdition"),
            os_version: text("OSVersion"),
            application_version: text("ApplicationVersion"),
        },
        certificate: CertificateSummary {
            subject: issued.certificate.tbs_certificate.subject.to_string(),
            hash: issued.fingerprint.clone(),
            not_before: issued.not_before,
            not_after: issued.not_after,
        },
    }
}

fn write_token_response(writer: &mut XmlWriter, token: &str) -> Result<(), XmlError> {
    writer.start(
        "RequestSecurityTokenResponseCollection",
        &[("xmlns", WS_TRUST)],
    )?;
    writer.start("RequestSecurityTokenResponse", &[])?;
    writer.text_element("TokenType", &[], TOKEN_TYPE_DEVICE_ENROLLMENT)?;
    writer.empty("DispositionMessage", &[("xmlns", ENROLLMENT)])?;

    writer.start("RequestedSecurityToken", &[])?;
    writer.text_element(
        "BinarySecurityToken",
        &[
            ("ValueType", VALUE_TYPE_PROVISION_DOC),
            ("EncodingType", ENCODING_TYPE_BASE64),
            ("xmlns", WSS_SECEXT),
        ],
        token,
    )?;
    writer.end("RequestedSecurityToken")?;

    writer.text_element("RequestID", &[("xmlns", ENROLLMENT)], "0")?;
    writer.end("RequestSecurityTokenResponse")?;
    writer.end("RequestSecurityTokenResponseCollection")
}
