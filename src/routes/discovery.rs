use crate::app_state::AppState;
use crate::settings::{AuthPolicy, Settings};
use crate::soap::{
    DeviceErrorType, Element, Fault, FaultSubcode, ResponseHeader, SoapEnvelope, SoapRequest,
    XmlError, XmlWriter, email_domain, is_valid_email,
    namespaces::{ACTION_DISCOVER, ACTION_DISCOVER_RESPONSE, DISCOVERY},
    respond, write_envelope,
};
use axum::{extract::State, http::StatusCode, response::Response};

/// The only MS-MDE2 protocol version we speak.
pub const ENROLLMENT_VERSION: &str = "4.0";
pub const DEVICE_TYPE_WINDOWS: &str = "CIMClient_Windows";

pub const POLICY_SERVICE_PATH: &str = "/EnrollmentServer/Policy.svc";
pub const ENROLLMENT_SERVICE_PATH: &str = "/EnrollmentServer/Enrollment.svc";
pub const AUTHENTICATION_SERVICE_PATH: &str = "/EnrollmentServer/Authenticate";

/// The `Discover/request` body.
#[derive(Clone, Debug, Default)]
pub struct DiscoverRequest {
    pub email_address: String,
    pub request_version: String,
    pub device_type: Option<String>,
    pub application_version: Option<String>,
    pub os_edition: Option<String>,
    pub auth_policies: Vec<String>,
}

impl SoapRequest for DiscoverRequest {
    const ACTION: &'static str = ACTION_DISCOVER;
    const REQUIRES_AUTH: bool = false;

    fn from_body(body: &Element) -> Result<Self, Fault> {
        let request = body
            .is(DISCOVERY, "Discover")
            .then(|| body.child(DISCOVERY, "request"))
            .flatten()
            .ok_or_else(|| Fault::message_format("The body does not hold a Discover request."))?;

        let text = |name: &str| {
            request
                .child_text(DISCOVERY, name)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let auth_policies = request
            .child(DISCOVERY, "AuthPolicies")
            .map(|policies| {
                policies
                    .children_named(DISCOVERY, "AuthPolicy")
                    .map(|policy| policy.text().to_string())
                    .collect()
            })
            .unwrap_or_default();

        Ok(DiscoverRequest {
            email_address: text("EmailAddress").unwrap_or_default(),
            request_version: text("RequestVersion").unwrap_or_default(),
            device_type: text("DeviceType"),
            application_version: text("ApplicationVersion"),
            os_edition: text("OSEdition"),
            auth_policies,
        })
    }
}

/// The `DiscoverResult` we hand back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoverResult {
    pub auth_policy: AuthPolicy,
    pub enrollment_version: String,
    pub enrollment_policy_service_url: String,
    pub enrollment_service_url: String,
    pub authentication_service_url: Option<String>,
}

impl DiscoverResult {
    fn write(&self, writer: &mut XmlWriter) -> Result<(), XmlError> {
        writer.start("DiscoverResponse", &[("xmlns", DISCOVERY)])?;
        writer.start("DiscoverResult", &[])?;
        writer.text_element("AuthPolicy", &[], self.auth_policy.as_str())?;
        writer.text_element("EnrollmentVersion", &[], &self.enrollment_version)?;
        writer.text_element(
            "EnrollmentPolicyServiceUrl",
            &[],
            &self.enrollment_policy_service_url,
        )?;
        writer.text_element("EnrollmentServiceUrl", &[], &self.enrollment_service_url)?;
        if let Some(url) = &self.authentication_service_url {
            writer.text_element("AuthenticationServiceUrl", &[], url)?;
        }
        writer.end("DiscoverResult")?;
        writer.end("DiscoverResponse")
    }
}

/// Windows probes the discovery endpoint with a bare GET before posting to it.
pub async fn probe() -> StatusCode {
    StatusCode::OK
}

/// Handles the MS-MDE2 Discover operation.
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-mde2/
pub async fn discover(
    State(state): State<AppState>,
    request: SoapEnvelope<DiscoverRequest>,
) -> Result<Response, Fault> {
    let settings = state.settings.get();
    request
        .header
        .verify_context(&state.enrollment_domains(&settings))?;

    let result = resolve(&state, &settings, &request.body)?;
    tracing::info!(
        email = %request.body.email_address,
        policy = %result.auth_policy,
        "answered discovery"
    );

    let header = ResponseHeader::new(ACTION_DISCOVER_RESPONSE, &request.header.message_id);
    Ok(respond(write_envelope(&header, |writer| {
        result.write(writer)
    })))
}

/// Checks the body against our tenant and decides how the device should enroll.
fn resolve(
    state: &AppState,
    settings: &Settings,
    body: &DiscoverRequest,
) -> Result<DiscoverResult, Fault> {
    if !is_valid_email(&body.email_address) {
        return Err(Fault::message_format(
            "The EmailAddress is missing or malformed.",
        ));
    }

    let manages_domain = email_domain(&body.email_address)
        .is_some_and(|domain| settings.manages_domain(&domain));
    if !manages_domain {
        return Err(Fault::sender(
            FaultSubcode::InternalServiceFault,
            "This account is not managed by this server.",
        )
        .with_detail(
            DeviceErrorType::NotSupported,
            "The email domain is not managed by this server.",
        ));
    }

    let device_type_supported = body
        .device_type
        .as_deref()
        .is_none_or(|device_type| device_type == DEVICE_TYPE_WINDOWS);
    if body.request_version != ENROLLMENT_VERSION || !device_type_supported {
        return Err(device_not_supported(
            "This device or protocol version is not supported.",
        ));
    }

    // Policies we don't know of can't match ours, so they are ignored.
    let auth_policy = settings.windows.auth_policy;
    let offers_ours = body
        .auth_policies
        .iter()
        .any(|name| AuthPolicy::from_name(name) == Some(auth_policy));
    if !body.auth_policies.is_empty() && !offers_ours {
        return Err(device_not_supported(
            "The device does not support the required AuthPolicy.",
        ));
    }

    let authentication_service_url = (auth_policy == AuthPolicy::Federated).then(|| {
        settings
            .windows
            .federation_portal_url
            .clone()
            .unwrap_or_else(|| state.service_url(AUTHENTICATION_SERVICE_PATH))
    });

    Ok(DiscoverResult {
        auth_policy,
        enrollment_version: body.request_version.clone(),
        enrollment_policy_service_url: state.service_url(POLICY_SERVICE_PATH),
        enrollment_service_url: state.service_url(ENROLLMENT_SERVICE_PATH),
        authentication_service_url,
    })
}

fn device_not_supported(message: &str) -> Fault {
    Fault::sender(FaultSubcode::InternalServiceFault, message)
        .with_detail(DeviceErrorType::DeviceNotSupported, message)
}
