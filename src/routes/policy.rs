use super::auth::authenticate;
use crate::app_state::AppState;
use crate::certificates::{CLIENT_VALIDITY, MIN_KEY_BITS, RENEWAL_PERIOD};
use crate::soap::{
    Element, Fault, ResponseHeader, SoapEnvelope, SoapRequest, XmlError, XmlWriter,
    namespaces::{ACTION_GET_POLICIES, ACTION_GET_POLICIES_RESPONSE, ENROLLMENT_POLICY},
    respond, write_envelope,
};
use axum::{extract::State, response::Response};

const NEXT_UPDATE_HOURS: &str = "12";
const POLICY_SCHEMA: &str = "3";
const MAJOR_REVISION: &str = "101";
const MINOR_REVISION: &str = "0";

/// The `GetPolicies` body. Only what we log is kept.
#[derive(Clone, Debug, Default)]
pub struct GetPoliciesRequest {
    pub last_update: Option<String>,
    pub preferred_language: Option<String>,
}

impl SoapRequest for GetPoliciesRequest {
    const ACTION: &'static str = ACTION_GET_POLICIES;
    const REQUIRES_AUTH: bool = true;

    fn from_body(body: &Element) -> Result<Self, Fault> {
        if !body.is(ENROLLMENT_POLICY, "GetPolicies") {
            return Err(Fault::message_format(
                "The body does not hold a GetPolicies request.",
            ));
        }

        let client = body.child(ENROLLMENT_POLICY, "client");
        let text = |name: &str| {
            client
                .and_then(|client| client.child_text(ENROLLMENT_POLICY, name))
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Ok(GetPoliciesRequest {
            last_update: text("lastUpdate"),
            preferred_language: text("preferredLanguage"),
        })
    }
}

/// The single certificate policy we hand to every client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificatePolicy {
    pub policy_id: String,
    pub friendly_name: String,
    pub common_name: String,
    pub validity_seconds: u64,
    pub renewal_seconds: u64,
    pub minimal_key_length: usize,
}

impl CertificatePolicy {
    fn write(&self, writer: &mut XmlWriter) -> Result<(), XmlError> {
        writer.start("GetPoliciesResponse", &[("xmlns", ENROLLMENT_POLICY)])?;
        writer.start("response", &[])?;
        writer.text_element("policyID", &[], &self.policy_id)?;
        writer.text_element("policyFriendlyName", &[], &self.friendly_name)?;
        writer.text_element("nextUpdateHours", &[], NEXT_UPDATE_HOURS)?;
        // We keep no record of what a client last saw.
        writer.text_element("policiesNotChanged", &[], "false")?;

        writer.start("policies", &[])?;
        writer.start("policy", &[])?;
        writer.text_element("policyOIDReference", &[], "0")?;
        writer.nil("cAs")?;
        self.write_attributes(writer)?;
        writer.end("policy")?;
        writer.end("policies")?;

        writer.end("response")?;
        writer.nil("cAs")?;
        writer.nil("oIDs")?;
        writer.end("GetPoliciesResponse")
    }

    fn write_attributes(&self, writer: &mut XmlWriter) -> Result<(), XmlError> {
        writer.start("attributes", &[])?;
        writer.text_element("commonName", &[], &self.common_name)?;
        writer.text_element("policySchema", &[], POLICY_SCHEMA)?;

        writer.start("certificateValidity", &[])?;
        writer.text_element(
            "validityPeriodSeconds",
            &[],
            &self.validity_seconds.to_string(),
        )?;
        writer.text_element(
            "renewalPeriodSeconds",
            &[],
            &self.renewal_seconds.to_string(),
        )?;
        writer.end("certificateValidity")?;

        writer.start("permission", &[])?;
        writer.text_element("enroll", &[], "true")?;
        writer.text_element("autoEnroll", &[], "false")?;
        writer.end("permission")?;

        writer.start("privateKeyAttributes", &[])?;
        writer.text_element(
            "minimalKeyLength",
            &[],
            &self.minimal_key_length.to_string(),
        )?;
        for name in [
            "keySpec",
            "keyUsageProperty",
            "permissions",
            "algorithmOIDReference",
            "cryptoProviders",
        ] {
            writer.nil(name)?;
        }
        writer.end("privateKeyAttributes")?;

        writer.start("revision", &[])?;
        writer.text_element("majorRevision", &[], MAJOR_REVISION)?;
        writer.text_element("minorRevision", &[], MINOR_REVISION)?;
        writer.end("revision")?;

        for name in [
            "supersededPolicies",
            "privateKeyFlags",
            "subjectNameFlags",
            "enrollmentFlags",
            "generalFlags",
        ] {
            writer.nil(name)?;
        }
        writer.text_element("hashAlgorithmOIDReference", &[], "0")?;
        for name in ["rARequirements", "keyArchivalAttributes", "extensions"] {
            writer.nil(name)?;
        }

        writer.end("attributes")
    }
}

/// Handles the MS-XCEP GetPolicies operation.
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-xcep/
pub async fn get_policies(
    State(state): State<AppState>,
    request: SoapEnvelope<GetPoliciesRequest>,
) -> Result<Response, Fault> {
    let settings = state.settings.get();
    request
        .header
        .verify_context(&state.enrollment_domains(&settings))?;
    let user = authenticate(&state, request.credentials).await?;

    let certificates = state.certificates.clone();
    let identity = tokio::task::spawn_blocking(move || certificates.identity())
        .await
        .map_err(Fault::internal)?
        .map_err(Fault::internal)?;

    let policy = CertificatePolicy {
        policy_id: identity.fingerprint().to_string(),
        friendly_name: settings.tenant.name.clone(),
        common_name: state.config.service.provider_id.clone(),
        validity_seconds: CLIENT_VALIDITY.as_secs(),
        renewal_seconds: RENEWAL_PERIOD.as_secs(),
        minimal_key_length: MIN_KEY_BITS,
    };
    tracing::info!(
        %user,
        last_update = request.body.last_update.as_deref(),
        "answered policy request"
    );

    let header = ResponseHeader::new(ACTION_GET_POLICIES_RESPONSE, &request.header.message_id);
    Ok(respond(write_envelope(&header, |writer| policy.write(writer))))
}
