use super::namespaces::{ADDRESSING, ENROLLMENT, SOAP_CONTENT_TYPE, SOAP_ENVELOPE};
use super::xml::{Element, XmlError, XmlWriter};
use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt::Display;
use uuid::Uuid;

/// Sent verbatim when a fault itself cannot be serialized.
pub const FALLBACK_FAULT: &str = concat!(
    r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing">"#,
    r#"<s:Body><s:Fault><s:Code><s:Value>s:Receiver</s:Value><s:Subcode><s:Value>a:InternalServiceFault</s:Value></s:Subcode></s:Code>"#,
    r#"<s:Reason><s:Text xml:lang="en-US">HTTP 500: Internal Service Fault</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#
);

/// Top-level SOAP 1.2 fault code. Only these two are ever sent to a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultCode {
    Sender,
    Receiver,
}

impl FaultCode {
    pub const ALL: [FaultCode; 2] = [FaultCode::Sender, FaultCode::Receiver];

    pub fn as_str(self) -> &'static str {
        match self {
            FaultCode::Sender => "s:Sender",
            FaultCode::Receiver => "s:Receiver",
        }
    }

    /// Reads a code off the wire, coercing anything unknown to `s:Receiver`.
    pub fn from_wire(value: &str) -> FaultCode {
        FaultCode::ALL
            .into_iter()
            .find(|code| code.as_str() == value)
            .unwrap_or_else(|| {
                tracing::error!(value, "coercing unknown fault code to s:Receiver");
                FaultCode::Receiver
            })
    }

    pub fn status(self) -> StatusCode {
        match self {
            FaultCode::Sender => StatusCode::BAD_REQUEST,
            FaultCode::Receiver => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Fault subcodes understood by the Windows enrollment client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultSubcode {
    MessageFormat,
    Authentication,
    Authorization,
    CertificateRequest,
    EnrollmentServer,
    InternalServiceFault,
    InvalidSecurity,
    ActionMismatch,
    EndpointUnavailable,
}

impl FaultSubcode {
    pub const ALL: [FaultSubcode; 9] = [
        FaultSubcode::MessageFormat,
        FaultSubcode::Authentication,
        FaultSubcode::Authorization,
        FaultSubcode::CertificateRequest,
        FaultSubcode::EnrollmentServer,
        FaultSubcode::InternalServiceFault,
        FaultSubcode::InvalidSecurity,
        FaultSubcode::ActionMismatch,
        FaultSubcode::EndpointUnavailable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FaultSubcode::MessageFormat => "s:MessageFormat",
            FaultSubcode::Authentication => "s:Authentication",
            FaultSubcode::Authorization => "s:Authorization",
            FaultSubcode::CertificateRequest => "s:CertificateRequest",
            FaultSubcode::EnrollmentServer => "s:EnrollmentServer",
            FaultSubcode::InternalServiceFault => "a:InternalServiceFault",
            FaultSubcode::InvalidSecurity => "a:InvalidSecurity",
            FaultSubcode::ActionMismatch => "a:ActionMismatch",
            FaultSubcode::EndpointUnavailable => "a:EndpointUnavailable",
        }
    }

    /// Reads a subcode off the wire, coercing anything unknown to `s:EnrollmentServer`.
    pub fn from_wire(value: &str) -> FaultSubcode {
        FaultSubcode::ALL
            .into_iter()
            .find(|subcode| subcode.as_str() == value)
            .unwrap_or_else(|| {
                tracing::error!(value, "coercing unknown fault subcode to s:EnrollmentServer");
                FaultSubcode::EnrollmentServer
            })
    }
}

/// `ErrorType` values of a `DeviceEnrollmentServiceError` detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceErrorType {
    DeviceCapReached,
    DeviceNotSupported,
    NotSupported,
    NotEligibleToRenew,
    InMaintenance,
    UserLicense,
    InvalidEnrollmentData,
    EnrollmentServer,
}

impl DeviceErrorType {
    pub const ALL: [DeviceErrorType; 8] = [
        DeviceErrorType::DeviceCapReached,
        DeviceErrorType::DeviceNotSupported,
        DeviceErrorType::NotSupported,
        DeviceErrorType::NotEligibleToRenew,
        DeviceErrorType::InMaintenance,
        DeviceErrorType::UserLicense,
        DeviceErrorType::InvalidEnrollmentData,
        DeviceErrorType::EnrollmentServer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceErrorType::DeviceCapReached => "DeviceCapReached",
            DeviceErrorType::DeviceNotSupported => "DeviceNotSupported",
            DeviceErrorType::NotSupported => "NotSupported",
            DeviceErrorType::NotEligibleToRenew => "NotEligibleToRenew",
            DeviceErrorType::InMaintenance => "InMaintenance",
            DeviceErrorType::UserLicense => "UserLicense",
            DeviceErrorType::InvalidEnrollmentData => "InvalidEnrollmentData",
            DeviceErrorType::EnrollmentServer => "EnrollmentServer",
        }
    }

    /// Reads an error type off the wire.
    /// Empty means "no detail"; anything unknown is logged and dropped.
    pub fn from_wire(value: &str) -> Option<DeviceErrorType> {
        if value.is_empty() {
            return None;
        }
        let error_type = DeviceErrorType::ALL
            .into_iter()
            .find(|error_type| error_type.as_str() == value);
        if error_type.is_none() {
            tracing::error!(value, "dropping fault detail with unknown error type");
        }
        error_type
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultDetail {
    pub error_type: DeviceErrorType,
    pub message: String,
    pub trace_id: Option<String>,
}

/// A SOAP fault as returned to the enrollment client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    pub subcode: FaultSubcode,
    pub reason: String,
    pub detail: Option<FaultDetail>,
}

impl Fault {
    pub fn sender(subcode: FaultSubcode, reason: impl Into<String>) -> Self {
        Fault {
            code: FaultCode::Sender,
            subcode,
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn receiver(subcode: FaultSubcode, reason: impl Into<String>) -> Self {
        Fault {
            code: FaultCode::Receiver,
            subcode,
            reason: reason.into(),
            detail: None,
        }
    }

    /// A structurally invalid request.
    pub fn message_format(reason: impl Into<String>) -> Self {
        Fault::sender(FaultSubcode::MessageFormat, reason)
    }

    /// Logs `error` under a fresh trace ID and returns an opaque internal fault.
    /// The device only ever sees the trace ID.
    pub fn internal(error: impl Display) -> Self {
        let trace_id = Uuid::new_v4().to_string();
        tracing::error!(%trace_id, %error, "internal failure while handling enrollment request");

        Fault::receiver(
            FaultSubcode::InternalServiceFault,
            "The enrollment server encountered an internal error.",
        )
        .with_detail(
            DeviceErrorType::EnrollmentServer,
            "An internal error occurred.",
        )
        .with_trace_id(trace_id)
    }

    pub fn with_detail(mut self, error_type: DeviceErrorType, message: impl Into<String>) -> Self {
        let trace_id = self.detail.take().and_then(|detail| detail.trace_id);
        self.detail = Some(FaultDetail {
            error_type,
            message: message.into(),
            trace_id,
        });
        self
    }

    /// Attaches a trace ID. Without a detail there is nowhere to carry it.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        if let Some(detail) = self.detail.as_mut() {
            detail.trace_id = Some(trace_id.into());
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = XmlWriter::new();
        writer.start(
            "s:Envelope",
            &[("xmlns:s", SOAP_ENVELOPE), ("xmlns:a", ADDRESSING)],
        )?;
        writer.start("s:Body", &[])?;
        writer.start("s:Fault", &[])?;

        writer.start("s:Code", &[])?;
        writer.text_element("s:Value", &[], self.code.as_str())?;
        writer.start("s:Subcode", &[])?;
        writer.text_element("s:Value", &[], self.subcode.as_str())?;
        writer.end("s:Subcode")?;
        writer.end("s:Code")?;

        writer.start("s:Reason", &[])?;
        writer.text_element("s:Text", &[("xml:lang", "en-US")], &self.reason)?;
        writer.end("s:Reason")?;

        if let Some(detail) = &self.detail {
            writer.start("s:Detail", &[])?;
            writer.start("DeviceEnrollmentServiceError", &[("xmlns", ENROLLMENT)])?;
            writer.text_element("ErrorType", &[], detail.error_type.as_str())?;
            writer.text_element("Message", &[], &detail.message)?;
            if let Some(trace_id) = &detail.trace_id {
                writer.text_element("TraceID", &[], trace_id)?;
            }
            writer.end("DeviceEnrollmentServiceError")?;
            writer.end("s:Detail")?;
        }

        writer.end("s:Fault")?;
        writer.end("s:Body")?;
        writer.end("s:Envelope")?;
        Ok(writer.into_inner())
    }

    /// Decodes a fault document, coercing any value outside the known vocabulary.
    pub fn from_xml(document: &[u8]) -> Result<Fault, XmlError> {
        let envelope = Element::parse(document)?;
        let fault = envelope
            .child(SOAP_ENVELOPE, "Body")
            .and_then(|body| body.child(SOAP_ENVELOPE, "Fault"))
            .ok_or(XmlError::Empty)?;

        let code = fault.child(SOAP_ENVELOPE, "Code");
        let value = code
            .and_then(|code| code.child_text(SOAP_ENVELOPE, "Value"))
            .unwrap_or_default();
        let subcode = code
            .and_then(|code| code.child(SOAP_ENVELOPE, "Subcode"))
            .and_then(|subcode| subcode.child_text(SOAP_ENVELOPE, "Value"))
            .unwrap_or_default();
        let reason = fault
            .child(SOAP_ENVELOPE, "Reason")
            .and_then(|reason| reason.child_text(SOAP_ENVELOPE, "Text"))
            .unwrap_or_default();

        let detail = fault
            .child(SOAP_ENVELOPE, "Detail")
            .and_then(|detail| detail.child(ENROLLMENT, "DeviceEnrollmentServiceError"))
            .and_then(|error| {
                let error_type =
                    DeviceErrorType::from_wire(error.child_text(ENROLLMENT, "ErrorType")?)?;
                Some(FaultDetail {
                    error_type,
                    message: error
                        .child_text(ENROLLMENT, "Message")
                        .unwrap_or_default()
                        .to_string(),
                    trace_id: error
                        .child_text(ENROLLMENT, "TraceID")
                        .map(str::to_string),
                })
            });

        Ok(Fault {
            code: FaultCode::from_wire(value),
            subcode: FaultSubcode::from_wire(subcode),
            reason: reason.to_string(),
            detail,
        })
    }
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        tracing::warn!(
            code = self.code.as_str(),
            subcode = self.subcode.as_str(),
            reason = %self.reason,
            "responding with soap fault"
        );

        match self.to_xml() {
            Ok(body) => soap_response(self.status(), body),
            Err(err) => {
                tracing::error!(%err, "unable to serialize soap fault");
                soap_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    FALLBACK_FAULT.as_bytes().to_vec(),
                )
            }
        }
    }
}

/// Wraps a serialized envelope with the headers Windows expects.
pub fn soap_response(status: StatusCode, body: Vec<u8>) -> Response {
    let headers = [
        (header::CONTENT_TYPE, SOAP_CONTENT_TYPE.to_string()),
        (header::CONTENT_LENGTH, body.len().to_string()),
    ];
    (status, headers, body).into_response()
}
