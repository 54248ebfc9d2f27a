mod envelope;
mod extract;
mod fault;
pub mod namespaces;
mod verify;
mod xml;

pub use envelope::{
    RequestEnvelope, RequestHeader, ResponseHeader, SecurityHeader, SecurityTimestamp, respond,
    write_envelope,
};
pub use extract::{ENROLLMENT_USER_AGENT, SoapEnvelope, SoapRequest, is_soap_content_type};
pub use fault::{
    DeviceErrorType, FALLBACK_FAULT, Fault, FaultCode, FaultDetail, FaultSubcode, soap_response,
};
pub use verify::{Credentials, email_domain, is_valid_email, is_valid_message_id};
pub use xml::{Element, XmlError, XmlWriter};
