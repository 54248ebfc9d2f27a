use super::fault::{Fault, soap_response};
use super::namespaces::{ADDRESSING, SOAP_ENVELOPE, WSS_SECEXT, WSS_UTILITY};
use super::xml::{Element, XmlError, XmlWriter};
use axum::{http::StatusCode, response::Response};
use time::{Duration, OffsetDateTime, macros::format_description};
use uuid::Uuid;

/// WS-Security credentials presented in a request header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityHeader {
    pub binary_security_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Addressing and security fields common to every inbound envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHeader {
    pub action: String,
    pub message_id: String,
    pub reply_to: Option<String>,
    pub to: String,
    pub security: Option<SecurityHeader>,
}

impl RequestHeader {
    fn from_element(header: &Element) -> RequestHeader {
        let text = |name: &str| {
            header
                .child_text(ADDRESSING, name)
                .unwrap_or_default()
                .to_string()
        };

        let security = header.child(WSS_SECEXT, "Security").map(|security| {
            let username_token = security.child(WSS_SECEXT, "UsernameToken");
            SecurityHeader {
                binary_security_token: security
                    .child_text(WSS_SECEXT, "BinarySecurityToken")
                    .map(str::to_string),
                username: username_token
                    .and_then(|token| token.child_text(WSS_SECEXT, "Username"))
                    .map(str::to_string),
                password: username_token
                    .and_then(|token| token.child_text(WSS_SECEXT, "Password"))
                    .map(str::to_string),
            }
        });

        RequestHeader {
            action: text("Action"),
            message_id: text("MessageID"),
            reply_to: header
                .child(ADDRESSING, "ReplyTo")
                .and_then(|reply_to| reply_to.child_text(ADDRESSING, "Address"))
                .map(str::to_string),
            to: text("To"),
            security,
        }
    }
}

/// An inbound SOAP 1.2 envelope: its header plus the single body payload element.
#[derive(Clone, Debug)]
pub struct RequestEnvelope {
    pub header: RequestHeader,
    pub body: Element,
}

impl RequestEnvelope {
    pub fn parse(document: &[u8]) -> Result<RequestEnvelope, Fault> {
        let mut envelope = Element::parse(document).map_err(|err| {
            tracing::debug!(%err, "unable to decode request envelope");
            Fault::message_format("The request is not a well-formed SOAP envelope.")
        })?;

        if !envelope.is(SOAP_ENVELOPE, "Envelope") {
            return Err(Fault::message_format(
                "The request is not a SOAP 1.2 envelope.",
            ));
        }

        let Some(header) = envelope.child(SOAP_ENVELOPE, "Header") else {
            return Err(Fault::message_format("The request envelope has no header."));
        };
        let header = RequestHeader::from_element(header);

        let body = envelope
            .take_child(SOAP_ENVELOPE, "Body")
            .and_then(Element::into_first_child)
            .ok_or_else(|| Fault::message_format("The request envelope has no body."))?;

        Ok(RequestEnvelope { header, body })
    }
}

/// The `o:Security` timestamp required on WSTEP responses.
#[derive(Clone, Copy, Debug)]
pub struct SecurityTimestamp {
    pub created: OffsetDateTime,
    pub expires: OffsetDateTime,
}

impl SecurityTimestamp {
    /// Valid from now for five minutes.
    pub fn now() -> Self {
        let created = OffsetDateTime::now_utc();
        SecurityTimestamp {
            created,
            expires: created + Duration::minutes(5),
        }
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, XmlError> {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    Ok(timestamp.to_offset(time::UtcOffset::UTC).format(format)?)
}

/// Header of an outbound envelope.
#[derive(Clone, Debug)]
pub struct ResponseHeader<'a> {
    pub action: &'static str,
    pub activity_id: Uuid,
    pub relates_to: &'a str,
    pub timestamp: Option<SecurityTimestamp>,
}

impl<'a> ResponseHeader<'a> {
    pub fn new(action: &'static str, relates_to: &'a str) -> Self {
        ResponseHeader {
            action,
            activity_id: Uuid::new_v4(),
            relates_to,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: SecurityTimestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn write(&self, writer: &mut XmlWriter) -> Result<(), XmlError> {
        writer.start("s:Header", &[])?;
        writer.text_element("a:Action", &[("s:mustUnderstand", "1")], self.action)?;
        writer.text_element("a:ActivityID", &[], &self.activity_id.to_string())?;
        writer.text_element("a:RelatesTo", &[], self.relates_to)?;

        if let Some(timestamp) = &self.timestamp {
            writer.start(
                "o:Security",
                &[("xmlns:o", WSS_SECEXT), ("s:mustUnderstand", "1")],
            )?;
            writer.start("u:Timestamp", &[("u:Id", "_0")])?;
            writer.text_element("u:Created", &[], &format_timestamp(timestamp.created)?)?;
            writer.text_element("u:Expires", &[], &format_timestamp(timestamp.expires)?)?;
            writer.end("u:Timestamp")?;
            writer.end("o:Security")?;
        }

        writer.end("s:Header")
    }
}

/// Writes a complete response envelope, delegating the body payload to `body`.
///
/// The envelope declares `s`, `a` and `u`; `s:Body` declares `xsi` and `xsd`.
pub fn write_envelope<F>(header: &ResponseHeader<'_>, body: F) -> Result<Vec<u8>, XmlError>
where
    F: FnOnce(&mut XmlWriter) -> Result<(), XmlError>,
{
    let mut writer = XmlWriter::new();
    writer.start(
        "s:Envelope",
        &[
            ("xmlns:s", SOAP_ENVELOPE),
            ("xmlns:a", ADDRESSING),
            ("xmlns:u", WSS_UTILITY),
        ],
    )?;
    header.write(&mut writer)?;
    writer.start(
        "s:Body",
        &[
            ("xmlns:xsi", super::namespaces::XSI),
            ("xmlns:xsd", super::namespaces::XSD),
        ],
    )?;
    body(&mut writer)?;
    writer.end("s:Body")?;
    writer.end("s:Envelope")?;
    Ok(writer.into_inner())
}

/// Turns a serialized envelope into a 200 response, or an internal fault.
pub fn respond(envelope: Result<Vec<u8>, XmlError>) -> Response {
    use axum::response::IntoResponse;

    match envelope {
        Ok(body) => soap_response(StatusCode::OK, body),
        Err(err) => Fault::internal(err).into_response(),
    }
}
