use super::{
    CertificateError,
    cert_verify::{SignatureMetadata, verify_signature},
    certs::Identity,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use der::oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION;
use rsa::signature::{SignatureEncoding, Signer};
use time::{Duration, OffsetDateTime};
use x509_cert::der::referenced::OwnedToRef;

/// How long a federation token stays usable.
pub const TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Issues a token asserting that `email` logged in through our federation page.
///
/// Layout, before base64: a big-endian u16 payload length, the payload
/// `<expiry unix seconds>:<email>`, then the identity's signature over the payload.
pub fn issue(
    identity: &Identity,
    email: &str,
    now: OffsetDateTime,
) -> Result<String, CertificateError> {
    let expiry = (now + TOKEN_LIFETIME).unix_timestamp();
    let payload = format!("{expiry}:{email}");
    let payload_len = u16::try_from(payload.len())
        .map_err(|_| CertificateError::SigningFailure("token payload too long".to_string()))?;

    let signature = identity
        .signing_key()
        .try_sign(payload.as_bytes())
        .map_err(|err| CertificateError::SigningFailure(err.to_string()))?;

    let mut token = Vec::with_capacity(2 + payload.len() + 512);
    token.extend_from_slice(&payload_len.to_be_bytes());
    token.extend_from_slice(payload.as_bytes());
    token.extend_from_slice(&signature.to_bytes());
    Ok(STANDARD.encode(token))
}

/// Returns the email a token was issued for, if it is ours and unexpired.
pub fn verify(identity: &Identity, token: &str, now: OffsetDateTime) -> Option<String> {
    let token = STANDARD.decode(token.trim()).ok()?;
    let (length, rest) = token.split_first_chunk::<2>()?;
    let payload_len = usize::from(u16::from_be_bytes(*length));
    if rest.len() <= payload_len {
        return None;
    }
    let (payload, signature) = rest.split_at(payload_len);

    let public_key = rsa::RsaPublicKey::try_from(
        identity
            .certificate()
            .tbs_certificate
            .subject_public_key_info
            .owned_to_ref(),
    )
    .ok()?;
    let signature = SignatureMetadata {
        contents: signature.to_vec(),
        algorithm: SHA_256_WITH_RSA_ENCRYPTION,
    };
    verify_signature(public_key, signature, payload).ok()?;

    let payload = std::str::from_utf8(payload).ok()?;
    let (expiry, email) = payload.split_once(':')?;
    let expiry = OffsetDateTime::from_unix_timestamp(expiry.parse().ok()?).ok()?;
    if now >= expiry {
        return None;
    }
    Some(email.to_string())
}
