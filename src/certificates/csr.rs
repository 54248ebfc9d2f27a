use super::cert_verify::{SignatureMetadata, verify_signature};
use base64::{Engine, engine::general_purpose::STANDARD};
use der::{Decode, Encode, oid::db::rfc5912, referenced::OwnedToRef};
use rsa::{RsaPublicKey, traits::PublicKeyParts};
use x509_cert::{request::CertReq, spki::SubjectPublicKeyInfoOwned};

/// Smallest RSA modulus we are willing to certify.
pub const MIN_KEY_BITS: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum CsrError {
    #[error("request is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("request is not a PKCS#10 structure: {0}")]
    Der(#[from] der::Error),
    #[error("request key is not RSA")]
    UnsupportedKey,
    #[error("request key is {0} bits, below the {MIN_KEY_BITS} bit minimum")]
    KeyTooSmall(usize),
    #[error("request signature does not verify: {0}")]
    Signature(#[from] super::cert_verify::VerifyError),
}

/// A PKCS#10 request whose signature proves possession of its key.
#[derive(Clone, Debug)]
pub struct VerifiedCsr {
    pub public_key_info: SubjectPublicKeyInfoOwned,
}

/// Decodes a base64 PKCS#10 request, as carried in a BinarySecurityToken,
/// and checks that it was signed by the key it contains.
pub fn parse_and_verify(csr_base64: &str) -> Result<VerifiedCsr, CsrError> {
    // Windows wraps long tokens across lines.
    let compact: String = csr_base64
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let csr_der = STANDARD.decode(compact)?;
    let request = CertReq::from_der(&csr_der)?;

    let spki = &request.info.public_key;
    if spki.algorithm.oid != rfc5912::RSA_ENCRYPTION {
        return Err(CsrError::UnsupportedKey);
    }
    let public_key =
        RsaPublicKey::try_from(spki.owned_to_ref()).map_err(|_| CsrError::UnsupportedKey)?;
    let key_bits = public_key.size() * 8;
    if key_bits < MIN_KEY_BITS {
        return Err(CsrError::KeyTooSmall(key_bits));
    }

    // The signature covers the DER form of CertificationRequestInfo.
    let signed_contents = request.info.to_der()?;
    let signature = SignatureMetadata {
        contents: request.signature.raw_bytes().to_vec(),
        algorithm: request.algorithm.oid,
    };
    verify_signature(public_key, signature, &signed_contents)?;

    Ok(VerifiedCsr {
        public_key_info: request.info.public_key,
    })
}
