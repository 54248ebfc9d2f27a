use der::{Encode, oid::db::rfc5912, referenced::OwnedToRef};
use rsa::{
    RsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    signature::Verifier,
};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use x509_cert::{Certificate, spki::ObjectIdentifier};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("unsupported signature algorithm {0}")]
    UnsupportedAlgorithm(ObjectIdentifier),
    #[error("signing key is not an RSA key")]
    NotRsa,
    #[error("signature is malformed")]
    MalformedSignature,
    #[error("signature does not match")]
    Mismatch,
    #[error(transparent)]
    Encoding(#[from] der::Error),
}

/// Structure to assist with signature verification.
pub struct SignatureMetadata {
    pub contents: Vec<u8>,
    pub algorithm: ObjectIdentifier,
}

/// Verifies that the given signature was signed by the given public key.
///
/// Windows only ever hands us RSA keys, so only
/// PKCS#1 v1.5 RSA signatures are supported.
pub fn verify_signature(
    public_key: RsaPublicKey,
    signature: SignatureMetadata,
    message: &[u8],
) -> Result<(), VerifyError> {
    let given_signature = Signature::try_from(signature.contents.as_ref())
        .map_err(|_| VerifyError::MalformedSignature)?;

    let result = match signature.algorithm {
        rfc5912::SHA_1_WITH_RSA_ENCRYPTION => {
            VerifyingKey::<Sha1>::new(public_key).verify(message, &given_signature)
        }
        rfc5912::SHA_256_WITH_RSA_ENCRYPTION => {
            VerifyingKey::<Sha256>::new(public_key).verify(message, &given_signature)
        }
        rfc5912::SHA_384_WITH_RSA_ENCRYPTION => {
            VerifyingKey::<Sha384>::new(public_key).verify(message, &given_signature)
        }
        rfc5912::SHA_512_WITH_RSA_ENCRYPTION => {
            VerifyingKey::<Sha512>::new(public_key).verify(message, &given_signature)
        }
        unknown => return Err(VerifyError::UnsupportedAlgorithm(unknown)),
    };

    result.map_err(|_| VerifyError::Mismatch)
}

/// Verifies that the right-hand potential certificate is signed by
/// the given left-hand verifying certificate.
pub fn verify_cert_signature(
    verifying_cert: &Certificate,
    potential_cert: &Certificate,
) -> Result<(), VerifyError> {
    let potential_contents = potential_cert.tbs_certificate.to_der()?;

    let verifying_subject = verifying_cert
        .tbs_certificate
        .subject_public_key_info
        .owned_to_ref();
    let verifying_public_key =
        RsaPublicKey::try_from(verifying_subject).map_err(|_| VerifyError::NotRsa)?;

    let signature = SignatureMetadata {
        contents: potential_cert
            .signature
            .as_bytes()
            .ok_or(VerifyError::MalformedSignature)?
            .to_vec(),
        algorithm: potential_cert.signature_algorithm.oid,
    };
    verify_signature(verifying_public_key, signature, &potential_contents)
}
