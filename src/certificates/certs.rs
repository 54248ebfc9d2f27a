use super::{CertificateError, generator};
use der::{Decode, Encode};
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use time::OffsetDateTime;
use x509_cert::{Certificate, time::Time};

/// The identity certificate and key, in the form they are persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub certificate_der: Vec<u8>,
    /// PKCS#8 DER.
    pub private_key_der: Vec<u8>,
}

impl fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("certificate_der", &self.certificate_der.len())
            .finish_non_exhaustive()
    }
}

/// The server's self-signed CA certificate and its private key.
///
/// The key never leaves this type; issuance goes through the certificate service.
#[derive(Clone)]
pub struct Identity {
    certificate: Certificate,
    certificate_der: Vec<u8>,
    private_key: RsaPrivateKey,
    fingerprint: String,
    key_identifier: Vec<u8>,
}

impl Identity {
    /// Creates a brand new identity for the given organization.
    pub fn generate(organization: &str, key_bits: usize) -> Result<Self, CertificateError> {
        let (certificate, private_key) =
            generator::create_identity_certificate(organization, key_bits)?;
        Identity::from_parts(certificate, private_key)
    }

    pub fn from_stored(stored: &StoredIdentity) -> Result<Self, CertificateError> {
        let certificate = Certificate::from_der(&stored.certificate_der)
            .map_err(|err| CertificateError::CorruptIdentity(err.to_string()))?;
        let private_key = RsaPrivateKey::from_pkcs8_der(&stored.private_key_der)
            .map_err(|err| CertificateError::CorruptIdentity(err.to_string()))?;

        // A certificate paired with some other key would issue unverifiable certificates.
        let public_key_der = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|err| CertificateError::CorruptIdentity(err.to_string()))?;
        let key_matches = rsa::pkcs8::EncodePublicKey::to_public_key_der(
            &private_key.to_public_key(),
        )
        .is_ok_and(|expected| expected.as_bytes() == public_key_der.as_slice());
        if !key_matches {
            return Err(CertificateError::CorruptIdentity(
                "private key does not match certificate".to_string(),
            ));
        }

        Identity::from_parts(certificate, private_key)
    }

    fn from_parts(
        certificate: Certificate,
        private_key: RsaPrivateKey,
    ) -> Result<Self, CertificateError> {
        let certificate_der = certificate.to_der()?;
        let fingerprint = hex::encode_upper(Sha1::digest(&certificate_der));
        let key_identifier =
            generator::key_identifier(&certificate.tbs_certificate.subject_public_key_info);

        Ok(Identity {
            certificate,
            certificate_der,
            private_key,
            fingerprint,
            key_identifier,
        })
    }

    pub fn to_stored(&self) -> Result<StoredIdentity, CertificateError> {
        let private_key_der = self.private_key.to_pkcs8_der()?;
        Ok(StoredIdentity {
            certificate_der: self.certificate_der.clone(),
            private_key_der: private_key_der.as_bytes().to_vec(),
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Uppercase hex SHA-1 of the certificate.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }

    pub fn not_before(&self) -> OffsetDateTime {
        offset_time(&self.certificate.tbs_certificate.validity.not_before)
    }

    pub fn not_after(&self) -> OffsetDateTime {
        offset_time(&self.certificate.tbs_certificate.validity.not_after)
    }

    pub(crate) fn key_identifier(&self) -> &[u8] {
        &self.key_identifier
    }

    pub(crate) fn signing_key(&self) -> SigningKey<Sha256> {
        SigningKey::<Sha256>::new(self.private_key.clone())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &self.subject())
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

pub(crate) fn offset_time(time: &Time) -> OffsetDateTime {
    OffsetDateTime::from(time.to_system_time())
}
