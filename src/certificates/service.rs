use super::{
    cert_verify::{VerifyError, verify_cert_signature},
    certs::{Identity, StoredIdentity, offset_time},
    csr::{self, CsrError},
    generator,
    names::common_name,
    serial::SerialGenerator,
    token,
};
use crate::database::StoreError;
use crate::lock_unpoisoned;
use base64::{Engine, engine::general_purpose::STANDARD};
use der::{Decode, Encode};
use sha1::{Digest, Sha1};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use thiserror::Error;
use time::OffsetDateTime;
use x509_cert::Certificate;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("malformed certificate request: {0}")]
    MalformedCsr(String),
    #[error("certificate request signature does not verify")]
    InvalidCsrSignature,
    #[error("unable to sign certificate: {0}")]
    SigningFailure(String),
    #[error("unable to generate key: {0}")]
    KeyGeneration(#[from] rsa::Error),
    #[error("stored identity is unusable: {0}")]
    CorruptIdentity(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CsrError> for CertificateError {
    fn from(err: CsrError) -> Self {
        match err {
            CsrError::Signature(VerifyError::UnsupportedAlgorithm(_)) => {
                CertificateError::MalformedCsr(err.to_string())
            }
            CsrError::Signature(_) => CertificateError::InvalidCsrSignature,
            other => CertificateError::MalformedCsr(other.to_string()),
        }
    }
}

macro_rules! signing_failure_from {
    ($($error:ty),* $(,)?) => {
        $(
            impl From<$error> for CertificateError {
                fn from(err: $error) -> Self {
                    CertificateError::SigningFailure(err.to_string())
                }
            }
        )*
    };
}

signing_failure_from!(
    der::Error,
    x509_cert::builder::Error,
    x509_cert::spki::Error,
    rsa::pkcs8::Error,
);

/// Persists the identity across restarts.
pub trait IdentityStore: Send + Sync {
    fn save(&self, identity: &StoredIdentity) -> Result<(), StoreError>;
    fn retrieve(&self) -> Result<Option<StoredIdentity>, StoreError>;
}

/// A freshly signed client certificate.
#[derive(Clone, Debug)]
pub struct IssuedCertificate {
    pub der: Vec<u8>,
    pub certificate: Certificate,
    /// Uppercase hex SHA-1 of `der`.
    pub fingerprint: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

struct Inner {
    cached: Mutex<Option<Arc<Identity>>>,
    /// Held while an identity is loaded or generated, so only one ever is.
    generation: Mutex<()>,
    organization: Mutex<String>,
    store: Arc<dyn IdentityStore>,
    key_bits: usize,
    serials: SerialGenerator,
    issued: AtomicU64,
}

/// Owns the identity and everything signed by it.
#[derive(Clone)]
pub struct CertificateService {
    inner: Arc<Inner>,
}

impl CertificateService {
    /// `organization` names the identity if one must be generated.
    pub fn new(store: Arc<dyn IdentityStore>, key_bits: usize, organization: &str) -> Self {
        CertificateService {
            inner: Arc::new(Inner {
                cached: Mutex::new(None),
                generation: Mutex::new(()),
                organization: Mutex::new(organization.to_string()),
                store,
                key_bits,
                serials: SerialGenerator::new(),
                issued: AtomicU64::new(0),
            }),
        }
    }

    /// The current identity, loading or generating it on first use.
    ///
    /// Generation is CPU heavy. Call from a blocking context.
    pub fn identity(&self) -> Result<Arc<Identity>, CertificateError> {
        if let Some(identity) = lock_unpoisoned(&self.inner.cached).clone() {
            return Ok(identity);
        }

        let _generation = lock_unpoisoned(&self.inner.generation);
        // Someone else may have finished while we waited.
        if let Some(identity) = lock_unpoisoned(&self.inner.cached).clone() {
            return Ok(identity);
        }

        let identity = match self.inner.store.retrieve()? {
            Some(stored) => {
                let identity = Identity::from_stored(&stored)?;
                tracing::info!(fingerprint = identity.fingerprint(), "loaded identity");
                identity
            }
            None => {
                let organization = lock_unpoisoned(&self.inner.organization).clone();
                tracing::info!(%organization, bits = self.inner.key_bits, "generating identity");
                let identity = Identity::generate(&organization, self.inner.key_bits)?;
                self.inner.store.save(&identity.to_stored()?)?;
                tracing::info!(fingerprint = identity.fingerprint(), "created identity");
                identity
            }
        };

        let identity = Arc::new(identity);
        *lock_unpoisoned(&self.inner.cached) = Some(identity.clone());
        Ok(identity)
    }

    /// Replaces the identity with a new one for `organization`.
    ///
    /// If it cannot be persisted, the previous identity stays in effect.
    pub fn regenerate_identity(&self, organization: &str) -> Result<Arc<Identity>, CertificateError> {
        let _generation = lock_unpoisoned(&self.inner.generation);

        let identity = Arc::new(Identity::generate(organization, self.inner.key_bits)?);
        let stored = identity.to_stored()?;

        let previous = lock_unpoisoned(&self.inner.cached).replace(identity.clone());
        if let Err(err) = self.inner.store.save(&stored) {
            *lock_unpoisoned(&self.inner.cached) = previous;
            tracing::error!(error = %err, "unable to persist regenerated identity");
            return Err(err.into());
        }
        *lock_unpoisoned(&self.inner.organization) = organization.to_string();

        tracing::info!(
            fingerprint = identity.fingerprint(),
            %organization,
            "regenerated identity"
        );
        Ok(identity)
    }

    /// Signs the key within a base64 PKCS#10 request for `common_name`.
    ///
    /// The request's own signature is checked before the identity is touched.
    pub fn sign_csr(
        &self,
        csr_base64: &str,
        common_name: &str,
    ) -> Result<IssuedCertificate, CertificateError> {
        let request = csr::parse_and_verify(csr_base64)?;

        let identity = self.identity()?;
        let serial_number = self.inner.serials.next_serial()?;
        let certificate =
            generator::create_client_certificate(&identity, request, common_name, serial_number)?;

        let der = certificate.to_der()?;
        let fingerprint = hex::encode_upper(Sha1::digest(&der));
        let validity = &certificate.tbs_certificate.validity;
        let issued = IssuedCertificate {
            not_before: offset_time(&validity.not_before),
            not_after: offset_time(&validity.not_after),
            der,
            certificate,
            fingerprint,
        };

        let count = self.inner.issued.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            %common_name,
            fingerprint = %issued.fingerprint,
            issued = count,
            "issued client certificate"
        );
        Ok(issued)
    }

    /// How many client certificates this process has signed.
    pub fn issued_count(&self) -> u64 {
        self.inner.issued.load(Ordering::Relaxed)
    }

    pub fn issue_auth_token(&self, email: &str) -> Result<String, CertificateError> {
        let identity = self.identity()?;
        token::issue(&identity, email, OffsetDateTime::now_utc())
    }

    /// The email an auth token was issued for, if the token is valid.
    pub fn verify_auth_token(&self, auth_token: &str) -> Option<String> {
        let identity = self.identity_or_log()?;
        token::verify(&identity, auth_token, OffsetDateTime::now_utc())
    }

    /// The common name of a base64 DER certificate we issued, if it is currently valid.
    pub fn verify_issued_certificate(&self, certificate_base64: &str) -> Option<String> {
        let identity = self.identity_or_log()?;
        let certificate_der = STANDARD.decode(certificate_base64.trim()).ok()?;
        let certificate = Certificate::from_der(&certificate_der).ok()?;

        let tbs_certificate = &certificate.tbs_certificate;
        if tbs_certificate.issuer != identity.certificate().tbs_certificate.subject {
            return None;
        }
        verify_cert_signature(identity.certificate(), &certificate).ok()?;

        let now = OffsetDateTime::now_utc();
        let validity = &tbs_certificate.validity;
        if now < offset_time(&validity.not_before) || now >= offset_time(&validity.not_after) {
            return None;
        }
        common_name(&tbs_certificate.subject)
    }

    fn identity_or_log(&self) -> Option<Arc<Identity>> {
        self.identity()
            .inspect_err(|err| tracing::error!(error = %err, "identity unavailable"))
            .ok()
    }
}
