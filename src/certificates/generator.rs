use super::{certs::Identity, csr::VerifiedCsr, names::build_name, serial::random_serial};
use const_oid::db::rfc5280::ID_KP_CLIENT_AUTH;
use der::{
    Decode,
    asn1::{GeneralizedTime, OctetString, UtcTime},
};
use rand::Rng;
use rsa::{RsaPrivateKey, pkcs1v15::SigningKey, pkcs8::EncodePublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::time::{Duration, SystemTime};
use x509_cert::{
    Certificate,
    builder::{Builder, CertificateBuilder, Profile},
    ext::pkix::{
        AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages,
        SubjectKeyIdentifier,
    },
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::{Time, Validity},
};

/// Lifetime of the identity certificate. We'll have it be valid for 10 years.
pub const IDENTITY_VALIDITY: Duration = Duration::from_secs(3650 * 24 * 60 * 60);
/// Lifetime of certificates issued to devices.
pub const CLIENT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// How long before expiry a device should renew.
pub const RENEWAL_PERIOD: Duration = Duration::from_secs(14 * 24 * 60 * 60);

const MAX_BACKDATE_MINUTES: u64 = 120;

/// Validity starting a random 0 to 120 minutes in the past.
///
/// Clients with a slightly skewed clock must still accept a fresh
/// certificate, and issuance times shouldn't be exact.
fn backdated_validity(lifetime: Duration) -> der::Result<Validity> {
    let now = SystemTime::now();
    let backdate = Duration::from_secs(60 * rand::thread_rng().gen_range(0..=MAX_BACKDATE_MINUTES));
    let not_before = now.checked_sub(backdate).unwrap_or(now);

    Ok(Validity {
        not_before: certificate_time(not_before)?,
        not_after: certificate_time(now + lifetime)?,
    })
}

/// RFC 5280 wants UTCTime through 2049, and GeneralizedTime afterwards.
fn certificate_time(time: SystemTime) -> der::Result<Time> {
    match UtcTime::from_system_time(time) {
        Ok(utc_time) => Ok(Time::UtcTime(utc_time)),
        Err(_) => Ok(Time::GeneralTime(GeneralizedTime::from_system_time(time)?)),
    }
}

/// SHA-1 over the subject public key bit string, per RFC 5280 section 4.2.1.2.
pub fn key_identifier(public_key_info: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    Sha1::digest(public_key_info.subject_public_key.raw_bytes()).to_vec()
}

/// Generates a self-signed identity certificate, alongside a fresh private key.
pub fn create_identity_certificate(
    organization: &str,
    key_bits: usize,
) -> Result<(Certificate, RsaPrivateKey), super::CertificateError> {
    let identity_key = RsaPrivateKey::new(&mut rand::thread_rng(), key_bits)?;

    // We'll utilize the tenant's name for values.
    let subject = build_name(Some(organization), &format!("{organization} Identity"))?;
    let public_key_der = identity_key.to_public_key().to_public_key_der()?;
    let public_key_info = SubjectPublicKeyInfoOwned::from_der(public_key_der.as_bytes())?;
    let subject_key_identifier = SubjectKeyIdentifier(OctetString::new(key_identifier(
        &public_key_info,
    ))?);

    let signer = SigningKey::<Sha256>::new(identity_key.clone());
    let mut cert_builder = CertificateBuilder::new(
        Profile::Manual { issuer: None },
        random_serial()?,
        backdated_validity(IDENTITY_VALIDITY)?,
        subject,
        public_key_info,
        &signer,
    )?;

    // Ensure this can be used as a certificate authority.
    cert_builder.add_extension(&BasicConstraints {
        ca: true,
        path_len_constraint: None,
    })?;
    cert_builder.add_extension(&KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign))?;
    cert_builder.add_extension(&subject_key_identifier)?;

    // Sign, and create!
    let identity_cert = cert_builder.build::<rsa::pkcs1v15::Signature>()?;
    Ok((identity_cert, identity_key))
}

/// Issues a client authentication certificate for the key within a verified request.
pub fn create_client_certificate(
    identity: &Identity,
    request: VerifiedCsr,
    common_name: &str,
    serial_number: SerialNumber,
) -> Result<Certificate, super::CertificateError> {
    let subject = build_name(None, common_name)?;
    let subject_key_identifier = SubjectKeyIdentifier(OctetString::new(key_identifier(
        &request.public_key_info,
    ))?);
    let authority_key_identifier = AuthorityKeyIdentifier {
        key_identifier: Some(OctetString::new(identity.key_identifier())?),
        authority_cert_issuer: None,
        authority_cert_serial_number: None,
    };

    let signer = identity.signing_key();
    let mut cert_builder = CertificateBuilder::new(
        Profile::Manual {
            issuer: Some(identity.certificate().tbs_certificate.subject.clone()),
        },
        serial_number,
        backdated_validity(CLIENT_VALIDITY)?,
        subject,
        request.public_key_info,
        &signer,
    )?;

    cert_builder.add_extension(&BasicConstraints {
        ca: false,
        path_len_constraint: None,
    })?;
    cert_builder.add_extension(&KeyUsage(KeyUsages::DigitalSignature.into()))?;
    cert_builder.add_extension(&ExtendedKeyUsage(vec![ID_KP_CLIENT_AUTH]))?;
    cert_builder.add_extension(&authority_key_identifier)?;
    cert_builder.add_extension(&subject_key_identifier)?;

    Ok(cert_builder.build::<rsa::pkcs1v15::Signature>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn backdates_within_two_hours() {
        let before = SystemTime::now();
        let validity = backdated_validity(CLIENT_VALIDITY).unwrap();
        let not_before = validity.not_before.to_system_time();
        let not_after = validity.not_after.to_system_time();

        // Encoded times drop sub-second precision.
        assert!(not_before <= before);
        assert!(before - Duration::from_secs(60 * MAX_BACKDATE_MINUTES + 1) <= not_before);
        let lifetime = not_after.duration_since(before).unwrap() + Duration::from_secs(1);
        assert!(lifetime >= CLIENT_VALIDITY && lifetime <= CLIENT_VALIDITY + DAY);
    }

    #[test]
    fn far_future_uses_generalized_time() {
        let far = SystemTime::UNIX_EPOCH + Duration::from_secs(2_600_000_000);
        assert!(matches!(certificate_time(far).unwrap(), Time::GeneralTime(_)));
        let near = SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        assert!(matches!(certificate_time(near).unwrap(), Time::UtcTime(_)));
    }
}
