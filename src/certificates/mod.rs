mod cert_verify;
mod certs;
mod csr;
mod generator;
mod names;
mod serial;
mod service;
mod token;

pub use certs::{Identity, StoredIdentity};
pub use csr::MIN_KEY_BITS;
pub use generator::{CLIENT_VALIDITY, RENEWAL_PERIOD};
pub use names::common_name;
pub use service::{CertificateError, CertificateService, IdentityStore, IssuedCertificate};
pub use token::TOKEN_LIFETIME;
