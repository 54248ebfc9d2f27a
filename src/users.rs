use crate::database::StoreError;
use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{PasswordHash, SaltString},
};
use rand::rngs::OsRng;

/// Users allowed to enroll with on-premise credentials.
pub trait UserStore: Send + Sync {
    /// Whether `password` is correct for `email`.
    ///
    /// Unknown users and wrong passwords are indistinguishable to the caller.
    fn verify_login(&self, email: &str, password: &str) -> Result<bool, StoreError>;

    fn create_user(&self, email: &str, password: &str) -> Result<(), StoreError>;
}

/// Hashes a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| StoreError::PasswordHash(err.to_string()))
}

/// Verifies a password against an Argon2id PHC string.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, StoreError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|err| StoreError::Corrupt(format!("invalid password hash: {err}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(StoreError::PasswordHash(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("hunter2", "plaintext").is_err());
    }
}
